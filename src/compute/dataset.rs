//! Tabular datasets with train/validation splits and batches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::evolution::EvoRng;
use super::node::DataType;

/// One named input column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Float(Vec<f32>),
    Bool(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::Float(_) => DataType::Float,
            Self::Bool(_) => DataType::Bool,
        }
    }

    fn select(&self, idx: &[usize]) -> Column {
        match self {
            Self::Float(v) => Self::Float(idx.iter().map(|&i| v[i]).collect()),
            Self::Bool(v) => Self::Bool(idx.iter().map(|&i| v[i]).collect()),
        }
    }
}

/// On-disk shape of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    pub features: BTreeMap<String, Column>,
    pub y: Vec<f32>,
    #[serde(default)]
    pub classification: bool,
}

/// Feature columns, target and the train/validation partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DatasetFile", into = "DatasetFile")]
pub struct Dataset {
    features: BTreeMap<String, Column>,
    y: Vec<f32>,
    classification: bool,
    training: Vec<usize>,
    validation: Vec<usize>,
    batch_size: f32,
}

impl Dataset {
    /// Build a dataset where every sample is used for training.
    pub fn new(
        features: BTreeMap<String, Column>,
        y: Vec<f32>,
        classification: bool,
    ) -> Result<Self, DatasetError> {
        if y.is_empty() {
            return Err(DatasetError::Empty);
        }
        if features.is_empty() {
            return Err(DatasetError::NoFeatures);
        }
        if let Some((name, col)) = features.iter().find(|(_, col)| col.len() != y.len()) {
            return Err(DatasetError::LengthMismatch {
                name: name.clone(),
                len: col.len(),
                expected: y.len(),
            });
        }
        if classification && y.iter().any(|v| *v != 0.0 && *v != 1.0) {
            return Err(DatasetError::NonBinaryTarget);
        }
        let training = (0..y.len()).collect();
        Ok(Self {
            features,
            y,
            classification,
            training,
            validation: Vec::new(),
            batch_size: 1.0,
        })
    }

    /// Hold out a random `validation_size` fraction of the samples.
    ///
    /// At least one sample always stays in training.
    pub fn with_validation(mut self, validation_size: f32, rng: &mut EvoRng) -> Self {
        let n = self.y.len();
        let n_val = ((validation_size * n as f32).round() as usize).min(n - 1);
        if n_val == 0 {
            return self;
        }
        let mut idx: Vec<usize> = (0..n).collect();
        rng.shuffle(&mut idx);
        let training = idx.split_off(n_val);
        self.validation = idx;
        self.training = training;
        self.training.sort_unstable();
        self.validation.sort_unstable();
        self
    }

    /// Fraction of training samples drawn by `get_batch`.
    pub fn with_batch_size(mut self, batch_size: f32) -> Self {
        self.batch_size = batch_size.clamp(f32::MIN_POSITIVE, 1.0);
        self
    }

    pub fn n_samples(&self) -> usize {
        self.y.len()
    }

    pub fn y(&self) -> &[f32] {
        &self.y
    }

    pub fn is_classification(&self) -> bool {
        self.classification
    }

    pub fn use_validation(&self) -> bool {
        !self.validation.is_empty()
    }

    pub fn use_batch(&self) -> bool {
        self.batch_size < 1.0
    }

    pub fn feature(&self, name: &str) -> Option<&Column> {
        self.features.get(name)
    }

    /// Feature names and their types, in name order.
    pub fn feature_types(&self) -> impl Iterator<Item = (&str, DataType)> {
        self.features
            .iter()
            .map(|(name, col)| (name.as_str(), col.data_type()))
    }

    /// Samples used for fitting.
    pub fn get_training_data(&self) -> Dataset {
        self.subset(&self.training)
    }

    /// Held-out samples, or the training samples when there is no split.
    pub fn get_validation_data(&self) -> Dataset {
        if self.use_validation() {
            self.subset(&self.validation)
        } else {
            self.subset(&self.training)
        }
    }

    /// Random subsample of the training samples, without replacement.
    pub fn get_batch(&self, rng: &mut EvoRng) -> Dataset {
        let n = ((self.batch_size * self.training.len() as f32).round() as usize)
            .clamp(1, self.training.len());
        let mut idx = self.training.clone();
        rng.shuffle(&mut idx);
        idx.truncate(n);
        idx.sort_unstable();
        self.subset(&idx)
    }

    /// Balanced class weights per sample: `n / (n_classes * count(class))`.
    ///
    /// Empty for regression data.
    pub fn balanced_sample_weights(&self) -> Vec<f32> {
        if !self.classification {
            return Vec::new();
        }
        let positives = self.y.iter().filter(|v| **v == 1.0).count();
        let counts = [self.y.len() - positives, positives];
        let n_classes = counts.iter().filter(|c| **c > 0).count().max(1);
        self.y
            .iter()
            .map(|v| {
                let count = counts[usize::from(*v == 1.0)];
                self.y.len() as f32 / (n_classes * count) as f32
            })
            .collect()
    }

    fn subset(&self, idx: &[usize]) -> Dataset {
        Dataset {
            features: self
                .features
                .iter()
                .map(|(name, col)| (name.clone(), col.select(idx)))
                .collect(),
            y: idx.iter().map(|&i| self.y[i]).collect(),
            classification: self.classification,
            training: (0..idx.len()).collect(),
            validation: Vec::new(),
            batch_size: self.batch_size,
        }
    }
}

impl TryFrom<DatasetFile> for Dataset {
    type Error = DatasetError;

    fn try_from(file: DatasetFile) -> Result<Self, Self::Error> {
        Dataset::new(file.features, file.y, file.classification)
    }
}

impl From<Dataset> for DatasetFile {
    fn from(data: Dataset) -> Self {
        DatasetFile {
            features: data.features,
            y: data.y,
            classification: data.classification,
        }
    }
}

/// Dataset construction errors.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset has no samples")]
    Empty,
    #[error("Dataset has no features")]
    NoFeatures,
    #[error("Feature '{name}' has {len} values, expected {expected}")]
    LengthMismatch {
        name: String,
        len: usize,
        expected: usize,
    },
    #[error("Classification targets must be 0 or 1")]
    NonBinaryTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data(n: usize) -> Dataset {
        let x: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let flag: Vec<bool> = (0..n).map(|i| i % 2 == 0).collect();
        let y: Vec<f32> = x.iter().map(|v| 2.0 * v).collect();
        let mut features = BTreeMap::new();
        features.insert("x0".to_string(), Column::Float(x));
        features.insert("flag".to_string(), Column::Bool(flag));
        Dataset::new(features, y, false).unwrap()
    }

    #[test]
    fn test_new_rejects_mismatched_lengths() {
        let mut features = BTreeMap::new();
        features.insert("x0".to_string(), Column::Float(vec![1.0, 2.0]));
        let err = Dataset::new(features, vec![1.0], false).unwrap_err();
        assert!(matches!(err, DatasetError::LengthMismatch { .. }));
    }

    #[test]
    fn test_new_rejects_non_binary_classification() {
        let mut features = BTreeMap::new();
        features.insert("x0".to_string(), Column::Float(vec![1.0, 2.0]));
        let err = Dataset::new(features, vec![0.0, 2.0], true).unwrap_err();
        assert!(matches!(err, DatasetError::NonBinaryTarget));
    }

    #[test]
    fn test_validation_split_is_partition() {
        let mut rng = EvoRng::new(0);
        let data = sample_data(10).with_validation(0.3, &mut rng);
        assert!(data.use_validation());
        let train = data.get_training_data();
        let val = data.get_validation_data();
        assert_eq!(train.n_samples(), 7);
        assert_eq!(val.n_samples(), 3);

        let mut all: Vec<f32> = train.y().iter().chain(val.y()).copied().collect();
        all.sort_by(f32::total_cmp);
        assert_eq!(all, sample_data(10).y().to_vec());
    }

    #[test]
    fn test_no_split_validation_is_training() {
        let data = sample_data(5);
        assert!(!data.use_validation());
        assert_eq!(data.get_validation_data(), data.get_training_data());
    }

    #[test]
    fn test_batch_size() {
        let mut rng = EvoRng::new(1);
        let data = sample_data(20).with_batch_size(0.25);
        assert!(data.use_batch());
        let batch = data.get_batch(&mut rng);
        assert_eq!(batch.n_samples(), 5);
        assert_eq!(batch.feature_types().count(), 2);
    }

    #[test]
    fn test_balanced_weights() {
        let mut features = BTreeMap::new();
        features.insert("x0".to_string(), Column::Float(vec![0.0; 4]));
        let data = Dataset::new(features, vec![1.0, 0.0, 0.0, 0.0], true).unwrap();
        let w = data.balanced_sample_weights();
        assert_eq!(w, vec![2.0, 4.0 / 6.0, 4.0 / 6.0, 4.0 / 6.0]);
        assert!(sample_data(3).balanced_sample_weights().is_empty());
    }

    #[test]
    fn test_json_columns_untagged() {
        let json = r#"{"features": {"a": [1.0, 2.0], "b": [true, false]}, "y": [0.5, 1.5]}"#;
        let data: Dataset = serde_json::from_str(json).unwrap();
        assert_eq!(data.feature("a").unwrap().data_type(), DataType::Float);
        assert_eq!(data.feature("b").unwrap().data_type(), DataType::Bool);

        let bad = r#"{"features": {"a": [1.0]}, "y": [0.5, 1.5]}"#;
        assert!(serde_json::from_str::<Dataset>(bad).is_err());
    }
}
