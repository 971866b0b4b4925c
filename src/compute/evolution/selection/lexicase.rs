//! Epsilon-lexicase parent selection.
//!
//! Each parent is chosen by filtering the island on one training case at a
//! time, in random order, keeping only individuals whose error on that case
//! is within epsilon of the best. Epsilon is the median absolute deviation
//! of the case errors for continuous losses and zero otherwise.

use crate::compute::evolution::population::Population;
use crate::compute::evolution::rng::EvoRng;
use crate::schema::Parameters;

pub(crate) fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Median absolute deviation.
pub fn mad(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    let med = median(&mut sorted);
    let mut deviations: Vec<f32> = values.iter().map(|v| (v - med).abs()).collect();
    median(&mut deviations)
}

fn uses_epsilon(params: &Parameters) -> bool {
    !params.program_type.is_classification() || matches!(params.scorer_name(), "log" | "multi_log")
}

/// Exactly one parent per member of the island.
///
/// The first generation keeps the island as is.
pub fn select(pop: &Population, island: usize, params: &Parameters, rng: &mut EvoRng) -> Vec<usize> {
    let pool = pop.island(island);
    if params.current_gen == 0 {
        return pool.to_vec();
    }
    let n_cases = pool
        .iter()
        .map(|&slot| pop.ind(slot).error.len())
        .min()
        .unwrap_or(0);
    if n_cases == 0 || pool.len() < 2 {
        return (0..pool.len()).map(|_| pool[rng.below(pool.len())]).collect();
    }

    let epsilon: Vec<f32> = if uses_epsilon(params) {
        (0..n_cases)
            .map(|case| {
                let errors: Vec<f32> = pool.iter().map(|&s| pop.ind(s).error[case]).collect();
                mad(&errors)
            })
            .collect()
    } else {
        vec![0.0; n_cases]
    };
    let weighted_cases =
        params.program_type.is_classification() && params.sample_weights.len() == n_cases;

    let mut selected = Vec::with_capacity(pool.len());
    for _ in 0..pool.len() {
        let cases: Vec<usize> = if weighted_cases {
            rng.weighted_order(&params.sample_weights)
        } else {
            let mut cases: Vec<usize> = (0..n_cases).collect();
            rng.shuffle(&mut cases);
            cases
        };

        let mut candidates: Vec<usize> = pool.to_vec();
        let mut h = 0;
        let mut pass = true;
        while pass {
            let case = cases[h];
            let best = candidates
                .iter()
                .map(|&s| pop.ind(s).error[case])
                .fold(f32::INFINITY, f32::min);
            let winners: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&s| pop.ind(s).error[case] <= best + epsilon[case])
                .collect();
            h += 1;
            pass = winners.len() > 1 && h < n_cases;
            if winners.is_empty() {
                // No one passes this case: keep the previous pool.
                pass = h < n_cases;
            } else {
                candidates = winners;
            }
        }

        selected.push(candidates[rng.below(candidates.len())]);
    }

    assert_eq!(selected.len(), pool.len(), "lexicase must select one parent per member");
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::population::tests::test_population;
    use crate::schema::ProgramType;

    fn later(params: Parameters) -> Parameters {
        Parameters {
            current_gen: 1,
            ..params
        }
    }

    fn with_errors(errors: &[Vec<f32>]) -> Population {
        let mut pop = test_population(errors.len(), 1, 0);
        for (slot, e) in errors.iter().enumerate() {
            pop.get_mut(slot).unwrap().error = e.clone();
        }
        pop
    }

    #[test]
    fn test_mad() {
        assert_eq!(mad(&[1.0, 2.0, 3.0, 4.0, 100.0]), 1.0);
        assert_eq!(mad(&[5.0, 5.0]), 0.0);
        assert_eq!(mad(&[]), 0.0);
    }

    #[test]
    fn test_selects_pool_size() {
        let errors: Vec<Vec<f32>> = (0..7)
            .map(|i| (0..5).map(|c| ((i * 3 + c) % 4) as f32).collect())
            .collect();
        let pop = with_errors(&errors);
        assert_eq!(select(&pop, 0, &Parameters::default(), &mut EvoRng::new(0)), (0..7).collect::<Vec<_>>());

        let params = later(Parameters::default());
        let mut rng = EvoRng::new(3);
        let parents = select(&pop, 0, &params, &mut rng);
        assert_eq!(parents.len(), 7);
        assert!(parents.iter().all(|p| *p < 7));
    }

    #[test]
    fn test_elite_always_wins() {
        // Slot 2 is strictly best on every case by more than the MAD.
        let pop = with_errors(&[
            vec![5.0, 5.0, 5.0],
            vec![4.0, 6.0, 5.0],
            vec![0.0, 0.0, 0.0],
            vec![6.0, 4.0, 6.0],
        ]);
        let params = later(Parameters {
            program_type: ProgramType::BinaryClassifier,
            scorer: Some("accuracy".to_string()),
            ..Default::default()
        });
        let mut rng = EvoRng::new(4);
        let parents = select(&pop, 0, &params, &mut rng);
        assert_eq!(parents, vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_specialists_share_selections() {
        let pop = with_errors(&[vec![0.0, 9.0], vec![9.0, 0.0], vec![9.0, 9.0]]);
        let params = later(Parameters {
            program_type: ProgramType::BinaryClassifier,
            scorer: Some("accuracy".to_string()),
            ..Default::default()
        });
        let mut rng = EvoRng::new(5);
        let mut counts = [0usize; 3];
        for _ in 0..50 {
            for p in select(&pop, 0, &params, &mut rng) {
                counts[p] += 1;
            }
        }
        assert_eq!(counts[2], 0);
        assert!(counts[0] > 0 && counts[1] > 0);
    }

    #[test]
    fn test_unscorable_case_keeps_surviving_pool() {
        // Case 1 is NaN for everyone, so only case 0 can filter.
        let pop = with_errors(&[
            vec![0.0, f32::NAN],
            vec![0.0, f32::NAN],
            vec![9.0, f32::NAN],
        ]);
        let params = later(Parameters::default());
        let mut rng = EvoRng::new(7);
        let mut counts = [0usize; 3];
        for _ in 0..200 {
            for p in select(&pop, 0, &params, &mut rng) {
                counts[p] += 1;
            }
        }
        assert_eq!(counts[2], 0);
        assert_eq!(counts[0] + counts[1], 600);
    }

    #[test]
    fn test_no_errors_falls_back_to_uniform() {
        let pop = with_errors(&[vec![], vec![], vec![]]);
        let mut rng = EvoRng::new(6);
        let parents = select(&pop, 0, &later(Parameters::default()), &mut rng);
        assert_eq!(parents.len(), 3);
    }
}
