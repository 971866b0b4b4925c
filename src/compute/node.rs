//! Typed expression nodes.
//!
//! A node is one operator or terminal of a program tree. Nodes carry their
//! own return type, an optional multiplicative weight and the probability
//! that variation picks them as a mutation spot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Value type flowing along a tree edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float,
    Bool,
}

use DataType::{Bool, Float};

/// Operator or terminal kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    /// Dataset column.
    Feature,
    /// Constant; its value lives in the node weight.
    Constant,
    Add,
    Sub,
    Mul,
    /// Protected division: returns 1 where the denominator is near zero.
    Div,
    Sin,
    Cos,
    Exp,
    /// Protected logarithm of the absolute value.
    Log,
    /// Square root of the absolute value.
    Sqrt,
    Square,
    Tanh,
    /// Argument plus a learned offset. Always weighted.
    OffsetSum,
    Greater,
    Less,
    And,
    Or,
    Not,
    IfThenElse,
}

impl NodeKind {
    /// Every non-terminal kind.
    pub const OPERATORS: [NodeKind; 18] = [
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Sin,
        Self::Cos,
        Self::Exp,
        Self::Log,
        Self::Sqrt,
        Self::Square,
        Self::Tanh,
        Self::OffsetSum,
        Self::Greater,
        Self::Less,
        Self::And,
        Self::Or,
        Self::Not,
        Self::IfThenElse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Feature => "Terminal",
            Self::Constant => "Constant",
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::Div => "Div",
            Self::Sin => "Sin",
            Self::Cos => "Cos",
            Self::Exp => "Exp",
            Self::Log => "Log",
            Self::Sqrt => "Sqrt",
            Self::Square => "Square",
            Self::Tanh => "Tanh",
            Self::OffsetSum => "OffsetSum",
            Self::Greater => "Greater",
            Self::Less => "Less",
            Self::And => "And",
            Self::Or => "Or",
            Self::Not => "Not",
            Self::IfThenElse => "IfThenElse",
        }
    }

    /// Look up an operator by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::OPERATORS.into_iter().find(|kind| kind.name() == name)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Feature | Self::Constant)
    }

    /// Argument types, in order. Empty for terminals.
    pub fn arg_types(self) -> &'static [DataType] {
        match self {
            Self::Feature | Self::Constant => &[],
            Self::Add | Self::Sub | Self::Mul | Self::Div => &[Float, Float],
            Self::Sin
            | Self::Cos
            | Self::Exp
            | Self::Log
            | Self::Sqrt
            | Self::Square
            | Self::Tanh
            | Self::OffsetSum => &[Float],
            Self::Greater | Self::Less => &[Float, Float],
            Self::And | Self::Or => &[Bool, Bool],
            Self::Not => &[Bool],
            Self::IfThenElse => &[Bool, Float, Float],
        }
    }

    /// Return type of an operator. Features take the type of their column.
    pub fn op_ret_type(self) -> DataType {
        match self {
            Self::Greater | Self::Less | Self::And | Self::Or | Self::Not => Bool,
            _ => Float,
        }
    }

    /// Cost of the operator in the complexity measures.
    pub fn complexity(self) -> usize {
        match self {
            Self::Feature | Self::Constant | Self::OffsetSum => 1,
            Self::Add | Self::Sub => 2,
            Self::Greater | Self::Less | Self::And | Self::Or | Self::Not => 2,
            Self::Mul | Self::Square => 3,
            Self::Div | Self::Sqrt => 4,
            Self::Sin | Self::Cos | Self::Tanh | Self::Exp | Self::Log => 5,
            Self::IfThenElse => 5,
        }
    }
}

/// One node of a program tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub ret_type: DataType,
    /// Column name for `Feature` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Multiplier (or value, for constants).
    pub weight: f32,
    pub is_weighted: bool,
    /// Relative chance of being chosen as a mutation spot.
    pub prob_change: f32,
}

impl Node {
    /// Terminal reading a dataset column. Float columns start weighted.
    pub fn feature(name: impl Into<String>, ret_type: DataType) -> Self {
        Self {
            kind: NodeKind::Feature,
            ret_type,
            feature: Some(name.into()),
            weight: 1.0,
            is_weighted: ret_type == Float,
            prob_change: 1.0,
        }
    }

    pub fn constant(value: f32) -> Self {
        Self {
            kind: NodeKind::Constant,
            ret_type: Float,
            feature: None,
            weight: value,
            is_weighted: true,
            prob_change: 1.0,
        }
    }

    /// Operator node with unit weight, unweighted unless the kind requires it.
    pub fn op(kind: NodeKind) -> Self {
        debug_assert!(!kind.is_terminal(), "{} is a terminal", kind.name());
        let offset = kind == NodeKind::OffsetSum;
        Self {
            kind,
            ret_type: kind.op_ret_type(),
            feature: None,
            weight: if offset { 0.0 } else { 1.0 },
            is_weighted: offset,
            prob_change: 1.0,
        }
    }

    pub fn arg_types(&self) -> &'static [DataType] {
        self.kind.arg_types()
    }

    pub fn arity(&self) -> usize {
        self.arg_types().len()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Whether a weight multiplies this node's output when switched on.
    pub fn is_weighable(&self) -> bool {
        self.ret_type == Float
    }

    /// Whether the weight toggle mutations may flip this node.
    pub fn can_toggle_weight(&self) -> bool {
        self.is_weighable() && !matches!(self.kind, NodeKind::OffsetSum | NodeKind::Constant)
    }

    /// Nodes this one counts as in program size. A weight is a constant
    /// and a multiplication.
    pub fn size(&self) -> usize {
        if self.is_weighted && !matches!(self.kind, NodeKind::Constant | NodeKind::OffsetSum) {
            3
        } else {
            1
        }
    }

    /// Label used for terminal statistics: the column name or the kind.
    pub fn label(&self) -> &str {
        self.feature.as_deref().unwrap_or(self.kind.name())
    }

    /// Same return type and argument types.
    pub fn same_signature(&self, other: &Node) -> bool {
        self.ret_type == other.ret_type && self.arg_types() == other.arg_types()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NodeKind::Constant => write!(f, "{:.2}", self.weight),
            NodeKind::Feature if self.is_weighted => {
                write!(f, "{:.2}*{}", self.weight, self.label())
            }
            NodeKind::Feature => f.write_str(self.label()),
            kind => f.write_str(kind.name()),
        }
    }
}
