//! Comparison operators shared by threshold rules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tolerance applied by `=` and `!=`
pub const EQUALITY_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "=", alias = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "BETWEEN", alias = "between")]
    Between,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Between => "BETWEEN",
        }
    }

    /// Apply the operator. `upper` is the second bound of BETWEEN (inclusive);
    /// without one the range collapses to `target`.
    pub fn apply(&self, value: f64, target: f64, upper: Option<f64>) -> bool {
        match self {
            Comparison::Lt => value < target,
            Comparison::Le => value <= target,
            Comparison::Gt => value > target,
            Comparison::Ge => value >= target,
            Comparison::Eq => (value - target).abs() < EQUALITY_TOLERANCE,
            Comparison::Ne => (value - target).abs() >= EQUALITY_TOLERANCE,
            Comparison::Between => value >= target && value <= upper.unwrap_or(target),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
