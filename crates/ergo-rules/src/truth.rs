//! Three-valued (Kleene) truth.
//!
//! `Unknown` is what a rule reports when its inputs are missing. It is
//! never a duration or frequency event and counts as "not met" wherever a
//! boolean decision has to be made.

use std::ops::Not;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Truth {
    True,
    False,
    #[default]
    Unknown,
}

impl Truth {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Truth::True
        } else {
            Truth::False
        }
    }

    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    pub fn is_known(self) -> bool {
        self != Truth::Unknown
    }

    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    /// Flip when `invert` is set; Unknown stays Unknown
    pub fn invert_if(self, invert: bool) -> Truth {
        if invert {
            !self
        } else {
            self
        }
    }
}

impl Not for Truth {
    type Output = Truth;

    fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        Truth::from_bool(value)
    }
}

/// Result of evaluating one rule: its truth and the measured scalar, if any
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Outcome {
    pub truth: Truth,
    pub value: Option<f64>,
}

impl Outcome {
    pub fn new(truth: Truth, value: Option<f64>) -> Self {
        Self { truth, value }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn measured(truth: Truth, value: f64) -> Self {
        Self::new(truth, Some(value))
    }
}
