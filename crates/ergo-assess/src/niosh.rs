//! Revised NIOSH lifting equation (Waters et al., 1993).
//!
//! `RWL = LC × HM × VM × DM × AM × FM × CM` with a load constant of 23 kg,
//! and the lifting index `LI = weight / RWL`. Distances are in centimetres,
//! the asymmetry angle in degrees, frequency in lifts per minute.

use std::collections::BTreeMap;

use ergo_core::{AngleKey, AngleMap};
use serde::{Deserialize, Serialize};

use crate::risk::{AngleReader, PostureScorer, RiskAssessment, RiskLevel, ScoringMethod};

/// Load constant in kg
pub const LOAD_CONSTANT: f64 = 23.0;

/// Frequency multiplier table.
///
/// Each row is `(lifts/min, [≤1h V<75, ≤1h V≥75, ≤2h V<75, ≤2h V≥75, ≤8h V<75, ≤8h V≥75])`.
const FREQUENCY_TABLE: [(f64, [f64; 6]); 17] = [
    (0.2, [1.00, 1.00, 0.95, 0.95, 0.85, 0.85]),
    (0.5, [0.97, 0.97, 0.92, 0.92, 0.81, 0.81]),
    (1.0, [0.94, 0.94, 0.88, 0.88, 0.75, 0.75]),
    (2.0, [0.91, 0.91, 0.84, 0.84, 0.65, 0.65]),
    (3.0, [0.88, 0.88, 0.79, 0.79, 0.55, 0.55]),
    (4.0, [0.84, 0.84, 0.72, 0.72, 0.45, 0.45]),
    (5.0, [0.80, 0.80, 0.60, 0.60, 0.35, 0.35]),
    (6.0, [0.75, 0.75, 0.50, 0.50, 0.27, 0.27]),
    (7.0, [0.70, 0.70, 0.42, 0.42, 0.22, 0.22]),
    (8.0, [0.60, 0.60, 0.35, 0.35, 0.18, 0.18]),
    (9.0, [0.52, 0.52, 0.30, 0.30, 0.00, 0.15]),
    (10.0, [0.45, 0.45, 0.26, 0.26, 0.00, 0.13]),
    (11.0, [0.41, 0.41, 0.00, 0.23, 0.00, 0.00]),
    (12.0, [0.37, 0.37, 0.00, 0.21, 0.00, 0.00]),
    (13.0, [0.00, 0.34, 0.00, 0.00, 0.00, 0.00]),
    (14.0, [0.00, 0.31, 0.00, 0.00, 0.00, 0.00]),
    (15.0, [0.00, 0.28, 0.00, 0.00, 0.00, 0.00]),
];

/// Hand-to-object coupling quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coupling {
    #[default]
    Good,
    Fair,
    Poor,
}

/// Geometry and cadence of one lifting task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LiftingTask {
    /// Horizontal hand distance from the ankles midpoint
    pub horizontal_cm: f64,
    /// Hand height at the origin of the lift
    pub vertical_cm: f64,
    /// Vertical travel distance
    pub travel_cm: f64,
    /// Falls back to the measured trunk twist when absent
    pub asymmetry_deg: Option<f64>,
    pub frequency_per_min: f64,
    pub duration_hours: f64,
    pub coupling: Coupling,
    pub weight_kg: f64,
}

impl Default for LiftingTask {
    fn default() -> Self {
        Self {
            horizontal_cm: 25.0,
            vertical_cm: 75.0,
            travel_cm: 0.0,
            asymmetry_deg: None,
            frequency_per_min: 0.0,
            duration_hours: 0.0,
            coupling: Coupling::Good,
            weight_kg: 0.0,
        }
    }
}

/// Individual multipliers of the equation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Multipliers {
    pub hm: f64,
    pub vm: f64,
    pub dm: f64,
    pub am: f64,
    pub fm: f64,
    pub cm: f64,
}

impl Multipliers {
    pub fn product(&self) -> f64 {
        self.hm * self.vm * self.dm * self.am * self.fm * self.cm
    }
}

pub fn horizontal_multiplier(h: f64) -> f64 {
    if h <= 25.0 {
        1.0
    } else if h >= 63.0 {
        0.0
    } else {
        (25.0 / h).clamp(0.0, 1.0)
    }
}

pub fn vertical_multiplier(v: f64) -> f64 {
    if v > 175.0 {
        return 0.0;
    }
    (1.0 - 0.003 * (v - 75.0).abs()).clamp(0.0, 1.0)
}

pub fn distance_multiplier(d: f64) -> f64 {
    if d <= 25.0 {
        1.0
    } else if d > 175.0 {
        0.0
    } else {
        (0.82 + 4.5 / d).clamp(0.0, 1.0)
    }
}

pub fn asymmetry_multiplier(a: f64) -> f64 {
    let a = a.abs();
    if a > 135.0 {
        return 0.0;
    }
    (1.0 - 0.0032 * a).clamp(0.0, 1.0)
}

pub fn frequency_multiplier(frequency: f64, duration_hours: f64, v: f64) -> f64 {
    let band = if duration_hours <= 1.0 {
        0
    } else if duration_hours <= 2.0 {
        1
    } else {
        2
    };
    let column = band * 2 + usize::from(v >= 75.0);
    FREQUENCY_TABLE
        .iter()
        .find(|(f, _)| frequency <= *f)
        .and_then(|(_, row)| row.get(column))
        .copied()
        .unwrap_or(0.0)
}

pub fn coupling_multiplier(coupling: Coupling, v: f64) -> f64 {
    match coupling {
        Coupling::Good => 1.0,
        Coupling::Fair if v < 75.0 => 0.95,
        Coupling::Fair => 1.0,
        Coupling::Poor => 0.90,
    }
}

pub fn risk_level(li: f64) -> RiskLevel {
    if li <= 1.0 {
        RiskLevel::Nominal
    } else if li <= 2.0 {
        RiskLevel::Increased
    } else if li <= 3.0 {
        RiskLevel::High
    } else {
        RiskLevel::VeryHigh
    }
}

pub fn recommendation(li: f64) -> &'static str {
    if li <= 1.0 {
        "Lift is within the recommended weight limit."
    } else if li <= 2.0 {
        "Increased risk for some workers; redesign the task where possible."
    } else if li <= 3.0 {
        "High risk; redesign the task."
    } else {
        "Very high risk; redesign the task before it is performed again."
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NioshScorer;

impl NioshScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn multipliers(&self, task: &LiftingTask, asymmetry: f64) -> Multipliers {
        let v = task.vertical_cm;
        Multipliers {
            hm: horizontal_multiplier(task.horizontal_cm),
            vm: vertical_multiplier(v),
            dm: distance_multiplier(task.travel_cm),
            am: asymmetry_multiplier(asymmetry),
            fm: frequency_multiplier(task.frequency_per_min, task.duration_hours, v),
            cm: coupling_multiplier(task.coupling, v),
        }
    }
}

/// `weight / rwl`, infinite for a real load against a zero limit
pub fn lifting_index(weight: f64, rwl: f64) -> f64 {
    if rwl > 0.0 {
        weight / rwl
    } else if weight > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

impl PostureScorer for NioshScorer {
    type Options = LiftingTask;

    fn method(&self) -> ScoringMethod {
        ScoringMethod::Niosh
    }

    fn score(&self, angles: &AngleMap, task: &LiftingTask) -> RiskAssessment {
        let mut reader = AngleReader::new(angles);
        let asymmetry = match task.asymmetry_deg {
            Some(a) => a,
            None => reader.read(AngleKey::TrunkTwist),
        };

        let m = self.multipliers(task, asymmetry);
        let rwl = LOAD_CONSTANT * m.product();
        let li = lifting_index(task.weight_kg, rwl);

        let group_scores = BTreeMap::from([
            ("hm".to_string(), m.hm),
            ("vm".to_string(), m.vm),
            ("dm".to_string(), m.dm),
            ("am".to_string(), m.am),
            ("fm".to_string(), m.fm),
            ("cm".to_string(), m.cm),
            ("rwl".to_string(), rwl),
            ("li".to_string(), li),
        ]);

        RiskAssessment {
            method: ScoringMethod::Niosh,
            scores: BTreeMap::new(),
            group_scores,
            final_score: li,
            risk_level: risk_level(li),
            recommendation: recommendation(li).to_string(),
            defaulted: reader.into_defaulted(),
        }
    }
}
