//! Shared assessment model for every scoring method.
//!
//! A scorer never fails on missing input. It substitutes a neutral angle,
//! records the key in [`RiskAssessment::defaulted`] and carries on, leaving
//! the decision to trust the result to the caller.

use std::collections::BTreeMap;
use std::fmt;

use ergo_core::{AngleKey, AngleMap};
use serde::{Deserialize, Serialize};

/// Ergonomic assessment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    Rula,
    Reba,
    Niosh,
}

impl ScoringMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ScoringMethod::Rula => "RULA",
            ScoringMethod::Reba => "REBA",
            ScoringMethod::Niosh => "NIOSH",
        }
    }
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body segment with its own integer sub-score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodySegment {
    UpperArm,
    LowerArm,
    Wrist,
    WristTwist,
    Neck,
    Trunk,
    Legs,
}

/// Risk band, shared across methods (each method uses a subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskLevel {
    Negligible,
    Acceptable,
    Nominal,
    Low,
    Increased,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Negligible => "Negligible",
            RiskLevel::Acceptable => "Acceptable",
            RiskLevel::Nominal => "Nominal",
            RiskLevel::Low => "Low Risk",
            RiskLevel::Increased => "Increased",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::High => "High Risk",
            RiskLevel::VeryHigh => "Very High Risk",
        }
    }
}

/// Result of scoring one frame with one method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub method: ScoringMethod,
    pub scores: BTreeMap<BodySegment, u8>,
    /// Intermediate group values (posture A/B, table C, NIOSH multipliers, ...)
    pub group_scores: BTreeMap<String, f64>,
    pub final_score: f64,
    pub risk_level: RiskLevel,
    pub recommendation: String,
    /// Inputs that were missing and replaced by a neutral default
    pub defaulted: Vec<AngleKey>,
}

impl RiskAssessment {
    /// True when any input had to be substituted
    pub fn low_confidence(&self) -> bool {
        !self.defaulted.is_empty()
    }

    pub fn segment(&self, segment: BodySegment) -> Option<u8> {
        self.scores.get(&segment).copied()
    }

    pub fn group(&self, name: &str) -> Option<f64> {
        self.group_scores.get(name).copied()
    }
}

/// What to do with an assessment computed from substituted inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingInputPolicy {
    /// Report the assessment, flagged as low confidence
    #[default]
    Substitute,
    /// Drop the assessment for this frame
    Require,
}

impl MissingInputPolicy {
    pub fn accepts(&self, assessment: &RiskAssessment) -> bool {
        match self {
            MissingInputPolicy::Substitute => true,
            MissingInputPolicy::Require => !assessment.low_confidence(),
        }
    }
}

/// A deterministic posture-risk method
pub trait PostureScorer {
    type Options;

    fn method(&self) -> ScoringMethod;

    fn score(&self, angles: &AngleMap, options: &Self::Options) -> RiskAssessment;
}

/// Neutral value substituted for a missing angle
pub fn neutral_angle(key: AngleKey) -> f64 {
    match key {
        AngleKey::LowerArm | AngleKey::LowerArmLeft | AngleKey::LowerArmRight => 80.0,
        _ => 0.0,
    }
}

/// Reads angles, remembering which ones fell back to the neutral default
pub(crate) struct AngleReader<'a> {
    angles: &'a AngleMap,
    defaulted: Vec<AngleKey>,
}

impl<'a> AngleReader<'a> {
    pub(crate) fn new(angles: &'a AngleMap) -> Self {
        Self {
            angles,
            defaulted: Vec::new(),
        }
    }

    pub(crate) fn read(&mut self, key: AngleKey) -> f64 {
        match self.angles.get(key) {
            Some(v) => v,
            None => {
                if !self.defaulted.contains(&key) {
                    self.defaulted.push(key);
                }
                neutral_angle(key)
            }
        }
    }

    /// Optional input: absence is not a substitution
    pub(crate) fn peek(&self, key: AngleKey) -> Option<f64> {
        self.angles.get(key)
    }

    pub(crate) fn into_defaulted(self) -> Vec<AngleKey> {
        self.defaulted
    }
}

/// Whether a measured twist exceeds the configured threshold
pub(crate) fn twist_exceeds(angles: &AngleMap, key: AngleKey, threshold: Option<f64>) -> bool {
    match (threshold, angles.get(key)) {
        (Some(limit), Some(twist)) => twist.abs() > limit,
        _ => false,
    }
}
