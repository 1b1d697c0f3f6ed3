//! Rapid Upper Limb Assessment (McAtamney & Corlett, 1993).
//!
//! ## Inputs
//!
//! Angles `upperArm`, `lowerArm`, `wrist`, `neck` and `trunk` come from the
//! angle map. Everything that cannot be measured from a skeleton (raised
//! shoulder, support, muscle use, force) comes from [`RulaOptions`].
//!
//! ## Scoring
//!
//! Segment scores are summed into posture A (arm and wrist, capped 8) and
//! posture B (neck, trunk and legs, capped 9). Muscle use and force are added
//! to both, and the grand score is read from the published Table C.

use std::collections::BTreeMap;

use ergo_core::{AngleKey, AngleMap};
use serde::{Deserialize, Serialize};

use crate::risk::{
    twist_exceeds, AngleReader, BodySegment, PostureScorer, RiskAssessment, RiskLevel,
    ScoringMethod,
};

/// Grand score table, rows = adjusted score A (1..8), columns = adjusted score B (1..7+)
const TABLE_C: [[u8; 7]; 8] = [
    [1, 2, 3, 3, 4, 5, 5],
    [2, 2, 3, 4, 4, 5, 5],
    [3, 3, 3, 4, 4, 5, 6],
    [3, 3, 3, 4, 5, 6, 6],
    [4, 4, 4, 5, 6, 7, 7],
    [4, 4, 5, 6, 6, 7, 7],
    [5, 5, 6, 6, 7, 7, 7],
    [5, 5, 6, 7, 7, 7, 7],
];

/// Observations that complement the measured angles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RulaOptions {
    pub shoulder_raised: bool,
    pub arm_abducted: bool,
    pub arm_supported: bool,
    pub crossing_midline: bool,
    pub wrist_deviation: bool,
    pub wrist_mid_range: bool,
    pub neck_twisted: bool,
    pub neck_side_bent: bool,
    pub trunk_twisted: bool,
    pub trunk_side_bent: bool,
    pub legs_supported: bool,
    pub weight_balanced: bool,
    /// 1 for static or repeated (>4/min) muscle use
    pub muscle_use: u8,
    /// Load / force score 0..=3
    pub force: u8,
    /// Measured twist beyond this many degrees counts as twisted
    pub twist_threshold_deg: Option<f64>,
}

impl Default for RulaOptions {
    fn default() -> Self {
        Self {
            shoulder_raised: false,
            arm_abducted: false,
            arm_supported: false,
            crossing_midline: false,
            wrist_deviation: false,
            wrist_mid_range: true,
            neck_twisted: false,
            neck_side_bent: false,
            trunk_twisted: false,
            trunk_side_bent: false,
            legs_supported: true,
            weight_balanced: true,
            muscle_use: 0,
            force: 0,
            twist_threshold_deg: None,
        }
    }
}

fn clamp_score(score: i32, lo: i32, hi: i32) -> u8 {
    score.clamp(lo, hi) as u8
}

pub fn score_upper_arm(angle: f64, raised: bool, abducted: bool, supported: bool) -> u8 {
    let mut score = if angle < 20.0 {
        1
    } else if angle <= 45.0 {
        2
    } else if angle <= 90.0 {
        3
    } else {
        4
    };
    score += raised as i32 + abducted as i32 - supported as i32;
    clamp_score(score, 1, 6)
}

pub fn score_lower_arm(angle: f64, crossing_midline: bool) -> u8 {
    let base = if (60.0..=100.0).contains(&angle) { 1 } else { 2 };
    clamp_score(base + crossing_midline as i32, 1, 3)
}

pub fn score_wrist(angle: f64, deviation: bool) -> u8 {
    let base = if (0.0..=15.0).contains(&angle) { 1 } else { 2 };
    clamp_score(base + deviation as i32, 1, 4)
}

pub fn score_wrist_twist(mid_range: bool) -> u8 {
    if mid_range {
        1
    } else {
        2
    }
}

/// Negative angles are extension
pub fn score_neck(angle: f64, twisted: bool, side_bent: bool) -> u8 {
    let base = if angle < 0.0 {
        4
    } else if angle <= 10.0 {
        1
    } else if angle <= 20.0 {
        2
    } else {
        3
    };
    clamp_score(base + (twisted || side_bent) as i32, 1, 6)
}

pub fn score_trunk(angle: f64, twisted: bool, side_bent: bool) -> u8 {
    let base = if (0.0..=10.0).contains(&angle) {
        1
    } else if angle > 10.0 && angle <= 20.0 {
        2
    } else if angle > 20.0 && angle <= 60.0 {
        3
    } else {
        4
    };
    clamp_score(base + (twisted || side_bent) as i32, 1, 6)
}

pub fn score_legs(supported: bool, balanced: bool) -> u8 {
    if supported && balanced {
        1
    } else {
        2
    }
}

/// Grand score from adjusted A and B; out-of-table indices clamp to the last row/column
pub fn grand_score(score_a: u8, score_b: u8) -> u8 {
    let row = (score_a.max(1) - 1).min(7) as usize;
    let col = (score_b.max(1) - 1).min(6) as usize;
    TABLE_C
        .get(row)
        .and_then(|r| r.get(col))
        .copied()
        .unwrap_or_else(|| ((score_a as u32 + score_b as u32 + 1) / 2).min(7) as u8)
}

pub fn risk_level(score: u8) -> RiskLevel {
    match score {
        0..=2 => RiskLevel::Acceptable,
        3..=4 => RiskLevel::Low,
        5..=6 => RiskLevel::Medium,
        _ => RiskLevel::High,
    }
}

pub fn recommendation(score: u8) -> &'static str {
    match score {
        0..=2 => "Acceptable posture if not maintained or repeated for long periods.",
        3..=4 => "Investigate further; changes may be needed.",
        5..=6 => "Investigate and change soon.",
        _ => "Investigate and change immediately.",
    }
}

/// RULA scorer
#[derive(Debug, Clone, Copy, Default)]
pub struct RulaScorer;

impl RulaScorer {
    pub fn new() -> Self {
        Self
    }
}

impl PostureScorer for RulaScorer {
    type Options = RulaOptions;

    fn method(&self) -> ScoringMethod {
        ScoringMethod::Rula
    }

    fn score(&self, angles: &AngleMap, options: &RulaOptions) -> RiskAssessment {
        let mut reader = AngleReader::new(angles);
        let threshold = options.twist_threshold_deg;
        let neck_twisted =
            options.neck_twisted || twist_exceeds(angles, AngleKey::NeckTwist, threshold);
        let trunk_twisted =
            options.trunk_twisted || twist_exceeds(angles, AngleKey::TrunkTwist, threshold);

        let upper_arm = score_upper_arm(
            reader.read(AngleKey::UpperArm),
            options.shoulder_raised,
            options.arm_abducted,
            options.arm_supported,
        );
        let lower_arm = score_lower_arm(reader.read(AngleKey::LowerArm), options.crossing_midline);
        let wrist = score_wrist(reader.read(AngleKey::Wrist), options.wrist_deviation);
        let wrist_twist = score_wrist_twist(options.wrist_mid_range);
        let neck = score_neck(reader.read(AngleKey::Neck), neck_twisted, options.neck_side_bent);
        let trunk = score_trunk(reader.read(AngleKey::Trunk), trunk_twisted, options.trunk_side_bent);
        let legs = score_legs(options.legs_supported, options.weight_balanced);

        let posture_a = (upper_arm + lower_arm + wrist + wrist_twist).min(8);
        let posture_b = (neck + trunk + legs).min(9);
        let extra = options.muscle_use.min(1) + options.force.min(3);
        let score_a = posture_a + extra;
        let score_b = posture_b + extra;
        let final_score = grand_score(score_a, score_b);

        let scores = BTreeMap::from([
            (BodySegment::UpperArm, upper_arm),
            (BodySegment::LowerArm, lower_arm),
            (BodySegment::Wrist, wrist),
            (BodySegment::WristTwist, wrist_twist),
            (BodySegment::Neck, neck),
            (BodySegment::Trunk, trunk),
            (BodySegment::Legs, legs),
        ]);
        let group_scores = BTreeMap::from([
            ("postureA".to_string(), posture_a as f64),
            ("postureB".to_string(), posture_b as f64),
            ("scoreA".to_string(), score_a as f64),
            ("scoreB".to_string(), score_b as f64),
        ]);

        RiskAssessment {
            method: ScoringMethod::Rula,
            scores,
            group_scores,
            final_score: final_score as f64,
            risk_level: risk_level(final_score),
            recommendation: recommendation(final_score).to_string(),
            defaulted: reader.into_defaulted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn angles(upper: f64, lower: f64, wrist: f64, neck: f64, trunk: f64) -> AngleMap {
        AngleMap::new()
            .with(AngleKey::UpperArm, upper)
            .with(AngleKey::LowerArm, lower)
            .with(AngleKey::Wrist, wrist)
            .with(AngleKey::Neck, neck)
            .with(AngleKey::Trunk, trunk)
    }

    #[test]
    fn test_upper_arm_bands() {
        assert_eq!(score_upper_arm(10.0, false, false, false), 1);
        assert_eq!(score_upper_arm(20.0, false, false, false), 2);
        assert_eq!(score_upper_arm(45.0, false, false, false), 2);
        assert_eq!(score_upper_arm(90.0, false, false, false), 3);
        assert_eq!(score_upper_arm(120.0, true, true, false), 6);
        assert_eq!(score_upper_arm(5.0, false, false, true), 1);
    }

    #[test]
    fn test_neck_extension_scores_four() {
        assert_eq!(score_neck(-5.0, false, false), 4);
        assert_eq!(score_neck(15.0, true, false), 3);
        assert_eq!(score_neck(-5.0, true, true), 5);
    }

    #[test]
    fn test_reference_scenario() {
        let result = RulaScorer.score(&angles(30.0, 95.0, 10.0, 5.0, 5.0), &RulaOptions::default());
        assert_eq!(result.segment(BodySegment::UpperArm), Some(2));
        assert_eq!(result.segment(BodySegment::LowerArm), Some(1));
        assert_eq!(result.group("scoreA"), Some(5.0));
        assert_eq!(result.group("scoreB"), Some(3.0));
        assert_eq!(result.final_score, 4.0);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(!result.low_confidence());
    }

    #[test]
    fn test_lower_arm_out_of_range_reaches_medium() {
        let result = RulaScorer.score(&angles(30.0, 110.0, 10.0, 5.0, 5.0), &RulaOptions::default());
        assert_eq!(result.group("scoreA"), Some(6.0));
        assert_eq!(result.final_score, 5.0);
        assert_eq!(result.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_extreme_posture_saturates_table() {
        let options = RulaOptions {
            shoulder_raised: true,
            arm_abducted: true,
            crossing_midline: true,
            wrist_deviation: true,
            wrist_mid_range: false,
            neck_twisted: true,
            trunk_twisted: true,
            legs_supported: false,
            muscle_use: 1,
            force: 3,
            ..RulaOptions::default()
        };
        let result = RulaScorer.score(&angles(130.0, 20.0, 40.0, -10.0, 80.0), &options);
        assert_eq!(result.final_score, 7.0);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_missing_inputs_are_defaulted() {
        let result = RulaScorer.score(&AngleMap::new(), &RulaOptions::default());
        assert!(result.low_confidence());
        assert_eq!(result.defaulted.len(), 5);
        assert_eq!(result.segment(BodySegment::LowerArm), Some(1));
        assert!((1.0..=7.0).contains(&result.final_score));
    }

    #[test]
    fn test_twist_threshold_marks_trunk_twisted() {
        let map = angles(10.0, 80.0, 5.0, 5.0, 5.0).with(AngleKey::TrunkTwist, 30.0);
        let options = RulaOptions {
            twist_threshold_deg: Some(20.0),
            ..RulaOptions::default()
        };
        let result = RulaScorer.score(&map, &options);
        assert_eq!(result.segment(BodySegment::Trunk), Some(2));
    }

    #[test]
    fn test_final_score_always_in_range() {
        for a in 1..=15u8 {
            for b in 1..=15u8 {
                let s = grand_score(a, b);
                assert!((1..=7).contains(&s));
            }
        }
    }
}
