//! Rapid Entire Body Assessment (Hignett & McAtamney, 2000).
//!
//! Group A (trunk, neck, legs) is read from Table A and increased by the
//! load score. Group B (upper arm, lower arm, wrist) is read from Table B and
//! increased by the coupling score. Table C combines both, and the activity
//! score (static hold, repetition, rapid change) is added on top, giving a
//! final score in `1..=15`.

use std::collections::BTreeMap;

use ergo_core::{AngleKey, AngleMap};
use serde::{Deserialize, Serialize};

use crate::risk::{
    twist_exceeds, AngleReader, BodySegment, PostureScorer, RiskAssessment, RiskLevel,
    ScoringMethod,
};

/// `[trunk-1][neck-1][legs-1]`
const TABLE_A: [[[u8; 4]; 3]; 5] = [
    [[1, 2, 3, 4], [1, 2, 3, 4], [3, 3, 5, 6]],
    [[2, 3, 4, 5], [3, 4, 5, 6], [4, 5, 6, 7]],
    [[2, 4, 5, 6], [4, 5, 6, 7], [5, 6, 7, 8]],
    [[3, 5, 6, 7], [5, 6, 7, 8], [6, 7, 8, 9]],
    [[4, 6, 7, 8], [6, 7, 8, 9], [7, 8, 9, 9]],
];

/// `[lower_arm-1][upper_arm-1][wrist-1]`
const TABLE_B: [[[u8; 3]; 6]; 2] = [
    [
        [1, 2, 2],
        [1, 2, 3],
        [3, 4, 5],
        [4, 5, 5],
        [6, 7, 8],
        [7, 8, 8],
    ],
    [
        [1, 2, 3],
        [2, 3, 4],
        [4, 5, 5],
        [5, 6, 7],
        [7, 8, 8],
        [8, 9, 9],
    ],
];

/// `[score_a-1][score_b-1]`
const TABLE_C: [[u8; 12]; 12] = [
    [1, 1, 1, 2, 3, 3, 4, 5, 6, 7, 7, 7],
    [1, 2, 2, 3, 4, 4, 5, 6, 6, 7, 7, 8],
    [2, 3, 3, 3, 4, 5, 6, 7, 7, 8, 8, 8],
    [3, 4, 4, 4, 5, 6, 7, 8, 8, 9, 9, 9],
    [4, 4, 4, 5, 6, 7, 8, 8, 9, 9, 9, 9],
    [6, 6, 6, 7, 8, 8, 9, 9, 10, 10, 10, 10],
    [7, 7, 7, 8, 9, 9, 9, 10, 10, 11, 11, 11],
    [8, 8, 8, 9, 10, 10, 10, 10, 10, 11, 11, 11],
    [9, 9, 9, 10, 10, 10, 11, 11, 11, 12, 12, 12],
    [10, 10, 10, 11, 11, 11, 11, 12, 12, 12, 12, 12],
    [11, 11, 11, 11, 12, 12, 12, 12, 12, 12, 12, 12],
    [12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12, 12],
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RebaOptions {
    pub neck_twisted: bool,
    pub neck_side_bent: bool,
    pub trunk_twisted: bool,
    pub trunk_side_bent: bool,
    /// Weight borne on both legs
    pub legs_bilateral: bool,
    pub walking: bool,
    /// 0 (< 5 kg), 1 (5-10 kg), 2 (> 10 kg)
    pub load: u8,
    pub arm_abducted: bool,
    pub shoulder_raised: bool,
    pub arm_supported: bool,
    pub wrist_deviated: bool,
    pub wrist_twisted: bool,
    /// 0 good, 1 fair, 2 poor, 3 unacceptable
    pub coupling: u8,
    /// A body part held for more than one minute
    pub static_posture: bool,
    /// Small-range action repeated more than four times a minute
    pub repeated_action: bool,
    pub rapid_change: bool,
    pub twist_threshold_deg: Option<f64>,
}

impl Default for RebaOptions {
    fn default() -> Self {
        Self {
            neck_twisted: false,
            neck_side_bent: false,
            trunk_twisted: false,
            trunk_side_bent: false,
            legs_bilateral: true,
            walking: false,
            load: 0,
            arm_abducted: false,
            shoulder_raised: false,
            arm_supported: false,
            wrist_deviated: false,
            wrist_twisted: false,
            coupling: 0,
            static_posture: false,
            repeated_action: false,
            rapid_change: false,
            twist_threshold_deg: None,
        }
    }
}

impl RebaOptions {
    pub fn activity_score(&self) -> u8 {
        self.static_posture as u8 + self.repeated_action as u8 + self.rapid_change as u8
    }
}

pub fn score_neck(angle: f64, twisted: bool, side_bent: bool) -> u8 {
    let base = if angle > 20.0 { 2 } else { 1 };
    (base + (twisted || side_bent) as u8).min(3)
}

pub fn score_trunk(angle: f64, twisted: bool, side_bent: bool) -> u8 {
    let base = if angle <= 0.0 {
        1
    } else if angle <= 20.0 {
        2
    } else if angle <= 60.0 {
        3
    } else {
        4
    };
    (base + (twisted || side_bent) as u8).min(5)
}

/// `knee` is the knee flexion angle
pub fn score_legs(bilateral: bool, walking: bool, knee: f64) -> u8 {
    let base = if bilateral && !walking { 1 } else { 2 };
    let flexion = if knee >= 60.0 {
        2
    } else if knee > 30.0 {
        1
    } else {
        0
    };
    (base + flexion).min(4)
}

pub fn score_upper_arm(angle: f64, abducted: bool, raised: bool, supported: bool) -> u8 {
    let base: i32 = if angle <= 20.0 {
        1
    } else if angle <= 45.0 {
        2
    } else if angle <= 90.0 {
        3
    } else {
        4
    };
    (base + abducted as i32 + raised as i32 - supported as i32).clamp(1, 6) as u8
}

pub fn score_lower_arm(angle: f64) -> u8 {
    if (60.0..=100.0).contains(&angle) {
        1
    } else {
        2
    }
}

pub fn score_wrist(angle: f64, deviated: bool, twisted: bool) -> u8 {
    let base = if (0.0..=15.0).contains(&angle) { 1 } else { 2 };
    (base + (deviated || twisted) as u8).min(3)
}

fn index(score: u8, len: usize) -> usize {
    (score.max(1) as usize - 1).min(len - 1)
}

pub fn table_a(trunk: u8, neck: u8, legs: u8) -> u8 {
    TABLE_A[index(trunk, 5)][index(neck, 3)][index(legs, 4)]
}

pub fn table_b(upper_arm: u8, lower_arm: u8, wrist: u8) -> u8 {
    TABLE_B[index(lower_arm, 2)][index(upper_arm, 6)][index(wrist, 3)]
}

pub fn table_c(score_a: u8, score_b: u8) -> u8 {
    TABLE_C[index(score_a, 12)][index(score_b, 12)]
}

pub fn risk_level(score: u8) -> RiskLevel {
    match score {
        0..=1 => RiskLevel::Negligible,
        2..=3 => RiskLevel::Low,
        4..=7 => RiskLevel::Medium,
        8..=10 => RiskLevel::High,
        _ => RiskLevel::VeryHigh,
    }
}

pub fn recommendation(score: u8) -> &'static str {
    match score {
        0..=1 => "No action necessary.",
        2..=3 => "Action may be necessary.",
        4..=7 => "Action necessary.",
        8..=10 => "Action necessary soon.",
        _ => "Action necessary now.",
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RebaScorer;

impl RebaScorer {
    pub fn new() -> Self {
        Self
    }
}

impl PostureScorer for RebaScorer {
    type Options = RebaOptions;

    fn method(&self) -> ScoringMethod {
        ScoringMethod::Reba
    }

    fn score(&self, angles: &AngleMap, options: &RebaOptions) -> RiskAssessment {
        let mut reader = AngleReader::new(angles);
        let threshold = options.twist_threshold_deg;
        let neck_twisted =
            options.neck_twisted || twist_exceeds(angles, AngleKey::NeckTwist, threshold);
        let trunk_twisted =
            options.trunk_twisted || twist_exceeds(angles, AngleKey::TrunkTwist, threshold);

        let neck = score_neck(reader.read(AngleKey::Neck), neck_twisted, options.neck_side_bent);
        let trunk = score_trunk(reader.read(AngleKey::Trunk), trunk_twisted, options.trunk_side_bent);
        let legs = score_legs(
            options.legs_bilateral,
            options.walking,
            reader.read(AngleKey::Leg),
        );
        let upper_arm = score_upper_arm(
            reader.read(AngleKey::UpperArm),
            options.arm_abducted,
            options.shoulder_raised,
            options.arm_supported,
        );
        let lower_arm = score_lower_arm(reader.read(AngleKey::LowerArm));
        let wrist = score_wrist(
            reader.read(AngleKey::Wrist),
            options.wrist_deviated,
            options.wrist_twisted,
        );

        let score_a = table_a(trunk, neck, legs) + options.load.min(2);
        let score_b = table_b(upper_arm, lower_arm, wrist) + options.coupling.min(3);
        let score_c = table_c(score_a, score_b);
        let final_score = score_c + options.activity_score();

        let scores = BTreeMap::from([
            (BodySegment::Neck, neck),
            (BodySegment::Trunk, trunk),
            (BodySegment::Legs, legs),
            (BodySegment::UpperArm, upper_arm),
            (BodySegment::LowerArm, lower_arm),
            (BodySegment::Wrist, wrist),
        ]);
        let group_scores = BTreeMap::from([
            ("scoreA".to_string(), score_a as f64),
            ("scoreB".to_string(), score_b as f64),
            ("scoreC".to_string(), score_c as f64),
        ]);

        RiskAssessment {
            method: ScoringMethod::Reba,
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

    fn neutral() -> AngleMap {
        AngleMap::new()
            .with(AngleKey::Neck, 5.0)
            .with(AngleKey::Trunk, 0.0)
            .with(AngleKey::Leg, 0.0)
            .with(AngleKey::UpperArm, 10.0)
            .with(AngleKey::LowerArm, 80.0)
            .with(AngleKey::Wrist, 5.0)
    }

    #[test]
    fn test_neutral_posture_is_negligible() {
        let result = RebaScorer.score(&neutral(), &RebaOptions::default());
        assert_eq!(result.final_score, 1.0);
        assert_eq!(result.risk_level, RiskLevel::Negligible);
        assert!(result.defaulted.is_empty());
    }

    #[test]
    fn test_leg_flexion_bands() {
        assert_eq!(score_legs(true, false, 30.0), 1);
        assert_eq!(score_legs(true, false, 45.0), 2);
        assert_eq!(score_legs(true, false, 60.0), 3);
        assert_eq!(score_legs(false, true, 90.0), 4);
    }

    #[test]
    fn test_table_a_upright_trunk_row() {
        let expected = [[1, 2, 3, 4], [1, 2, 3, 4], [3, 3, 5, 6]];
        for (neck, row) in expected.iter().enumerate() {
            for (legs, score) in row.iter().enumerate() {
                assert_eq!(
                    table_a(1, neck as u8 + 1, legs as u8 + 1),
                    *score,
                    "neck {} legs {}",
                    neck + 1,
                    legs + 1
                );
            }
        }
        assert_eq!(table_a(2, 2, 1), 3);
        assert_eq!(table_a(5, 3, 4), 9);
    }

    #[test]
    fn test_table_b_uses_published_values() {
        assert_eq!(table_b(3, 1, 2), 4);
        assert_eq!(table_b(6, 2, 3), 9);
        assert_eq!(table_b(1, 2, 1), 1);
    }

    #[test]
    fn test_bent_posture_with_load() {
        let angles = AngleMap::new()
            .with(AngleKey::Neck, 30.0)
            .with(AngleKey::Trunk, 45.0)
            .with(AngleKey::Leg, 40.0)
            .with(AngleKey::UpperArm, 60.0)
            .with(AngleKey::LowerArm, 110.0)
            .with(AngleKey::Wrist, 20.0);
        let options = RebaOptions {
            load: 1,
            coupling: 1,
            repeated_action: true,
            ..RebaOptions::default()
        };
        let result = RebaScorer.score(&angles, &options);
        // trunk 3, neck 2, legs 2 -> A 5 + 1; upper 3, lower 2, wrist 2 -> B 5 + 1
        assert_eq!(result.group("scoreA"), Some(6.0));
        assert_eq!(result.group("scoreB"), Some(6.0));
        assert_eq!(result.group("scoreC"), Some(8.0));
        assert_eq!(result.final_score, 9.0);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_worst_case_is_very_high_and_bounded() {
        let angles = AngleMap::new()
            .with(AngleKey::Neck, 40.0)
            .with(AngleKey::Trunk, 80.0)
            .with(AngleKey::Leg, 90.0)
            .with(AngleKey::UpperArm, 120.0)
            .with(AngleKey::LowerArm, 10.0)
            .with(AngleKey::Wrist, 40.0);
        let options = RebaOptions {
            neck_twisted: true,
            trunk_twisted: true,
            walking: true,
            load: 2,
            arm_abducted: true,
            shoulder_raised: true,
            wrist_twisted: true,
            coupling: 3,
            static_posture: true,
            repeated_action: true,
            rapid_change: true,
            ..RebaOptions::default()
        };
        let result = RebaScorer.score(&angles, &options);
        assert_eq!(result.final_score, 15.0);
        assert_eq!(result.risk_level, RiskLevel::VeryHigh);
    }

    #[test]
    fn test_upper_arm_extension_scores_one() {
        assert_eq!(score_upper_arm(-30.0, false, false, false), 1);
        assert_eq!(score_upper_arm(95.0, true, false, true), 4);
    }
}
