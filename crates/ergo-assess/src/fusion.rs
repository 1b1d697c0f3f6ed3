//! Multi-view angle fusion.
//!
//! Each field is taken from the view that sees it best: flexion of the trunk
//! and neck from the side camera, twist from the front camera. Arms are
//! fused per side. A summary `upperArm` / `lowerArm` / `wrist` supplied by
//! either view is kept as is; a missing summary value is filled from the
//! arm with the larger deviation from neutral, never from the other arm.
//! `leg` follows the same rule with the larger of the two leg angles.

use ergo_core::{AngleKey, AngleMap};
use tracing::debug;

/// Which arm was retained as the summary arm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ArmTriple {
    upper: Option<f64>,
    lower: Option<f64>,
    wrist: Option<f64>,
}

impl ArmTriple {
    fn is_empty(&self) -> bool {
        self.upper.is_none() && self.lower.is_none() && self.wrist.is_none()
    }

    /// Deviation from neutral over the components that are present
    fn deviation(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(
            self.upper.unwrap_or(0.0)
                + self.lower.map_or(0.0, |l| (l - 90.0).abs())
                + self.wrist.unwrap_or(0.0),
        )
    }

    fn or(self, other: ArmTriple) -> ArmTriple {
        ArmTriple {
            upper: self.upper.or(other.upper),
            lower: self.lower.or(other.lower),
            wrist: self.wrist.or(other.wrist),
        }
    }
}

const SIDED_KEYS: [AngleKey; 8] = [
    AngleKey::UpperArmLeft,
    AngleKey::UpperArmRight,
    AngleKey::LowerArmLeft,
    AngleKey::LowerArmRight,
    AngleKey::WristLeft,
    AngleKey::WristRight,
    AngleKey::LegLeft,
    AngleKey::LegRight,
];

fn prefer(first: &AngleMap, second: &AngleMap, key: AngleKey) -> Option<f64> {
    first.get(key).or_else(|| second.get(key))
}

/// Pick the worse arm; ties keep the left arm
pub fn worse_arm(left: Option<f64>, right: Option<f64>) -> Option<ArmSide> {
    match (left, right) {
        (Some(l), Some(r)) => Some(if r > l { ArmSide::Right } else { ArmSide::Left }),
        (Some(_), None) => Some(ArmSide::Left),
        (None, Some(_)) => Some(ArmSide::Right),
        (None, None) => None,
    }
}

/// Merge a front and a side view into one canonical angle map.
///
/// A single supplied view is returned unchanged; no view yields an empty map.
pub fn fuse(front: Option<&AngleMap>, side: Option<&AngleMap>) -> AngleMap {
    let (front, side) = match (front, side) {
        (Some(f), Some(s)) => (f, s),
        (Some(only), None) | (None, Some(only)) => return only.clone(),
        (None, None) => return AngleMap::new(),
    };

    let mut fused = AngleMap::new();

    fused.set_opt(AngleKey::Trunk, prefer(side, front, AngleKey::Trunk));
    fused.set_opt(AngleKey::Neck, prefer(side, front, AngleKey::Neck));
    fused.set_opt(AngleKey::TrunkTwist, prefer(front, side, AngleKey::TrunkTwist));
    fused.set_opt(AngleKey::NeckTwist, prefer(front, side, AngleKey::NeckTwist));

    for key in SIDED_KEYS {
        fused.set_opt(key, prefer(side, front, key));
    }

    let left = ArmTriple {
        upper: fused.get(AngleKey::UpperArmLeft),
        lower: fused.get(AngleKey::LowerArmLeft),
        wrist: fused.get(AngleKey::WristLeft),
    };
    let right = ArmTriple {
        upper: fused.get(AngleKey::UpperArmRight),
        lower: fused.get(AngleKey::LowerArmRight),
        wrist: fused.get(AngleKey::WristRight),
    };
    let summary = ArmTriple {
        upper: prefer(side, front, AngleKey::UpperArm),
        lower: prefer(side, front, AngleKey::LowerArm),
        wrist: prefer(side, front, AngleKey::Wrist),
    };

    let arm = match worse_arm(left.deviation(), right.deviation()) {
        Some(ArmSide::Left) => summary.or(left),
        Some(ArmSide::Right) => summary.or(right),
        None => summary,
    };
    debug!(
        "Arm deviation left {:?}, right {:?}",
        left.deviation(),
        right.deviation()
    );
    fused.set_opt(AngleKey::UpperArm, arm.upper);
    fused.set_opt(AngleKey::LowerArm, arm.lower);
    fused.set_opt(AngleKey::Wrist, arm.wrist);

    let leg = prefer(side, front, AngleKey::Leg).or_else(|| {
        match (fused.get(AngleKey::LegLeft), fused.get(AngleKey::LegRight)) {
            (Some(l), Some(r)) => Some(l.max(r)),
            (Some(one), None) | (None, Some(one)) => Some(one),
            (None, None) => None,
        }
    });
    fused.set_opt(AngleKey::Leg, leg);

    fused
}
