//! Named joint angles measured for one frame from one view.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Joint-angle key, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AngleKey {
    Trunk,
    Neck,
    TrunkTwist,
    NeckTwist,
    UpperArm,
    LowerArm,
    Wrist,
    Leg,
    UpperArmLeft,
    UpperArmRight,
    LowerArmLeft,
    LowerArmRight,
    WristLeft,
    WristRight,
    LegLeft,
    LegRight,
}

impl AngleKey {
    pub const ALL: [AngleKey; 16] = [
        AngleKey::Trunk,
        AngleKey::Neck,
        AngleKey::TrunkTwist,
        AngleKey::NeckTwist,
        AngleKey::UpperArm,
        AngleKey::LowerArm,
        AngleKey::Wrist,
        AngleKey::Leg,
        AngleKey::UpperArmLeft,
        AngleKey::UpperArmRight,
        AngleKey::LowerArmLeft,
        AngleKey::LowerArmRight,
        AngleKey::WristLeft,
        AngleKey::WristRight,
        AngleKey::LegLeft,
        AngleKey::LegRight,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AngleKey::Trunk => "trunk",
            AngleKey::Neck => "neck",
            AngleKey::TrunkTwist => "trunkTwist",
            AngleKey::NeckTwist => "neckTwist",
            AngleKey::UpperArm => "upperArm",
            AngleKey::LowerArm => "lowerArm",
            AngleKey::Wrist => "wrist",
            AngleKey::Leg => "leg",
            AngleKey::UpperArmLeft => "upperArmLeft",
            AngleKey::UpperArmRight => "upperArmRight",
            AngleKey::LowerArmLeft => "lowerArmLeft",
            AngleKey::LowerArmRight => "lowerArmRight",
            AngleKey::WristLeft => "wristLeft",
            AngleKey::WristRight => "wristRight",
            AngleKey::LegLeft => "legLeft",
            AngleKey::LegRight => "legRight",
        }
    }

    /// Case-insensitive lookup by camelCase name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for AngleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mapping from angle key to degrees; an absent key is unknown (occluded or not measured)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AngleMap(BTreeMap<AngleKey, f64>);

impl AngleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: AngleKey, degrees: f64) -> Self {
        self.set(key, degrees);
        self
    }

    /// Non-finite values are dropped, leaving the key unknown
    pub fn set(&mut self, key: AngleKey, degrees: f64) {
        if degrees.is_finite() {
            self.0.insert(key, degrees);
        } else {
            self.0.remove(&key);
        }
    }

    pub fn set_opt(&mut self, key: AngleKey, degrees: Option<f64>) {
        if let Some(d) = degrees {
            self.set(key, d);
        }
    }

    pub fn get(&self, key: AngleKey) -> Option<f64> {
        self.0.get(&key).copied()
    }

    pub fn contains(&self, key: AngleKey) -> bool {
        self.0.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AngleKey, f64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// Mean absolute difference over keys present in both maps
    pub fn mean_abs_difference(&self, other: &AngleMap) -> Option<f64> {
        let diffs: Vec<f64> = self
            .iter()
            .filter_map(|(k, a)| other.get(k).map(|b| (a - b).abs()))
            .collect();
        if diffs.is_empty() {
            None
        } else {
            Some(diffs.iter().sum::<f64>() / diffs.len() as f64)
        }
    }
}

impl FromIterator<(AngleKey, f64)> for AngleMap {
    fn from_iter<I: IntoIterator<Item = (AngleKey, f64)>>(iter: I) -> Self {
        let mut map = AngleMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_values_are_unknown() {
        let mut map = AngleMap::new().with(AngleKey::Trunk, 12.0);
        map.set(AngleKey::Trunk, f64::NAN);
        map.set(AngleKey::Neck, f64::INFINITY);
        assert!(map.is_empty());
    }

    #[test]
    fn test_camel_case_serialization() {
        let map = AngleMap::new()
            .with(AngleKey::UpperArmLeft, 30.0)
            .with(AngleKey::TrunkTwist, 5.0);
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("\"upperArmLeft\":30.0"));
        let back: AngleMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_key_lookup_by_name() {
        assert_eq!(AngleKey::from_name("upperarm"), Some(AngleKey::UpperArm));
        assert_eq!(AngleKey::from_name("legRight"), Some(AngleKey::LegRight));
        assert_eq!(AngleKey::from_name("elbow"), None);
    }

    #[test]
    fn test_mean_abs_difference_uses_common_keys() {
        let a = AngleMap::new().with(AngleKey::Trunk, 10.0).with(AngleKey::Neck, 20.0);
        let b = AngleMap::new().with(AngleKey::Trunk, 16.0).with(AngleKey::Wrist, 3.0);
        assert_eq!(a.mean_abs_difference(&b), Some(6.0));
        assert_eq!(a.mean_abs_difference(&AngleMap::new()), None);
    }
}
