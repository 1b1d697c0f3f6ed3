//! Skeletal keypoints and body-normalised pose comparison.
//!
//! Poses arrive in normalized image coordinates. Comparing two poses (for
//! pose matching or motion templates) first removes translation and scale:
//! the pose is centred on the mid-hip (or the nose when the hips are not
//! trusted) and divided by the mean root-to-shoulder distance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::ImagePoint;

/// Minimum keypoint confidence for a joint to take part in normalisation or comparison
pub const COMPARISON_CONFIDENCE: f64 = 0.3;

/// 17-joint skeletal keypoint definition (COCO format)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Keypoint {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl Keypoint {
    pub const COUNT: usize = 17;

    pub const ALL: [Keypoint; Keypoint::COUNT] = [
        Keypoint::Nose,
        Keypoint::LeftEye,
        Keypoint::RightEye,
        Keypoint::LeftEar,
        Keypoint::RightEar,
        Keypoint::LeftShoulder,
        Keypoint::RightShoulder,
        Keypoint::LeftElbow,
        Keypoint::RightElbow,
        Keypoint::LeftWrist,
        Keypoint::RightWrist,
        Keypoint::LeftHip,
        Keypoint::RightHip,
        Keypoint::LeftKnee,
        Keypoint::RightKnee,
        Keypoint::LeftAnkle,
        Keypoint::RightAnkle,
    ];

    pub fn from_index(idx: u8) -> Option<Self> {
        Self::ALL.get(idx as usize).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Keypoint::Nose => "nose",
            Keypoint::LeftEye => "left_eye",
            Keypoint::RightEye => "right_eye",
            Keypoint::LeftEar => "left_ear",
            Keypoint::RightEar => "right_ear",
            Keypoint::LeftShoulder => "left_shoulder",
            Keypoint::RightShoulder => "right_shoulder",
            Keypoint::LeftElbow => "left_elbow",
            Keypoint::RightElbow => "right_elbow",
            Keypoint::LeftWrist => "left_wrist",
            Keypoint::RightWrist => "right_wrist",
            Keypoint::LeftHip => "left_hip",
            Keypoint::RightHip => "right_hip",
            Keypoint::LeftKnee => "left_knee",
            Keypoint::RightKnee => "right_knee",
            Keypoint::LeftAnkle => "left_ankle",
            Keypoint::RightAnkle => "right_ankle",
        }
    }

    /// Parse a joint name; accepts `left_wrist`, `leftWrist` and `LEFT_WRIST`
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .iter()
            .copied()
            .find(|kp| kp.name().replace('_', "") == wanted)
    }
}

/// One detected keypoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseKeypoint {
    pub x: f64,
    pub y: f64,
    /// Detector confidence in `[0, 1]`
    #[serde(alias = "score")]
    pub confidence: f64,
    /// Extrapolated by a tracker rather than observed this frame
    #[serde(default)]
    pub predicted: bool,
}

impl PoseKeypoint {
    pub fn new(x: f64, y: f64, confidence: f64) -> Self {
        Self {
            x,
            y,
            confidence,
            predicted: false,
        }
    }

    pub fn point(&self) -> ImagePoint {
        ImagePoint::new(self.x, self.y)
    }
}

/// Skeletal pose of one operator in one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pose {
    pub keypoints: BTreeMap<Keypoint, PoseKeypoint>,
}

impl Pose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, keypoint: Keypoint, x: f64, y: f64, confidence: f64) -> Self {
        self.insert(keypoint, PoseKeypoint::new(x, y, confidence));
        self
    }

    /// Non-finite coordinates are treated as undetected and not stored
    pub fn insert(&mut self, keypoint: Keypoint, detection: PoseKeypoint) {
        if detection.x.is_finite() && detection.y.is_finite() && detection.confidence.is_finite() {
            self.keypoints.insert(keypoint, detection);
        }
    }

    pub fn get(&self, keypoint: Keypoint) -> Option<&PoseKeypoint> {
        self.keypoints.get(&keypoint)
    }

    /// Position of a joint that passes the confidence floor.
    ///
    /// Predicted keypoints count as missing unless `trust_predicted` is set.
    pub fn point(&self, keypoint: Keypoint, min_confidence: f64, trust_predicted: bool) -> Option<ImagePoint> {
        self.get(keypoint)
            .filter(|kp| kp.confidence >= min_confidence)
            .filter(|kp| trust_predicted || !kp.predicted)
            .map(PoseKeypoint::point)
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    fn trusted(&self, keypoint: Keypoint) -> Option<&PoseKeypoint> {
        self.get(keypoint)
            .filter(|kp| kp.confidence > COMPARISON_CONFIDENCE)
    }

    /// Root and scale used for body normalisation
    pub fn body_frame(&self) -> Option<BodyFrame> {
        let root = match (self.trusted(Keypoint::LeftHip), self.trusted(Keypoint::RightHip)) {
            (Some(l), Some(r)) => l.point().midpoint(&r.point()),
            _ => self.get(Keypoint::Nose)?.point(),
        };

        let scale = match (self.get(Keypoint::LeftShoulder), self.get(Keypoint::RightShoulder)) {
            (Some(l), Some(r)) => (l.point().distance_to(&root) + r.point().distance_to(&root)) / 2.0,
            _ => 1.0,
        };
        let scale = if scale > 0.0 && scale.is_finite() { scale } else { 1.0 };

        Some(BodyFrame { root, scale })
    }

    /// Body-normalised copy of the pose, or `None` when no root joint is available
    pub fn normalized(&self) -> Option<NormalizedPose> {
        let frame = self.body_frame()?;
        let keypoints = self
            .keypoints
            .iter()
            .map(|(kp, det)| {
                let p = frame.to_body(det.point());
                (*kp, PoseKeypoint { x: p.x, y: p.y, ..*det })
            })
            .collect();
        Some(NormalizedPose { keypoints })
    }

    /// Similarity score in `[0, 1]`, 1 meaning identical after normalisation
    pub fn similarity(&self, other: &Pose) -> f64 {
        match (self.normalized(), other.normalized()) {
            (Some(a), Some(b)) => a
                .mean_distance(&b)
                .map_or(0.0, |d| (1.0 - d * 2.0).max(0.0)),
            _ => 0.0,
        }
    }
}

/// Translation/scale reference of a body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyFrame {
    pub root: ImagePoint,
    pub scale: f64,
}

impl BodyFrame {
    pub fn to_body(&self, p: ImagePoint) -> ImagePoint {
        ImagePoint::new((p.x - self.root.x) / self.scale, (p.y - self.root.y) / self.scale)
    }
}

/// Pose expressed relative to its own body frame
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPose {
    pub keypoints: BTreeMap<Keypoint, PoseKeypoint>,
}

impl NormalizedPose {
    /// Mean distance over joints both poses report above the comparison confidence
    pub fn mean_distance(&self, other: &NormalizedPose) -> Option<f64> {
        let mut total = 0.0;
        let mut count = 0usize;
        for (kp, a) in &self.keypoints {
            let Some(b) = other.keypoints.get(kp) else {
                continue;
            };
            if a.confidence > COMPARISON_CONFIDENCE && b.confidence > COMPARISON_CONFIDENCE {
                total += a.point().distance_to(&b.point());
                count += 1;
            }
        }
        (count > 0).then(|| total / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upright(dx: f64, dy: f64, size: f64) -> Pose {
        Pose::new()
            .with(Keypoint::Nose, 0.5 * size + dx, 0.1 * size + dy, 0.9)
            .with(Keypoint::LeftShoulder, 0.4 * size + dx, 0.2 * size + dy, 0.9)
            .with(Keypoint::RightShoulder, 0.6 * size + dx, 0.2 * size + dy, 0.9)
            .with(Keypoint::LeftHip, 0.45 * size + dx, 0.5 * size + dy, 0.9)
            .with(Keypoint::RightHip, 0.55 * size + dx, 0.5 * size + dy, 0.9)
            .with(Keypoint::LeftWrist, 0.3 * size + dx, 0.45 * size + dy, 0.9)
    }

    #[test]
    fn test_keypoint_from_name_variants() {
        assert_eq!(Keypoint::from_name("left_wrist"), Some(Keypoint::LeftWrist));
        assert_eq!(Keypoint::from_name("leftWrist"), Some(Keypoint::LeftWrist));
        assert_eq!(Keypoint::from_name("NOSE"), Some(Keypoint::Nose));
        assert_eq!(Keypoint::from_name("tail"), None);
    }

    #[test]
    fn test_keypoint_index_roundtrip() {
        for i in 0..Keypoint::COUNT as u8 {
            let kp = Keypoint::from_index(i).unwrap();
            assert_eq!(kp as u8, i);
        }
        assert!(Keypoint::from_index(17).is_none());
    }

    #[test]
    fn test_similarity_ignores_translation_and_scale() {
        let a = upright(0.0, 0.0, 1.0);
        let b = upright(0.2, 0.1, 0.5);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_drops_for_different_pose() {
        let a = upright(0.0, 0.0, 1.0);
        let mut b = a.clone();
        b.insert(Keypoint::LeftWrist, PoseKeypoint::new(0.3, -0.2, 0.9));
        assert!(a.similarity(&b) < 0.9);
    }

    #[test]
    fn test_predicted_keypoint_is_missing_unless_trusted() {
        let mut pose = Pose::new();
        pose.insert(
            Keypoint::RightElbow,
            PoseKeypoint {
                x: 0.5,
                y: 0.5,
                confidence: 0.8,
                predicted: true,
            },
        );
        assert!(pose.point(Keypoint::RightElbow, 0.3, false).is_none());
        assert!(pose.point(Keypoint::RightElbow, 0.3, true).is_some());
        assert!(pose.point(Keypoint::RightElbow, 0.9, true).is_none());
    }

    #[test]
    fn test_root_falls_back_to_nose() {
        let pose = Pose::new()
            .with(Keypoint::Nose, 0.5, 0.2, 0.9)
            .with(Keypoint::LeftHip, 0.4, 0.6, 0.1);
        let frame = pose.body_frame().unwrap();
        assert_eq!(frame.root, ImagePoint::new(0.5, 0.2));
        assert_eq!(frame.scale, 1.0);
    }

    #[test]
    fn test_pose_deserializes_joint_map() {
        let json = r#"{"left_wrist":{"x":0.1,"y":0.2,"score":0.7}}"#;
        let pose: Pose = serde_json::from_str(json).unwrap();
        let kp = pose.get(Keypoint::LeftWrist).unwrap();
        assert_eq!(kp.confidence, 0.7);
        assert!(!kp.predicted);
    }
}
