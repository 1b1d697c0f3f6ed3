//! Everything a rule may read for the current frame.

use std::collections::BTreeMap;

use ergo_core::{
    AngleMap, ImagePoint, Keypoint, Observation, Pose, PoseKeypoint, Rect, StateId, Timestamp,
    ZoneMap,
};

use crate::robot::RobotMetrics;
use crate::sequence::{DtwMatcher, SequenceBuffer};

/// Default minimum keypoint confidence for a joint to count as detected
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.3;

/// Per-keypoint speed in normalized units per second
pub type Velocities = BTreeMap<Keypoint, f64>;

/// Borrowed view of one frame and the engine state rules depend on
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub timestamp: Timestamp,
    /// Fused angle map
    pub angles: &'a AngleMap,
    pub observation: &'a Observation,
    pub velocities: &'a Velocities,
    pub robot: &'a RobotMetrics,
    pub zones: &'a ZoneMap,
    /// ROI of the currently active state
    pub state_roi: Option<Rect>,
    /// Reference poses of states, for pose matching
    pub reference_poses: &'a BTreeMap<StateId, Pose>,
    pub sequence: &'a SequenceBuffer,
    pub matcher: DtwMatcher,
    pub confidence_floor: f64,
}

impl<'a> FrameContext<'a> {
    pub fn pose(&self) -> Option<&'a Pose> {
        self.observation.pose.as_ref()
    }

    pub fn keypoint(&self, keypoint: Keypoint) -> Option<&'a PoseKeypoint> {
        self.pose()?
            .get(keypoint)
            .filter(|kp| kp.confidence >= self.confidence_floor)
    }

    /// Joint position of the analysed operator, honouring the confidence floor
    pub fn joint(&self, keypoint: Keypoint, trust_predicted: bool) -> Option<ImagePoint> {
        self.pose()?
            .point(keypoint, self.confidence_floor, trust_predicted)
    }

    pub fn operator_pose(&self, operator_id: &str) -> Option<&'a Pose> {
        self.observation
            .other_operators
            .iter()
            .find(|op| op.operator_id == operator_id)
            .map(|op| &op.pose)
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;

    /// Owned frame data that lends out a [`FrameContext`]
    #[derive(Debug, Default)]
    pub(crate) struct Fixture {
        pub timestamp: Timestamp,
        pub angles: AngleMap,
        pub observation: Observation,
        pub velocities: Velocities,
        pub robot: RobotMetrics,
        pub zones: ZoneMap,
        pub state_roi: Option<Rect>,
        pub reference_poses: BTreeMap<StateId, Pose>,
        pub sequence: SequenceBuffer,
    }

    impl Fixture {
        pub(crate) fn with_pose(pose: Pose) -> Self {
            Self {
                observation: Observation {
                    pose: Some(pose),
                    ..Observation::default()
                },
                ..Self::default()
            }
        }

        pub(crate) fn context(&self) -> FrameContext<'_> {
            FrameContext {
                timestamp: self.timestamp,
                angles: &self.angles,
                observation: &self.observation,
                velocities: &self.velocities,
                robot: &self.robot,
                zones: &self.zones,
                state_roi: self.state_roi,
                reference_poses: &self.reference_poses,
                sequence: &self.sequence,
                matcher: DtwMatcher::default(),
                confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            }
        }
    }

    #[test]
    fn test_joint_respects_confidence_floor() {
        let pose = Pose::new()
            .with(Keypoint::LeftWrist, 0.2, 0.3, 0.9)
            .with(Keypoint::RightWrist, 0.8, 0.3, 0.1);
        let fixture = Fixture::with_pose(pose);
        let ctx = fixture.context();
        assert_eq!(ctx.joint(Keypoint::LeftWrist, true), Some(ImagePoint::new(0.2, 0.3)));
        assert!(ctx.joint(Keypoint::RightWrist, true).is_none());
        assert!(ctx.keypoint(Keypoint::RightWrist).is_none());
    }
}
