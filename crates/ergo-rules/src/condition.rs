//! Atomic condition rules.
//!
//! A [`ConditionRule`] is one typed predicate over the current frame. Each
//! [`RuleKind`] computes a scalar where it can (angle, speed, distance,
//! confidence) and compares it with its threshold; required inputs that are
//! missing yield [`Truth::Unknown`], never False.
//!
//! Rules are data. In JSON a rule looks like
//!
//! ```json
//! {
//!   "id": "arm-raised",
//!   "kind": { "type": "angleThreshold",
//!             "params": { "source": { "metric": "upperArm" }, "operator": ">", "value": 90 } },
//!   "durationConfig": { "minDuration": 2.0 }
//! }
//! ```

use ergo_core::{
    joint_angle_deg, AngleKey, ClassifierOutput, Error, ImagePoint, Keypoint, Pose, Rect, Result,
    RobotAxis, RuleId, StateId,
};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::compare::Comparison;
use crate::context::FrameContext;
use crate::robot::RobotMetric;
use crate::script::Script;
use crate::sequence::MotionTemplate;
use crate::temporal::{DurationConfig, FrequencyConfig};
use crate::truth::{Outcome, Truth};

fn default_true() -> bool {
    true
}

fn default_lt() -> Comparison {
    Comparison::Lt
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRule {
    pub id: RuleId,
    pub kind: RuleKind,
    /// Invert the raw truth; Unknown stays Unknown
    #[serde(default)]
    pub invert: bool,
    #[serde(default)]
    pub duration_config: Option<DurationConfig>,
    #[serde(default)]
    pub frequency_config: Option<FrequencyConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "camelCase")]
pub enum RuleKind {
    AngleThreshold(AngleThreshold),
    Relation(Relation),
    Velocity(VelocityThreshold),
    ObjectProximity(ObjectProximity),
    ObjectInRoi(ObjectInRoi),
    OperatorProximity(OperatorProximity),
    PoseMatch(PoseMatch),
    ExternalClassifier(ExternalClassifier),
    RobotJointMetric(RobotJointMetric),
    SequenceMatch(SequenceMatch),
    Script(ScriptRule),
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::AngleThreshold(_) => "angleThreshold",
            RuleKind::Relation(_) => "relation",
            RuleKind::Velocity(_) => "velocity",
            RuleKind::ObjectProximity(_) => "objectProximity",
            RuleKind::ObjectInRoi(_) => "objectInRoi",
            RuleKind::OperatorProximity(_) => "operatorProximity",
            RuleKind::PoseMatch(_) => "poseMatch",
            RuleKind::ExternalClassifier(_) => "externalClassifier",
            RuleKind::RobotJointMetric(_) => "robotJointMetric",
            RuleKind::SequenceMatch(_) => "sequenceMatch",
            RuleKind::Script(_) => "script",
        }
    }
}

/// Where an angle threshold reads its angle from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AngleSource {
    /// Interior angle at `b` of the keypoints `a-b-c`
    Joints { a: Keypoint, b: Keypoint, c: Keypoint },
    /// A key of the fused angle map
    Metric(AngleKey),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AngleThreshold {
    pub source: AngleSource,
    pub operator: Comparison,
    pub value: f64,
    #[serde(default)]
    pub value2: Option<f64>,
    #[serde(default = "default_true")]
    pub trust_predicted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    X,
    Y,
}

impl Component {
    fn of(&self, p: ImagePoint) -> f64 {
        match self {
            Component::X => p.x,
            Component::Y => p.y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// Normalised image coordinates
    #[default]
    Screen,
    /// Relative to each pose's own root and scale
    Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointTarget {
    pub joint: Keypoint,
    /// Read the joint from another operator instead of the analysed one
    #[serde(default)]
    pub operator_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationTarget {
    Value(f64),
    Point(PointTarget),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub joint: Keypoint,
    pub component: Component,
    pub operator: Comparison,
    pub target: RelationTarget,
    #[serde(default)]
    pub value2: Option<f64>,
    #[serde(default)]
    pub coordinate_space: CoordinateSpace,
    #[serde(default = "default_true")]
    pub trust_predicted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VelocityThreshold {
    pub joint: Keypoint,
    pub operator: Comparison,
    /// Normalised units per second
    pub value: f64,
    #[serde(default)]
    pub value2: Option<f64>,
    #[serde(default = "default_true")]
    pub trust_predicted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectProximity {
    pub object_class: String,
    pub joint: Keypoint,
    #[serde(default = "default_lt")]
    pub operator: Comparison,
    /// Normalised distance from the joint to the detection centre
    pub distance: f64,
    #[serde(default = "default_true")]
    pub trust_predicted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoiRegion {
    /// ROI of the active state
    StateRoi,
    /// Named global zone
    Zone(String),
    Inline(Rect),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Containment {
    /// The bbox centre lies inside the region
    #[default]
    Center,
    /// The whole bbox lies inside the region
    Whole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInRoi {
    pub object_class: String,
    pub region: RoiRegion,
    #[serde(default)]
    pub containment: Containment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperatorTarget {
    Nearest,
    Any,
    Operator(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorProximity {
    pub joint: Keypoint,
    pub target: OperatorTarget,
    #[serde(default = "default_lt")]
    pub operator: Comparison,
    pub distance: f64,
    #[serde(default = "default_true")]
    pub trust_predicted: bool,
}

fn default_pose_threshold() -> f64 {
    0.8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseMatch {
    pub target_state: StateId,
    #[serde(default = "default_pose_threshold")]
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassifierSource {
    TeachableMachine,
    Roboflow,
    Cvat,
}

impl ClassifierSource {
    fn accepts(&self, output: &ClassifierOutput) -> bool {
        match self {
            ClassifierSource::TeachableMachine => matches!(output, ClassifierOutput::Label(_)),
            ClassifierSource::Roboflow | ClassifierSource::Cvat => {
                matches!(output, ClassifierOutput::Detections(_))
            }
        }
    }
}

fn default_classifier_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalClassifier {
    pub source: ClassifierSource,
    /// Model to read; any model of the source when absent
    #[serde(default)]
    pub model_id: Option<String>,
    pub target_class: String,
    #[serde(default = "default_classifier_threshold")]
    pub threshold: f64,
}

fn default_robot_axis() -> RobotAxis {
    RobotAxis::Angle
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotJointMetric {
    pub joint: String,
    #[serde(default = "default_robot_axis")]
    pub axis: RobotAxis,
    #[serde(default)]
    pub metric: RobotMetric,
    pub operator: Comparison,
    pub value: f64,
    #[serde(default)]
    pub value2: Option<f64>,
}

fn default_sequence_threshold() -> f64 {
    0.4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceMatch {
    pub template: MotionTemplate,
    /// Maximum normalised DTW distance that counts as a match
    #[serde(default = "default_sequence_threshold")]
    pub threshold: f64,
    /// Trailing window length; the template length when absent or shorter
    #[serde(default)]
    pub window: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptRule {
    source: String,
    /// Parsed on first use, then shared by every later frame
    #[serde(skip)]
    compiled: OnceLock<std::result::Result<Script, String>>,
}

impl ScriptRule {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            compiled: OnceLock::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed script, or the parse error message
    pub fn script(&self) -> std::result::Result<&Script, &str> {
        self.compiled
            .get_or_init(|| Script::parse(&self.source).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(String::as_str)
    }
}

impl PartialEq for ScriptRule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl ConditionRule {
    pub fn new(id: impl Into<RuleId>, kind: RuleKind) -> Self {
        Self {
            id: id.into(),
            kind,
            invert: false,
            duration_config: None,
            frequency_config: None,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    pub fn with_duration(mut self, config: DurationConfig) -> Self {
        self.duration_config = Some(config);
        self
    }

    pub fn with_frequency(mut self, config: FrequencyConfig) -> Self {
        self.frequency_config = Some(config);
        self
    }

    /// Check parameters that can be validated without a frame
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            RuleKind::Script(rule) => rule
                .script()
                .map(|_| ())
                .map_err(|message| Error::malformed(self.id.as_str(), message)),
            RuleKind::SequenceMatch(rule) if rule.template.is_empty() => {
                Err(Error::malformed(self.id.as_str(), "motion template is empty"))
            }
            RuleKind::AngleThreshold(AngleThreshold { operator, value2, .. })
            | RuleKind::Relation(Relation { operator, value2, .. })
            | RuleKind::Velocity(VelocityThreshold { operator, value2, .. })
            | RuleKind::RobotJointMetric(RobotJointMetric { operator, value2, .. })
                if *operator == Comparison::Between && value2.is_none() =>
            {
                Err(Error::malformed(self.id.as_str(), "BETWEEN needs value2"))
            }
            _ => Ok(()),
        }
    }

    /// Raw (ungated) result for one frame. `Err` means the rule itself is malformed.
    pub fn evaluate(&self, ctx: &FrameContext<'_>) -> Result<Outcome> {
        let outcome = match &self.kind {
            RuleKind::AngleThreshold(rule) => rule.evaluate(ctx),
            RuleKind::Relation(rule) => rule.evaluate(ctx),
            RuleKind::Velocity(rule) => rule.evaluate(ctx),
            RuleKind::ObjectProximity(rule) => rule.evaluate(ctx),
            RuleKind::ObjectInRoi(rule) => rule.evaluate(ctx),
            RuleKind::OperatorProximity(rule) => rule.evaluate(ctx),
            RuleKind::PoseMatch(rule) => rule
                .evaluate(ctx)
                .ok_or_else(|| {
                    Error::malformed(
                        self.id.as_str(),
                        format!("state '{}' has no reference pose", rule.target_state),
                    )
                })?,
            RuleKind::ExternalClassifier(rule) => rule.evaluate(ctx),
            RuleKind::RobotJointMetric(rule) => rule.evaluate(ctx),
            RuleKind::SequenceMatch(rule) => {
                if rule.template.is_empty() {
                    return Err(Error::malformed(self.id.as_str(), "motion template is empty"));
                }
                rule.evaluate(ctx)
            }
            RuleKind::Script(rule) => {
                let script = rule
                    .script()
                    .map_err(|message| Error::malformed(self.id.as_str(), message))?;
                let truth = script
                    .evaluate(ctx)
                    .map_err(|e| Error::malformed(self.id.as_str(), e.to_string()))?;
                Outcome::new(truth, None)
            }
        };

        Ok(Outcome {
            truth: outcome.truth.invert_if(self.invert),
            ..outcome
        })
    }
}

fn compare(value: f64, operator: Comparison, target: f64, upper: Option<f64>) -> Outcome {
    Outcome::measured(Truth::from_bool(operator.apply(value, target, upper)), value)
}

impl AngleThreshold {
    fn evaluate(&self, ctx: &FrameContext<'_>) -> Outcome {
        let angle = match self.source {
            AngleSource::Metric(key) => ctx.angles.get(key),
            AngleSource::Joints { a, b, c } => {
                let joint = |kp| ctx.joint(kp, self.trust_predicted);
                match (joint(a), joint(b), joint(c)) {
                    (Some(a), Some(b), Some(c)) => Some(joint_angle_deg(&a, &b, &c)),
                    _ => None,
                }
            }
        };
        angle.map_or_else(Outcome::unknown, |v| {
            compare(v, self.operator, self.value, self.value2)
        })
    }
}

fn in_space(pose: &Pose, point: ImagePoint, space: CoordinateSpace) -> Option<ImagePoint> {
    match space {
        CoordinateSpace::Screen => Some(point),
        CoordinateSpace::Body => pose.body_frame().map(|frame| frame.to_body(point)),
    }
}

impl Relation {
    fn evaluate(&self, ctx: &FrameContext<'_>) -> Outcome {
        let (Some(pose), Some(point)) = (ctx.pose(), ctx.joint(self.joint, self.trust_predicted)) else {
            return Outcome::unknown();
        };
        let Some(point) = in_space(pose, point, self.coordinate_space) else {
            return Outcome::unknown();
        };
        let value = self.component.of(point);

        let target = match &self.target {
            RelationTarget::Value(v) => Some(*v),
            RelationTarget::Point(target) => {
                let other = match &target.operator_id {
                    Some(id) => ctx.operator_pose(id),
                    None => Some(pose),
                };
                other.and_then(|other| {
                    let p = other.point(target.joint, ctx.confidence_floor, self.trust_predicted)?;
                    in_space(other, p, self.coordinate_space).map(|p| self.component.of(p))
                })
            }
        };

        target.map_or_else(Outcome::unknown, |t| {
            compare(value, self.operator, t, self.value2)
        })
    }
}

impl VelocityThreshold {
    fn evaluate(&self, ctx: &FrameContext<'_>) -> Outcome {
        if ctx.joint(self.joint, self.trust_predicted).is_none() {
            return Outcome::unknown();
        }
        ctx.velocities
            .get(&self.joint)
            .map_or_else(Outcome::unknown, |v| {
                compare(*v, self.operator, self.value, self.value2)
            })
    }
}

impl ObjectProximity {
    fn evaluate(&self, ctx: &FrameContext<'_>) -> Outcome {
        let Some(joint) = ctx.joint(self.joint, self.trust_predicted) else {
            return Outcome::unknown();
        };
        let distances: Vec<f64> = ctx
            .observation
            .detections
            .iter()
            .filter(|d| d.is_class(&self.object_class))
            .map(|d| joint.distance_to(&d.center()))
            .collect();
        let Some(nearest) = distances.iter().copied().reduce(f64::min) else {
            return Outcome::unknown();
        };
        let any = distances
            .iter()
            .any(|d| self.operator.apply(*d, self.distance, None));
        Outcome::measured(Truth::from_bool(any), nearest)
    }
}

impl ObjectInRoi {
    fn region(&self, ctx: &FrameContext<'_>) -> Option<Rect> {
        let rect = match &self.region {
            RoiRegion::StateRoi => ctx.state_roi?,
            RoiRegion::Zone(name) => *ctx.zones.get(name)?,
            RoiRegion::Inline(rect) => *rect,
        };
        (!rect.is_empty()).then_some(rect)
    }

    fn evaluate(&self, ctx: &FrameContext<'_>) -> Outcome {
        let Some(region) = self.region(ctx) else {
            return Outcome::unknown();
        };
        let mut seen = false;
        let mut inside = 0usize;
        for detection in ctx.observation.detections.iter().filter(|d| d.is_class(&self.object_class)) {
            seen = true;
            let contained = match self.containment {
                Containment::Center => region.contains(detection.center()),
                Containment::Whole => region.contains_rect(&detection.rect()),
            };
            if contained {
                inside += 1;
            }
        }
        if !seen {
            return Outcome::unknown();
        }
        Outcome::measured(Truth::from_bool(inside > 0), inside as f64)
    }
}

impl OperatorProximity {
    fn evaluate(&self, ctx: &FrameContext<'_>) -> Outcome {
        let Some(joint) = ctx.joint(self.joint, self.trust_predicted) else {
            return Outcome::unknown();
        };
        let distances: Vec<f64> = ctx
            .observation
            .other_operators
            .iter()
            .filter(|op| match &self.target {
                OperatorTarget::Operator(id) => &op.operator_id == id,
                OperatorTarget::Nearest | OperatorTarget::Any => true,
            })
            .filter_map(|op| op.pose.point(self.joint, ctx.confidence_floor, self.trust_predicted))
            .map(|p| joint.distance_to(&p))
            .collect();
        let Some(nearest) = distances.iter().copied().reduce(f64::min) else {
            return Outcome::unknown();
        };
        let met = match self.target {
            OperatorTarget::Any => distances
                .iter()
                .any(|d| self.operator.apply(*d, self.distance, None)),
            OperatorTarget::Nearest | OperatorTarget::Operator(_) => {
                self.operator.apply(nearest, self.distance, None)
            }
        };
        Outcome::measured(Truth::from_bool(met), nearest)
    }
}

impl PoseMatch {
    /// `None` when the target state has no reference pose
    fn evaluate(&self, ctx: &FrameContext<'_>) -> Option<Outcome> {
        let reference = ctx.reference_poses.get(&self.target_state)?;
        let Some(pose) = ctx.pose().filter(|p| !p.is_empty()) else {
            return Some(Outcome::unknown());
        };
        let similarity = pose.similarity(reference);
        Some(Outcome::measured(
            Truth::from_bool(similarity >= self.threshold),
            similarity,
        ))
    }
}

impl ExternalClassifier {
    fn evaluate(&self, ctx: &FrameContext<'_>) -> Outcome {
        let outputs: Vec<&ClassifierOutput> = ctx
            .observation
            .external
            .iter()
            .filter(|(id, _)| self.model_id.as_ref().map_or(true, |m| m == *id))
            .map(|(_, output)| output)
            .filter(|output| self.source.accepts(output))
            .collect();
        if outputs.is_empty() {
            return Outcome::unknown();
        }
        let confidence = outputs
            .iter()
            .filter_map(|o| o.confidence_for(&self.target_class))
            .fold(0.0, f64::max);
        Outcome::measured(Truth::from_bool(confidence >= self.threshold), confidence)
    }
}

impl RobotJointMetric {
    fn evaluate(&self, ctx: &FrameContext<'_>) -> Outcome {
        ctx.robot
            .get(&self.joint)
            .and_then(|m| m.get(self.metric, self.axis))
            .map_or_else(Outcome::unknown, |v| {
                compare(v, self.operator, self.value, self.value2)
            })
    }
}

impl SequenceMatch {
    fn evaluate(&self, ctx: &FrameContext<'_>) -> Outcome {
        let window = self
            .window
            .unwrap_or(self.template.len())
            .max(self.template.len());
        let Some(recent) = ctx.sequence.tail(window) else {
            return Outcome::unknown();
        };
        let result = ctx.matcher.compute(recent, &self.template.frames);
        Outcome::measured(
            Truth::from_bool(result.normalized <= self.threshold),
            result.normalized,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixture::Fixture;
    use crate::robot::JointMetrics;
    use crate::sequence::FrameSnapshot;
    use ergo_core::{
        AngleMap, Classification, Detection, OperatorPose, PoseKeypoint, Timestamp,
    };
    use std::collections::BTreeMap;

    fn worker() -> Pose {
        Pose::new()
            .with(Keypoint::Nose, 0.5, 0.1, 0.9)
            .with(Keypoint::LeftShoulder, 0.4, 0.3, 0.9)
            .with(Keypoint::RightShoulder, 0.6, 0.3, 0.9)
            .with(Keypoint::RightElbow, 0.6, 0.5, 0.9)
            .with(Keypoint::RightWrist, 0.8, 0.5, 0.9)
            .with(Keypoint::LeftHip, 0.45, 0.7, 0.9)
            .with(Keypoint::RightHip, 0.55, 0.7, 0.9)
    }

    fn eval(rule: &ConditionRule, fx: &Fixture) -> Outcome {
        rule.evaluate(&fx.context()).unwrap()
    }

    #[test]
    fn test_angle_threshold_from_joints_and_metric() {
        let mut fx = Fixture::with_pose(worker());
        fx.angles = AngleMap::new().with(AngleKey::UpperArm, 100.0);

        let joints = ConditionRule::new(
            "elbow",
            RuleKind::AngleThreshold(AngleThreshold {
                source: AngleSource::Joints {
                    a: Keypoint::RightShoulder,
                    b: Keypoint::RightElbow,
                    c: Keypoint::RightWrist,
                },
                operator: Comparison::Between,
                value: 80.0,
                value2: Some(100.0),
                trust_predicted: true,
            }),
        );
        let outcome = eval(&joints, &fx);
        assert_eq!(outcome.truth, Truth::True);
        assert!((outcome.value.unwrap() - 90.0).abs() < 1e-6);

        let metric = ConditionRule::new(
            "raised",
            RuleKind::AngleThreshold(AngleThreshold {
                source: AngleSource::Metric(AngleKey::UpperArm),
                operator: Comparison::Gt,
                value: 90.0,
                value2: None,
                trust_predicted: true,
            }),
        );
        assert_eq!(eval(&metric, &fx).truth, Truth::True);
        assert_eq!(eval(&metric.clone().inverted(), &fx).truth, Truth::False);

        fx.angles = AngleMap::new();
        assert_eq!(eval(&metric, &fx).truth, Truth::Unknown);
        assert_eq!(eval(&metric.inverted(), &fx).truth, Truth::Unknown);
    }

    #[test]
    fn test_predicted_joints_can_be_distrusted() {
        let mut pose = worker();
        pose.insert(
            Keypoint::RightWrist,
            PoseKeypoint {
                predicted: true,
                ..PoseKeypoint::new(0.8, 0.5, 0.9)
            },
        );
        let fx = Fixture::with_pose(pose);
        let rule = |trust_predicted| {
            ConditionRule::new(
                "wrist-right",
                RuleKind::Relation(Relation {
                    joint: Keypoint::RightWrist,
                    component: Component::X,
                    operator: Comparison::Gt,
                    target: RelationTarget::Value(0.7),
                    value2: None,
                    coordinate_space: CoordinateSpace::Screen,
                    trust_predicted,
                }),
            )
        };
        assert_eq!(eval(&rule(true), &fx).truth, Truth::True);
        assert_eq!(eval(&rule(false), &fx).truth, Truth::Unknown);
    }

    #[test]
    fn test_relation_against_other_joint() {
        let fx = Fixture::with_pose(worker());
        let rule = ConditionRule::new(
            "hand-below-shoulder",
            RuleKind::Relation(Relation {
                joint: Keypoint::RightWrist,
                component: Component::Y,
                operator: Comparison::Gt,
                target: RelationTarget::Point(PointTarget {
                    joint: Keypoint::RightShoulder,
                    operator_id: None,
                }),
                value2: None,
                coordinate_space: CoordinateSpace::Body,
                trust_predicted: true,
            }),
        );
        assert_eq!(eval(&rule, &fx).truth, Truth::True);
    }

    #[test]
    fn test_velocity_needs_measurement() {
        let mut fx = Fixture::with_pose(worker());
        let rule = ConditionRule::new(
            "fast-hand",
            RuleKind::Velocity(VelocityThreshold {
                joint: Keypoint::RightWrist,
                operator: Comparison::Gt,
                value: 0.5,
                value2: None,
                trust_predicted: true,
            }),
        );
        assert_eq!(eval(&rule, &fx).truth, Truth::Unknown);
        fx.velocities.insert(Keypoint::RightWrist, 0.8);
        assert_eq!(eval(&rule, &fx), Outcome::measured(Truth::True, 0.8));
    }

    #[test]
    fn test_object_proximity_uses_nearest_detection() {
        let mut fx = Fixture::with_pose(worker());
        let rule = ConditionRule::new(
            "holding-drill",
            RuleKind::ObjectProximity(ObjectProximity {
                object_class: "drill".to_string(),
                joint: Keypoint::RightWrist,
                operator: Comparison::Lt,
                distance: 0.1,
                trust_predicted: true,
            }),
        );
        assert_eq!(eval(&rule, &fx).truth, Truth::Unknown);

        fx.observation.detections = vec![
            Detection::new("Drill", [0.1, 0.1, 0.1, 0.1], 0.9),
            Detection::new("drill", [0.75, 0.45, 0.1, 0.1], 0.9),
        ];
        let outcome = eval(&rule, &fx);
        assert_eq!(outcome.truth, Truth::True);
        assert!(outcome.value.unwrap() < 1e-9);
    }

    #[test]
    fn test_object_in_roi_regions() {
        let mut fx = Fixture::default();
        fx.observation.detections = vec![Detection::new("box", [0.25, 0.25, 0.1, 0.1], 0.8)];
        fx.zones.insert("bench".to_string(), Rect::new(0.2, 0.2, 0.2, 0.2));

        let rule = |region, containment| {
            ConditionRule::new(
                "box-on-bench",
                RuleKind::ObjectInRoi(ObjectInRoi {
                    object_class: "box".to_string(),
                    region,
                    containment,
                }),
            )
        };
        let zone = rule(RoiRegion::Zone("bench".to_string()), Containment::Whole);
        assert_eq!(eval(&zone, &fx), Outcome::measured(Truth::True, 1.0));

        let inline = rule(RoiRegion::Inline(Rect::new(0.5, 0.5, 0.3, 0.3)), Containment::Center);
        assert_eq!(eval(&inline, &fx).truth, Truth::False);

        let missing = rule(RoiRegion::Zone("shelf".to_string()), Containment::Center);
        assert_eq!(eval(&missing, &fx).truth, Truth::Unknown);
        assert_eq!(eval(&rule(RoiRegion::StateRoi, Containment::Center), &fx).truth, Truth::Unknown);

        fx.observation.detections.clear();
        assert_eq!(eval(&zone, &fx).truth, Truth::Unknown);
    }

    #[test]
    fn test_operator_proximity_targets() {
        let mut fx = Fixture::with_pose(worker());
        fx.observation.other_operators = vec![
            OperatorPose {
                operator_id: "op-2".to_string(),
                pose: Pose::new().with(Keypoint::RightWrist, 0.85, 0.5, 0.9),
            },
            OperatorPose {
                operator_id: "op-3".to_string(),
                pose: Pose::new().with(Keypoint::RightWrist, 0.2, 0.5, 0.9),
            },
        ];
        let rule = |target| {
            ConditionRule::new(
                "handover",
                RuleKind::OperatorProximity(OperatorProximity {
                    joint: Keypoint::RightWrist,
                    target,
                    operator: Comparison::Lt,
                    distance: 0.1,
                    trust_predicted: true,
                }),
            )
        };
        assert_eq!(eval(&rule(OperatorTarget::Nearest), &fx).truth, Truth::True);
        assert_eq!(eval(&rule(OperatorTarget::Any), &fx).truth, Truth::True);
        assert_eq!(
            eval(&rule(OperatorTarget::Operator("op-3".to_string())), &fx).truth,
            Truth::False
        );
        assert_eq!(
            eval(&rule(OperatorTarget::Operator("op-9".to_string())), &fx).truth,
            Truth::Unknown
        );
    }

    #[test]
    fn test_pose_match_against_reference() {
        let mut fx = Fixture::with_pose(worker());
        let rule = ConditionRule::new(
            "at-station",
            RuleKind::PoseMatch(PoseMatch {
                target_state: StateId::new("assemble"),
                threshold: 0.8,
            }),
        );
        assert!(matches!(rule.evaluate(&fx.context()), Err(Error::MalformedRule { .. })));

        fx.reference_poses.insert(StateId::new("assemble"), worker());
        let outcome = eval(&rule, &fx);
        assert_eq!(outcome.truth, Truth::True);
        assert!((outcome.value.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_external_classifier_sources() {
        let mut fx = Fixture::default();
        let rule = |source, model_id: Option<&str>| {
            ConditionRule::new(
                "screwing",
                RuleKind::ExternalClassifier(ExternalClassifier {
                    source,
                    model_id: model_id.map(str::to_string),
                    target_class: "screwing".to_string(),
                    threshold: 0.6,
                }),
            )
        };
        let tm = rule(ClassifierSource::TeachableMachine, None);
        assert_eq!(eval(&tm, &fx).truth, Truth::Unknown);

        fx.observation.external = BTreeMap::from([
            (
                "station".to_string(),
                ClassifierOutput::Label(Classification {
                    class_name: "Screwing".to_string(),
                    probability: 0.7,
                }),
            ),
            (
                "tools".to_string(),
                ClassifierOutput::Detections(vec![Detection::new("screwing", [0.0, 0.0, 0.1, 0.1], 0.4)]),
            ),
        ]);
        assert_eq!(eval(&tm, &fx), Outcome::measured(Truth::True, 0.7));
        assert_eq!(
            eval(&rule(ClassifierSource::Roboflow, Some("tools")), &fx),
            Outcome::measured(Truth::False, 0.4)
        );
        assert_eq!(
            eval(&rule(ClassifierSource::Cvat, Some("station")), &fx).truth,
            Truth::Unknown
        );
    }

    #[test]
    fn test_robot_joint_metric() {
        let mut fx = Fixture::default();
        let rule = ConditionRule::new(
            "arm-moving",
            RuleKind::RobotJointMetric(RobotJointMetric {
                joint: "J1".to_string(),
                axis: RobotAxis::Angle,
                metric: RobotMetric::Velocity,
                operator: Comparison::Gt,
                value: 5.0,
                value2: None,
            }),
        );
        assert_eq!(eval(&rule, &fx).truth, Truth::Unknown);
        let mut metrics = JointMetrics::default();
        metrics.velocity.insert(RobotAxis::Angle, 12.0);
        fx.robot.insert("J1".to_string(), metrics);
        assert_eq!(eval(&rule, &fx), Outcome::measured(Truth::True, 12.0));
    }

    #[test]
    fn test_sequence_window_never_shorter_than_template() {
        let snapshot = |t: f64, trunk: f64| {
            FrameSnapshot::new(
                Timestamp::from_secs_f64(t),
                AngleMap::new().with(AngleKey::Trunk, trunk),
                None,
            )
        };
        let template = MotionTemplate {
            name: "bend".to_string(),
            frames: (0..4).map(|i| snapshot(i as f64, i as f64 * 20.0)).collect(),
        };
        let rule = ConditionRule::new(
            "bend",
            RuleKind::SequenceMatch(SequenceMatch {
                template: template.clone(),
                threshold: 0.5,
                window: Some(1),
            }),
        );

        let mut fx = Fixture::default();
        fx.sequence.push(snapshot(0.0, 40.0));
        fx.sequence.push(snapshot(1.0, 60.0));
        assert_eq!(eval(&rule, &fx).truth, Truth::Unknown);

        for frame in &template.frames {
            fx.sequence.push(frame.clone());
        }
        let outcome = eval(&rule, &fx);
        assert_eq!(outcome.truth, Truth::True);
        assert_eq!(outcome.value, Some(0.0));
    }

    #[test]
    fn test_sequence_match_waits_for_buffer() {
        let snapshot = |t: f64, trunk: f64| {
            FrameSnapshot::new(
                Timestamp::from_secs_f64(t),
                AngleMap::new().with(AngleKey::Trunk, trunk),
                None,
            )
        };
        let template = MotionTemplate {
            name: "bend".to_string(),
            frames: (0..4).map(|i| snapshot(i as f64, i as f64 * 20.0)).collect(),
        };
        let rule = ConditionRule::new(
            "bend",
            RuleKind::SequenceMatch(SequenceMatch {
                template: template.clone(),
                threshold: 0.1,
                window: None,
            }),
        );

        let mut fx = Fixture::default();
        fx.sequence.push(snapshot(0.0, 0.0));
        assert_eq!(eval(&rule, &fx).truth, Truth::Unknown);

        for frame in &template.frames {
            fx.sequence.push(frame.clone());
        }
        let outcome = eval(&rule, &fx);
        assert_eq!(outcome.truth, Truth::True);
        assert_eq!(outcome.value, Some(0.0));

        let empty = ConditionRule::new(
            "empty",
            RuleKind::SequenceMatch(SequenceMatch {
                template: MotionTemplate {
                    name: "none".to_string(),
                    frames: Vec::new(),
                },
                threshold: 0.1,
                window: None,
            }),
        );
        assert!(empty.validate().is_err());
        assert!(empty.evaluate(&fx.context()).is_err());
    }

    #[test]
    fn test_script_rule_errors_are_malformed() {
        let fx = Fixture::with_pose(worker());
        let good = ConditionRule::new(
            "script",
            RuleKind::Script(ScriptRule::new("right_wrist.y > nose.y")),
        );
        assert_eq!(eval(&good, &fx).truth, Truth::True);

        let bad = ConditionRule::new(
            "broken",
            RuleKind::Script(ScriptRule::new("right_wrist.y >")),
        );
        assert!(bad.validate().is_err());
        match bad.evaluate(&fx.context()) {
            Err(Error::MalformedRule { rule_id, .. }) => assert_eq!(rule_id, "broken"),
            other => panic!("expected malformed rule, got {other:?}"),
        }
    }

    #[test]
    fn test_script_is_parsed_once() {
        let fx = Fixture::with_pose(worker());
        let rule = ConditionRule::new("script", RuleKind::Script(ScriptRule::new("nose.y < 0.5")));
        let RuleKind::Script(script_rule) = &rule.kind else {
            unreachable!()
        };
        assert!(rule.validate().is_ok());
        let first = script_rule.script().unwrap() as *const Script;
        for _ in 0..3 {
            assert_eq!(eval(&rule, &fx).truth, Truth::True);
        }
        assert!(std::ptr::eq(first, script_rule.script().unwrap()));

        let restored: ConditionRule =
            serde_json::from_str(&serde_json::to_string(&rule).unwrap()).unwrap();
        assert_eq!(restored, rule);
        assert_eq!(eval(&restored, &fx).truth, Truth::True);
    }

    #[test]
    fn test_rule_json_shape() {
        let json = r#"{
            "id": "arm-raised",
            "kind": {
                "type": "angleThreshold",
                "params": { "source": { "metric": "upperArm" }, "operator": ">", "value": 90 }
            },
            "durationConfig": { "minDuration": 2.0 }
        }"#;
        let rule: ConditionRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.id, RuleId::new("arm-raised"));
        assert_eq!(rule.kind.name(), "angleThreshold");
        assert!(!rule.invert);
        assert_eq!(rule.duration_config.unwrap().min_duration, 2.0);
        assert!(rule.validate().is_ok());

        let between = r#"{"id":"x","kind":{"type":"velocity","params":{"joint":"left_wrist","operator":"BETWEEN","value":1}}}"#;
        let rule: ConditionRule = serde_json::from_str(between).unwrap();
        assert!(rule.validate().is_err());
    }
}
