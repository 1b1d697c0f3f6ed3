//! Per-frame processing pipeline.
//!
//! ## Frame order
//!
//! 1. Fuse the front and side angle maps
//! 2. Score every enabled method and apply the missing-input policy
//! 3. Derive keypoint speeds and robot kinematics from the previous frame
//! 4. Buffer the frame for motion matching
//! 5. Evaluate rules and advance the state machine

use std::collections::BTreeMap;

use ergo_assess::{
    fuse, NioshScorer, PostureScorer, RebaScorer, RiskAssessment, RulaScorer, ScoringMethod,
};
use ergo_core::{
    AngleMap, Keypoint, Observation, Pose, Result, SessionId, StateId, Timestamp, ZoneMap,
};
use ergo_rules::{
    Diagnostic, DtwMatcher, FrameContext, FrameSnapshot, MachineDefinition, MotionTemplate,
    RobotTracker, RuleStatus, SequenceBuffer, StateChange, StateMachine, Timeline, Velocities,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

/// Everything the host supplies for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrameInput {
    pub timestamp: Timestamp,
    /// Angles measured from the front camera
    pub front: Option<AngleMap>,
    /// Angles measured from the side camera
    pub side: Option<AngleMap>,
    pub observation: Observation,
    pub zones: ZoneMap,
}

impl FrameInput {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    pub fn with_front(mut self, angles: AngleMap) -> Self {
        self.front = Some(angles);
        self
    }

    pub fn with_side(mut self, angles: AngleMap) -> Self {
        self.side = Some(angles);
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.observation.pose = Some(pose);
        self
    }
}

/// Result of one processed frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameOutput {
    pub session_id: SessionId,
    pub timestamp: Timestamp,
    /// Canonical angle map the scorers and rules saw
    pub angles: AngleMap,
    pub assessments: BTreeMap<ScoringMethod, RiskAssessment>,
    pub rule_statuses: Vec<RuleStatus>,
    pub diagnostics: Vec<Diagnostic>,
    pub active_state: StateId,
    pub state_change: Option<StateChange>,
    /// Frames currently held for motion matching
    pub buffered_frames: usize,
}

impl FrameOutput {
    pub fn assessment(&self, method: ScoringMethod) -> Option<&RiskAssessment> {
        self.assessments.get(&method)
    }
}

/// Owns every piece of state that persists across frames
#[derive(Debug)]
pub struct Engine {
    session_id: SessionId,
    config: EngineConfig,
    machine: StateMachine,
    reference_poses: BTreeMap<StateId, Pose>,
    sequence: SequenceBuffer,
    matcher: DtwMatcher,
    robot: RobotTracker,
    previous_pose: Option<(Timestamp, Pose)>,
    velocities: Velocities,
    frame_count: u64,
}

impl Engine {
    /// Build an engine. Graph errors are fatal; malformed rules are only reported.
    pub fn new(definition: MachineDefinition, config: EngineConfig) -> Result<Self> {
        for transition in &definition.transitions {
            for rule in &transition.rules {
                if let Err(e) = rule.validate() {
                    warn!("Transition {}: {}", transition.id, e);
                }
            }
        }

        let reference_poses = definition.reference_poses();
        let machine = StateMachine::new(definition)?;
        let session_id = SessionId::new();

        info!(
            "Engine {} started in state '{}' (methods: {:?})",
            session_id,
            machine.active_state(),
            config.scoring.methods
        );

        Ok(Self {
            session_id,
            sequence: SequenceBuffer::new(config.sequence.buffer_capacity),
            matcher: DtwMatcher::new(config.sequence.dtw_band),
            config,
            machine,
            reference_poses,
            robot: RobotTracker::new(),
            previous_pose: None,
            velocities: Velocities::new(),
            frame_count: 0,
        })
    }

    /// Build an engine from a JSON machine definition
    pub fn from_json(json: &str, config: EngineConfig) -> Result<Self> {
        Self::new(MachineDefinition::from_json(json)?, config)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn active_state(&self) -> &StateId {
        self.machine.active_state()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn timeline(&self) -> &Timeline {
        self.machine.timeline()
    }

    pub fn sequence(&self) -> &SequenceBuffer {
        &self.sequence
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Copy the buffered frames between two marks into a motion template
    pub fn capture_template(
        &self,
        name: impl Into<String>,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<MotionTemplate> {
        let template = self.sequence.capture(name, start, end)?;
        info!(
            "Captured template '{}' ({} frames, {:.2}s)",
            template.name,
            template.len(),
            template.duration_secs()
        );
        Ok(template)
    }

    /// Drop timers, counters, buffers and history; back to the start state
    pub fn reset(&mut self) {
        self.machine.reset();
        self.sequence.clear();
        self.robot.reset();
        self.previous_pose = None;
        self.velocities.clear();
        self.frame_count = 0;
        info!("Engine {} reset", self.session_id);
    }

    /// Run the full pipeline for one frame
    pub fn process_frame(&mut self, input: FrameInput) -> FrameOutput {
        let FrameInput {
            timestamp,
            front,
            side,
            observation,
            zones,
        } = input;
        self.frame_count += 1;

        let angles = fuse(front.as_ref(), side.as_ref());
        let assessments = self.score(&angles);

        self.update_velocities(timestamp, observation.pose.as_ref());
        let robot = self.robot.update(&observation.robot_joints, timestamp);

        self.sequence.push(FrameSnapshot::new(
            timestamp,
            angles.clone(),
            observation.pose.clone(),
        ));

        let ctx = FrameContext {
            timestamp,
            angles: &angles,
            observation: &observation,
            velocities: &self.velocities,
            robot: &robot,
            zones: &zones,
            state_roi: self.machine.active_roi(),
            reference_poses: &self.reference_poses,
            sequence: &self.sequence,
            matcher: self.matcher,
            confidence_floor: self.config.tracking.confidence_floor,
        };
        let report = self.machine.step(&ctx);

        debug!(
            "Frame {} at {:.3}s: {} rules, {} diagnostics, state '{}'",
            self.frame_count,
            timestamp.as_secs_f64(),
            report.statuses.len(),
            report.diagnostics.len(),
            self.machine.active_state()
        );

        FrameOutput {
            session_id: self.session_id,
            timestamp,
            angles,
            assessments,
            rule_statuses: report.statuses,
            diagnostics: report.diagnostics,
            active_state: self.machine.active_state().clone(),
            state_change: report.change,
            buffered_frames: self.sequence.len(),
        }
    }

    fn score(&self, angles: &AngleMap) -> BTreeMap<ScoringMethod, RiskAssessment> {
        let scoring = &self.config.scoring;
        let mut assessments = BTreeMap::new();

        for method in &scoring.methods {
            let assessment = match method {
                ScoringMethod::Rula => RulaScorer::new().score(angles, &scoring.rula),
                ScoringMethod::Reba => RebaScorer::new().score(angles, &scoring.reba),
                ScoringMethod::Niosh => match &scoring.lifting_task {
                    Some(task) => NioshScorer::new().score(angles, task),
                    None => continue,
                },
            };

            if scoring.missing_input.accepts(&assessment) {
                assessments.insert(*method, assessment);
            } else {
                debug!("{} dropped: missing {:?}", method, assessment.defaulted);
            }
        }

        assessments
    }

    /// Finite-difference keypoint speeds against the previous pose.
    /// A repeated timestamp keeps the last speeds.
    fn update_velocities(&mut self, timestamp: Timestamp, pose: Option<&Pose>) {
        let Some(pose) = pose else {
            self.previous_pose = None;
            self.velocities.clear();
            return;
        };

        let floor = self.config.tracking.confidence_floor;
        let max_speed = self.config.tracking.max_keypoint_speed;

        if let Some((prev_time, prev_pose)) = &self.previous_pose {
            let dt = timestamp.secs_since(*prev_time);
            if dt <= 0.0 {
                return;
            }

            self.velocities = Keypoint::ALL
                .iter()
                .filter_map(|&kp| {
                    let now = pose.point(kp, floor, true)?;
                    let before = prev_pose.point(kp, floor, true)?;
                    let speed = now.distance_to(&before) / dt;
                    (speed.is_finite() && speed <= max_speed).then_some((kp, speed))
                })
                .collect();
        }

        self.previous_pose = Some((timestamp, pose.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ergo_assess::MissingInputPolicy;
    use ergo_core::{AngleKey, RuleId};
    use ergo_rules::{
        Comparison, ConditionRule, RuleKind, ScriptRule, SequenceMatch, State, Transition, Truth,
        VelocityThreshold,
    };

    fn script(id: &str, source: &str) -> ConditionRule {
        ConditionRule::new(
            id,
            RuleKind::Script(ScriptRule::new(source)),
        )
    }

    fn bending_machine() -> MachineDefinition {
        MachineDefinition {
            start: StateId::new("upright"),
            states: vec![State::new("upright", "Upright"), State::new("bent", "Bent over")],
            transitions: vec![
                Transition::new("bend", "upright", "bent").with_rule(script("deep", "angles.trunk > 45")),
                Transition::new("rise", "bent", "upright").with_rule(script("tall", "angles.trunk < 20")),
            ],
        }
    }

    fn full_angles(trunk: f64) -> AngleMap {
        AngleMap::new()
            .with(AngleKey::UpperArm, 30.0)
            .with(AngleKey::LowerArm, 95.0)
            .with(AngleKey::Wrist, 10.0)
            .with(AngleKey::Neck, 5.0)
            .with(AngleKey::Trunk, trunk)
            .with(AngleKey::Leg, 0.0)
    }

    fn frame(secs: f64, trunk: f64) -> FrameInput {
        FrameInput::new(Timestamp::from_secs_f64(secs)).with_front(full_angles(trunk))
    }

    fn wrist_pose(x: f64) -> Pose {
        Pose::new()
            .with(Keypoint::LeftShoulder, 0.4, 0.3, 0.9)
            .with(Keypoint::RightShoulder, 0.6, 0.3, 0.9)
            .with(Keypoint::LeftHip, 0.45, 0.6, 0.9)
            .with(Keypoint::RightHip, 0.55, 0.6, 0.9)
            .with(Keypoint::RightWrist, x, 0.5, 0.9)
    }

    #[test]
    fn test_engine_follows_rules_through_states() {
        let mut engine = Engine::new(bending_machine(), EngineConfig::default()).unwrap();
        assert_eq!(engine.active_state(), &StateId::new("upright"));

        let out = engine.process_frame(frame(0.0, 10.0));
        assert!(out.state_change.is_none());
        assert_eq!(out.session_id, engine.session_id());

        let out = engine.process_frame(frame(1.0, 60.0));
        let change = out.state_change.unwrap();
        assert_eq!(change.to, StateId::new("bent"));
        assert_eq!(out.active_state, StateId::new("bent"));

        let out = engine.process_frame(frame(2.0, 10.0));
        assert_eq!(out.active_state, StateId::new("upright"));
        assert_eq!(engine.timeline().len(), 2);
        assert_eq!(engine.frame_count(), 3);
    }

    #[test]
    fn test_scores_enabled_methods() {
        let mut engine = Engine::new(bending_machine(), EngineConfig::default()).unwrap();
        let out = engine.process_frame(frame(0.0, 5.0));

        let rula = out.assessment(ScoringMethod::Rula).unwrap();
        assert!((1.0..=7.0).contains(&rula.final_score));
        let reba = out.assessment(ScoringMethod::Reba).unwrap();
        assert!((1.0..=15.0).contains(&reba.final_score));
        assert!(out.assessment(ScoringMethod::Niosh).is_none());
    }

    #[test]
    fn test_niosh_runs_with_lifting_task() {
        let mut config = EngineConfig::default();
        config.scoring.methods = vec![ScoringMethod::Niosh];
        config.scoring.lifting_task = Some(ergo_assess::LiftingTask {
            weight_kg: 20.0,
            asymmetry_deg: Some(0.0),
            ..Default::default()
        });
        let mut engine = Engine::new(bending_machine(), config).unwrap();

        let out = engine.process_frame(frame(0.0, 5.0));
        let niosh = out.assessment(ScoringMethod::Niosh).unwrap();
        assert!(niosh.final_score >= 0.0);
        assert_eq!(out.assessments.len(), 1);
    }

    #[test]
    fn test_require_policy_drops_partial_assessments() {
        let mut config = EngineConfig::default();
        config.scoring.missing_input = MissingInputPolicy::Require;
        let mut engine = Engine::new(bending_machine(), config).unwrap();

        let partial = FrameInput::new(Timestamp::from_secs_f64(0.0))
            .with_front(AngleMap::new().with(AngleKey::Trunk, 10.0));
        assert!(engine.process_frame(partial).assessments.is_empty());

        let out = engine.process_frame(frame(0.1, 10.0));
        assert!(out.assessment(ScoringMethod::Rula).is_some());
    }

    #[test]
    fn test_fuses_front_and_side_views() {
        let mut engine = Engine::new(bending_machine(), EngineConfig::default()).unwrap();
        let angles = full_angles(30.0);

        let input = FrameInput::new(Timestamp::from_secs_f64(0.0))
            .with_front(angles.clone())
            .with_side(angles.clone());
        let out = engine.process_frame(input);
        assert_eq!(out.angles.get(AngleKey::Trunk), Some(30.0));
    }

    #[test]
    fn test_velocity_from_consecutive_poses() {
        let speed = ConditionRule::new(
            "fast",
            RuleKind::Velocity(VelocityThreshold {
                joint: Keypoint::RightWrist,
                operator: Comparison::Gt,
                value: 0.5,
                value2: None,
                trust_predicted: true,
            }),
        );
        let definition = MachineDefinition {
            start: StateId::new("idle"),
            states: vec![State::new("idle", "Idle"), State::new("reach", "Reaching")],
            transitions: vec![Transition::new("go", "idle", "reach").with_rule(speed)],
        };
        let mut engine = Engine::new(definition, EngineConfig::default()).unwrap();

        let first = FrameInput::new(Timestamp::from_secs_f64(0.0)).with_pose(wrist_pose(0.6));
        let out = engine.process_frame(first);
        assert_eq!(out.rule_statuses[0].gated, Truth::Unknown);

        // 0.1 units in 0.1 s
        let second = FrameInput::new(Timestamp::from_secs_f64(0.1)).with_pose(wrist_pose(0.7));
        let out = engine.process_frame(second);
        let value = out.rule_statuses[0].value.unwrap();
        assert!((value - 1.0).abs() < 1e-6);
        assert_eq!(out.active_state, StateId::new("reach"));
    }

    #[test]
    fn test_malformed_rule_is_diagnosed_not_fatal() {
        let definition = MachineDefinition {
            start: StateId::new("a"),
            states: vec![State::new("a", "A"), State::new("b", "B")],
            transitions: vec![Transition::new("t", "a", "b").with_rule(script("broken", "angles.trunk >"))],
        };
        let mut engine = Engine::new(definition, EngineConfig::default()).unwrap();

        let out = engine.process_frame(frame(0.0, 50.0));
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].rule_id, RuleId::new("broken"));
        assert_eq!(out.active_state, StateId::new("a"));
    }

    #[test]
    fn test_invalid_graph_is_rejected() {
        let mut definition = bending_machine();
        definition.start = StateId::new("missing");
        assert!(Engine::new(definition, EngineConfig::default()).is_err());
    }

    #[test]
    fn test_capture_and_match_template() {
        let mut engine = Engine::new(bending_machine(), EngineConfig::default()).unwrap();
        for i in 0..10 {
            engine.process_frame(frame(i as f64 * 0.1, 20.0 + i as f64 * 3.0));
        }
        let template = engine
            .capture_template("bend", Timestamp::from_secs_f64(0.0), Timestamp::from_secs_f64(0.45))
            .unwrap();
        assert_eq!(template.len(), 5);
        assert!(engine
            .capture_template("none", Timestamp::from_secs_f64(5.0), Timestamp::from_secs_f64(6.0))
            .is_err());

        let rule = ConditionRule::new(
            "repeat",
            RuleKind::SequenceMatch(SequenceMatch {
                template,
                threshold: 0.1,
                window: None,
            }),
        );
        let definition = MachineDefinition {
            start: StateId::new("wait"),
            states: vec![State::new("wait", "Waiting"), State::new("done", "Done")],
            transitions: vec![Transition::new("m", "wait", "done").with_rule(rule)],
        };
        let mut matcher = Engine::new(definition, EngineConfig::default()).unwrap();
        for i in 0..5 {
            matcher.process_frame(frame(10.0 + i as f64 * 0.1, 20.0 + i as f64 * 3.0));
        }
        assert_eq!(matcher.active_state(), &StateId::new("done"));
    }

    #[test]
    fn test_reset_returns_to_start() {
        let mut engine = Engine::new(bending_machine(), EngineConfig::default()).unwrap();
        engine.process_frame(frame(0.0, 60.0));
        assert_eq!(engine.active_state(), &StateId::new("bent"));

        engine.reset();
        assert_eq!(engine.active_state(), &StateId::new("upright"));
        assert!(engine.timeline().is_empty());
        assert!(engine.sequence().is_empty());
        assert_eq!(engine.frame_count(), 0);
    }

    #[test]
    fn test_frame_output_json_shape() {
        let mut engine = Engine::new(bending_machine(), EngineConfig::default()).unwrap();
        let out = engine.process_frame(frame(0.0, 60.0));

        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["activeState"], "bent");
        assert_eq!(json["stateChange"]["transitionId"], "bend");
        assert!(json["assessments"]["rula"]["finalScore"].is_number());
        assert_eq!(json["ruleStatuses"][0]["ruleId"], "deep");
    }

    #[test]
    fn test_frame_input_from_json() {
        let input: FrameInput = serde_json::from_str(
            r#"{"timestamp": 1500000000, "front": {"trunk": 25.0}, "zones": {"bench": {"x": 0.1, "y": 0.1, "width": 0.3, "height": 0.3}}}"#,
        )
        .unwrap();
        assert_eq!(input.timestamp, Timestamp::from_secs_f64(1.5));
        assert_eq!(input.front.unwrap().get(AngleKey::Trunk), Some(25.0));
        assert!(input.side.is_none());
        assert!(input.zones.contains_key("bench"));
    }

    #[test]
    fn test_buffer_respects_configured_capacity() {
        let mut config = EngineConfig::default();
        config.sequence.buffer_capacity = 3;
        let mut engine = Engine::new(bending_machine(), config).unwrap();
        for i in 0..6 {
            engine.process_frame(frame(i as f64, 10.0));
        }
        assert_eq!(engine.sequence().len(), 3);
    }
}
