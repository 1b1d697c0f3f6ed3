//! Work-state machine.
//!
//! ## Transitions
//!
//! Every frame the transitions leaving the active state are evaluated in
//! declaration order. A transition whose logic tree holds must keep holding
//! for `holdTime` seconds before it becomes eligible; the first eligible one
//! fires. On entry to a state, the hold timers and rule gates of the
//! transitions leaving it start from scratch.
//!
//! ## Timeline
//!
//! Each completed stay in a state becomes a [`StateInterval`]. Moves that skip
//! ahead in the declared state order, or fall back to a state other than the
//! first, are flagged. Cycles restart whenever the state order goes backwards.

use std::collections::{BTreeMap, BTreeSet};

use ergo_core::{Error, Pose, Rect, Result, RuleId, StateId, Timestamp, TransitionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::condition::ConditionRule;
use crate::context::FrameContext;
use crate::logic::{LogicNode, LogicTree};
use crate::rulebook::{Diagnostic, RuleBook, RuleStatus};
use crate::truth::Truth;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub id: StateId,
    pub name: String,
    #[serde(default)]
    pub roi: Option<Rect>,
    /// Pose that PoseMatch rules targeting this state compare against
    #[serde(default)]
    pub reference_pose: Option<Pose>,
    #[serde(default)]
    pub value_added: bool,
}

impl State {
    pub fn new(id: impl Into<StateId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roi: None,
            reference_pose: None,
            value_added: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: TransitionId,
    pub from: StateId,
    pub to: StateId,
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
    /// Implicit AND of `rules` when absent
    #[serde(default)]
    pub logic_tree: Option<LogicNode>,
    /// Seconds the logic must hold continuously before firing
    #[serde(default)]
    pub hold_time: f64,
}

impl Transition {
    pub fn new(id: impl Into<TransitionId>, from: impl Into<StateId>, to: impl Into<StateId>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            rules: Vec::new(),
            logic_tree: None,
            hold_time: 0.0,
        }
    }

    pub fn with_rule(mut self, rule: ConditionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_hold_time(mut self, seconds: f64) -> Self {
        self.hold_time = seconds;
        self
    }

    pub fn with_logic(mut self, tree: LogicNode) -> Self {
        self.logic_tree = Some(tree);
        self
    }

    pub fn tree(&self) -> LogicTree {
        match &self.logic_tree {
            Some(node) => LogicTree::from_node(node),
            None => LogicTree::implicit_and(self.rules.iter().map(|r| r.id.clone())),
        }
    }
}

/// States, transitions and the start state, as authored by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDefinition {
    pub start: StateId,
    pub states: Vec<State>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidTransitionGraph(message.into())
}

impl MachineDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn state(&self, id: &StateId) -> Option<&State> {
        self.states.iter().find(|s| &s.id == id)
    }

    /// Position of a state in declaration order
    pub fn state_index(&self, id: &StateId) -> Option<usize> {
        self.states.iter().position(|s| &s.id == id)
    }

    pub fn transitions_from<'a>(&'a self, id: &'a StateId) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions.iter().filter(move |t| &t.from == id)
    }

    pub fn reference_poses(&self) -> BTreeMap<StateId, Pose> {
        self.states
            .iter()
            .filter_map(|s| s.reference_pose.clone().map(|p| (s.id.clone(), p)))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let mut state_ids = BTreeSet::new();
        for state in &self.states {
            if !state_ids.insert(&state.id) {
                return Err(invalid(format!("duplicate state id '{}'", state.id)));
            }
        }
        if !state_ids.contains(&self.start) {
            return Err(invalid(format!("start state '{}' does not exist", self.start)));
        }

        let mut transition_ids = BTreeSet::new();
        for transition in &self.transitions {
            if !transition_ids.insert(&transition.id) {
                return Err(invalid(format!("duplicate transition id '{}'", transition.id)));
            }
            for end in [&transition.from, &transition.to] {
                if !state_ids.contains(end) {
                    return Err(invalid(format!(
                        "transition '{}' references missing state '{}'",
                        transition.id, end
                    )));
                }
            }
            if !(transition.hold_time.is_finite() && transition.hold_time >= 0.0) {
                return Err(invalid(format!(
                    "transition '{}' has an invalid hold time",
                    transition.id
                )));
            }

            let mut owned: BTreeSet<RuleId> = BTreeSet::new();
            for rule in &transition.rules {
                if !owned.insert(rule.id.clone()) {
                    return Err(invalid(format!(
                        "transition '{}' has duplicate rule id '{}'",
                        transition.id, rule.id
                    )));
                }
            }
            if let Some(node) = &transition.logic_tree {
                if let Some(foreign) = node.rule_ids().difference(&owned).next() {
                    return Err(invalid(format!(
                        "logic tree of transition '{}' references rule '{}' it does not own",
                        transition.id, foreign
                    )));
                }
                LogicTree::from_node(node)
                    .validate()
                    .map_err(|e| invalid(format!("transition '{}': {}", transition.id, e)))?;
            }
        }
        Ok(())
    }
}

/// Deviation of a state change from the declared state order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SequenceAnomaly {
    /// Jumped past the next declared state
    SequenceSkip,
    /// Fell back to an earlier state other than the first
    Regression,
}

impl SequenceAnomaly {
    pub fn classify(from_index: usize, to_index: usize) -> Option<Self> {
        if to_index > from_index + 1 {
            Some(SequenceAnomaly::SequenceSkip)
        } else if to_index < from_index && to_index != 0 {
            Some(SequenceAnomaly::Regression)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub from: StateId,
    pub to: StateId,
    pub at: Timestamp,
    pub transition_id: TransitionId,
    pub reason: String,
    /// Seconds the transition held before firing
    pub held_for: f64,
    pub anomaly: Option<SequenceAnomaly>,
}

/// One completed stay in a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateInterval {
    pub state: StateId,
    /// Declaration index of the state
    pub order: usize,
    pub start: Timestamp,
    pub end: Timestamp,
    pub value_added: bool,
    /// Anomaly of the change that ended this stay
    pub anomaly: Option<SequenceAnomaly>,
}

impl StateInterval {
    pub fn duration_secs(&self) -> f64 {
        self.end.secs_since(self.start).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub duration: f64,
    pub value_added: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub total_cycles: usize,
    /// Seconds
    pub mean_cycle_time: f64,
    pub mean_value_added_time: f64,
    /// Value-added share of all cycle time, `0..=1`
    pub value_added_ratio: f64,
    pub cycles: Vec<CycleSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    intervals: Vec<StateInterval>,
}

impl Timeline {
    pub fn push(&mut self, interval: StateInterval) {
        self.intervals.push(interval);
    }

    pub fn intervals(&self) -> &[StateInterval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &StateInterval> {
        self.intervals.iter().filter(|i| i.anomaly.is_some())
    }

    /// Group intervals into cycles, splitting wherever the state order goes
    /// backwards. The trailing partial cycle counts as a cycle.
    pub fn cycles(&self) -> Vec<&[StateInterval]> {
        let mut cycles = Vec::new();
        let mut start = 0;
        for (i, pair) in self.intervals.windows(2).enumerate() {
            if pair[1].order < pair[0].order {
                cycles.push(&self.intervals[start..=i]);
                start = i + 1;
            }
        }
        if start < self.intervals.len() {
            cycles.push(&self.intervals[start..]);
        }
        cycles
    }

    pub fn cycle_stats(&self) -> Option<CycleStats> {
        let cycles: Vec<CycleSummary> = self
            .cycles()
            .into_iter()
            .map(|cycle| CycleSummary {
                duration: cycle.iter().map(StateInterval::duration_secs).sum(),
                value_added: cycle
                    .iter()
                    .filter(|i| i.value_added)
                    .map(StateInterval::duration_secs)
                    .sum(),
            })
            .collect();
        if cycles.is_empty() {
            return None;
        }

        let total: f64 = cycles.iter().map(|c| c.duration).sum();
        let value_added: f64 = cycles.iter().map(|c| c.value_added).sum();
        let count = cycles.len() as f64;
        Some(CycleStats {
            total_cycles: cycles.len(),
            mean_cycle_time: total / count,
            mean_value_added_time: value_added / count,
            value_added_ratio: if total > 0.0 { value_added / total } else { 0.0 },
            cycles,
        })
    }
}

/// Result of advancing the machine by one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub statuses: Vec<RuleStatus>,
    pub diagnostics: Vec<Diagnostic>,
    pub change: Option<StateChange>,
}

#[derive(Debug)]
pub struct StateMachine {
    definition: MachineDefinition,
    trees: Vec<LogicTree>,
    active: StateId,
    entered_at: Option<Timestamp>,
    /// When each transition's logic started holding
    holding_since: BTreeMap<TransitionId, Timestamp>,
    rule_book: RuleBook,
    timeline: Timeline,
}

impl StateMachine {
    /// Build a machine; an invalid graph is rejected here, never at runtime
    pub fn new(definition: MachineDefinition) -> Result<Self> {
        definition.validate()?;
        let trees = definition.transitions.iter().map(Transition::tree).collect();
        let active = definition.start.clone();

        info!(
            "State machine ready: {} states, {} transitions, start '{}'",
            definition.states.len(),
            definition.transitions.len(),
            active
        );

        Ok(Self {
            definition,
            trees,
            active,
            entered_at: None,
            holding_since: BTreeMap::new(),
            rule_book: RuleBook::new(),
            timeline: Timeline::default(),
        })
    }

    pub fn definition(&self) -> &MachineDefinition {
        &self.definition
    }

    pub fn active_state(&self) -> &StateId {
        &self.active
    }

    pub fn active(&self) -> Option<&State> {
        self.definition.state(&self.active)
    }

    pub fn active_roi(&self) -> Option<Rect> {
        self.active().and_then(|s| s.roi)
    }

    pub fn entered_at(&self) -> Option<Timestamp> {
        self.entered_at
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn rule_book(&self) -> &RuleBook {
        &self.rule_book
    }

    /// Back to the start state with no timers, gates or history
    pub fn reset(&mut self) {
        self.active = self.definition.start.clone();
        self.entered_at = None;
        self.holding_since.clear();
        self.rule_book.reset();
        self.timeline.clear();
    }

    pub fn step(&mut self, ctx: &FrameContext<'_>) -> StepReport {
        let now = ctx.timestamp;
        self.entered_at.get_or_insert(now);

        let mut report = StepReport::default();
        let mut fired: Option<(&Transition, f64)> = None;

        for (transition, tree) in self.definition.transitions.iter().zip(&self.trees) {
            if transition.from != self.active {
                continue;
            }

            let evaluation = self.rule_book.evaluate(&transition.id, &transition.rules, ctx);
            let holds = tree.evaluate(|rule_id| evaluation.gated(rule_id));
            report.statuses.extend(evaluation.statuses);
            report.diagnostics.extend(evaluation.diagnostics);

            if !holds {
                self.holding_since.remove(&transition.id);
                continue;
            }

            let since = *self
                .holding_since
                .entry(transition.id.clone())
                .or_insert(now);
            let held = now.secs_since(since);
            if held >= transition.hold_time {
                if fired.is_none() {
                    fired = Some((transition, held));
                }
            } else {
                debug!(
                    "Transition {} holding {:.2}s of {:.2}s",
                    transition.id, held, transition.hold_time
                );
            }
        }

        if let Some((transition, held)) = fired {
            let reason = if transition.hold_time > 0.0 {
                format!("Rule triggered (held {held:.1}s)")
            } else {
                "Rule triggered".to_string()
            };
            let (transition_id, to) = (transition.id.clone(), transition.to.clone());
            report.change = Some(self.enter(to, transition_id, now, held, reason));
        }

        report
    }

    fn enter(
        &mut self,
        to: StateId,
        transition_id: TransitionId,
        now: Timestamp,
        held_for: f64,
        reason: String,
    ) -> StateChange {
        let from = self.active.clone();
        let from_index = self.definition.state_index(&from).unwrap_or(0);
        let to_index = self.definition.state_index(&to).unwrap_or(0);
        let anomaly = SequenceAnomaly::classify(from_index, to_index);

        self.timeline.push(StateInterval {
            state: from.clone(),
            order: from_index,
            start: self.entered_at.unwrap_or(now),
            end: now,
            value_added: self.active().is_some_and(|s| s.value_added),
            anomaly,
        });

        match anomaly {
            Some(kind) => warn!("Sequence anomaly {:?}: {} -> {}", kind, from, to),
            None => info!("State change {} -> {} ({})", from, to, reason),
        }

        self.active = to.clone();
        self.entered_at = Some(now);
        for transition in self.definition.transitions.iter().filter(|t| t.from == to) {
            self.holding_since.remove(&transition.id);
            self.rule_book.reset_transition(&transition.id);
        }

        StateChange {
            from,
            to,
            at: now,
            transition_id,
            reason,
            held_for,
            anomaly,
        }
    }
}

/// Truth of every rule in `statuses` for one transition, for display
pub fn transition_truths(statuses: &[RuleStatus], transition_id: &TransitionId) -> BTreeMap<RuleId, Truth> {
    statuses
        .iter()
        .filter(|s| &s.transition_id == transition_id)
        .map(|s| (s.rule_id.clone(), s.gated))
        .collect()
}
