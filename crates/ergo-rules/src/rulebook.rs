//! Per-instance temporal state for every rule the machine evaluates.

use std::collections::BTreeMap;

use ergo_core::{RuleId, TransitionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::condition::ConditionRule;
use crate::context::FrameContext;
use crate::temporal::TemporalGate;
use crate::truth::Truth;

/// Live status of one rule for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatus {
    pub transition_id: TransitionId,
    pub rule_id: RuleId,
    /// Result before duration/frequency gating
    pub raw: Truth,
    pub gated: Truth,
    /// Measured scalar for display
    pub value: Option<f64>,
}

/// A rule that could not be evaluated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub transition_id: TransitionId,
    pub rule_id: RuleId,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleEvaluation {
    pub statuses: Vec<RuleStatus>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RuleEvaluation {
    pub fn gated(&self, rule_id: &RuleId) -> Truth {
        self.statuses
            .iter()
            .find(|s| &s.rule_id == rule_id)
            .map_or(Truth::Unknown, |s| s.gated)
    }
}

/// Temporal gates keyed by rule instance (transition, rule)
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    gates: BTreeMap<(TransitionId, RuleId), TemporalGate>,
}

impl RuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.gates.clear();
    }

    /// Drop the timers and counters of every rule owned by `transition_id`
    pub fn reset_transition(&mut self, transition_id: &TransitionId) {
        self.gates.retain(|(owner, _), _| owner != transition_id);
    }

    pub fn gate(&self, transition_id: &TransitionId, rule_id: &RuleId) -> Option<&TemporalGate> {
        self.gates.get(&(transition_id.clone(), rule_id.clone()))
    }

    /// Evaluate and gate the rules of one transition. Malformed rules read as
    /// Unknown and produce a diagnostic.
    pub fn evaluate(
        &mut self,
        transition_id: &TransitionId,
        rules: &[ConditionRule],
        ctx: &FrameContext<'_>,
    ) -> RuleEvaluation {
        let mut evaluation = RuleEvaluation::default();

        for rule in rules {
            let outcome = match rule.evaluate(ctx) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Rule {} on transition {} is malformed: {}", rule.id, transition_id, e);
                    evaluation.diagnostics.push(Diagnostic {
                        transition_id: transition_id.clone(),
                        rule_id: rule.id.clone(),
                        message: e.to_string(),
                    });
                    Default::default()
                }
            };

            let gate = self
                .gates
                .entry((transition_id.clone(), rule.id.clone()))
                .or_default();
            let gated = gate.apply(
                outcome.truth,
                ctx.timestamp,
                rule.duration_config.as_ref(),
                rule.frequency_config.as_ref(),
            );

            debug!(
                "Rule {} ({}) on {}: raw {:?}, gated {:?}",
                rule.id,
                rule.kind.name(),
                transition_id,
                outcome.truth,
                gated
            );

            evaluation.statuses.push(RuleStatus {
                transition_id: transition_id.clone(),
                rule_id: rule.id.clone(),
                raw: outcome.truth,
                gated,
                value: outcome.value,
            });
        }

        evaluation
    }
}
