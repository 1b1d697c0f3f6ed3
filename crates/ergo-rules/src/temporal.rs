//! Temporal gating of raw rule results.
//!
//! ## Duration
//!
//! A rule with a [`DurationConfig`] only reports True once its condition has
//! held for `min_duration` seconds of accumulated true time, and reports
//! False once it has held for longer than `max_duration`.
//!
//! ## Frequency
//!
//! A rule with a [`FrequencyConfig`] reports True when at least `count` true
//! frames fall inside the trailing `window_seconds`.
//!
//! Duration runs first; frequency counts the duration stage's output.
//! Unknown passes through both stages; an unobserved gap adds no time to a
//! running timer.

use std::collections::VecDeque;

use ergo_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::truth::Truth;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationConfig {
    /// Seconds of accumulated true time before reporting True
    pub min_duration: f64,
    /// Seconds after which the rule times out and reports False
    #[serde(default)]
    pub max_duration: Option<f64>,
    /// Discard accumulated time on a False frame instead of pausing
    #[serde(default = "default_reset_on_false")]
    pub reset_on_false: bool,
}

fn default_reset_on_false() -> bool {
    true
}

impl DurationConfig {
    pub fn new(min_duration: f64) -> Self {
        Self {
            min_duration,
            max_duration: None,
            reset_on_false: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResetMode {
    /// Pure sliding window
    #[default]
    Sliding,
    /// Clear events each time the threshold is reached
    OnTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyConfig {
    pub count: u32,
    pub window_seconds: f64,
    #[serde(default)]
    pub reset_mode: ResetMode,
}

impl FrequencyConfig {
    pub fn new(count: u32, window_seconds: f64) -> Self {
        Self {
            count,
            window_seconds,
            reset_mode: ResetMode::Sliding,
        }
    }
}

/// Accumulated true time of one rule instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimerState {
    pub start_time: Option<Timestamp>,
    /// Seconds of true time accumulated so far
    pub elapsed: f64,
    pub is_active: bool,
    #[serde(skip)]
    last_update: Option<Timestamp>,
}

impl TimerState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn apply(&mut self, raw: Truth, now: Timestamp, config: &DurationConfig) -> Truth {
        match raw {
            Truth::Unknown => {
                // time spent unobserved never counts toward the duration
                if self.is_active {
                    self.last_update = Some(now);
                }
                Truth::Unknown
            }
            Truth::False => {
                if config.reset_on_false {
                    self.reset();
                } else {
                    self.is_active = false;
                }
                Truth::False
            }
            Truth::True => {
                if self.is_active {
                    if let Some(last) = self.last_update {
                        self.elapsed += now.secs_since(last).max(0.0);
                    }
                } else {
                    if self.start_time.is_none() {
                        self.start_time = Some(now);
                    }
                    self.is_active = true;
                }
                self.last_update = Some(now);

                match config.max_duration {
                    Some(max) if self.elapsed > max => Truth::False,
                    _ => Truth::from_bool(self.elapsed >= config.min_duration),
                }
            }
        }
    }
}

/// Event timestamps inside the frequency window, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrequencyCounter {
    pub events: VecDeque<Timestamp>,
}

impl FrequencyCounter {
    pub fn reset(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn prune(&mut self, now: Timestamp, window: f64) {
        while let Some(oldest) = self.events.front() {
            if now.secs_since(*oldest) > window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn apply(&mut self, input: Truth, now: Timestamp, config: &FrequencyConfig) -> Truth {
        if input.is_true() && self.events.back() != Some(&now) {
            self.events.push_back(now);
        }
        self.prune(now, config.window_seconds);

        if !input.is_true() {
            return input;
        }
        let reached = self.events.len() >= config.count as usize;
        if reached && config.reset_mode == ResetMode::OnTrigger {
            self.events.clear();
        }
        Truth::from_bool(reached)
    }
}

/// Timer and counter owned by one rule instance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemporalGate {
    pub timer: TimerState,
    pub counter: FrequencyCounter,
}

impl TemporalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.timer.reset();
        self.counter.reset();
    }

    pub fn apply(
        &mut self,
        raw: Truth,
        now: Timestamp,
        duration: Option<&DurationConfig>,
        frequency: Option<&FrequencyConfig>,
    ) -> Truth {
        let after_duration = match duration {
            Some(config) => self.timer.apply(raw, now, config),
            None => raw,
        };
        match frequency {
            Some(config) => self.counter.apply(after_duration, now, config),
            None => after_duration,
        }
    }
}
