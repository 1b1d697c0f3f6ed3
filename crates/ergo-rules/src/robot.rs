//! Robot joint kinematics from raw telemetry.
//!
//! The host reports positions per joint and axis; velocity and acceleration
//! are finite differences across consecutive frames.

use std::collections::BTreeMap;

use ergo_core::{RobotAxis, RobotTelemetry, Timestamp};
use serde::{Deserialize, Serialize};

/// Which derivative of a robot axis a rule reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotMetric {
    #[default]
    Angle,
    Velocity,
    Acceleration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointMetrics {
    pub angle: BTreeMap<RobotAxis, f64>,
    pub velocity: BTreeMap<RobotAxis, f64>,
    pub acceleration: BTreeMap<RobotAxis, f64>,
}

impl JointMetrics {
    pub fn get(&self, metric: RobotMetric, axis: RobotAxis) -> Option<f64> {
        let values = match metric {
            RobotMetric::Angle => &self.angle,
            RobotMetric::Velocity => &self.velocity,
            RobotMetric::Acceleration => &self.acceleration,
        };
        values.get(&axis).copied()
    }
}

/// Per-joint metrics for one frame
pub type RobotMetrics = BTreeMap<String, JointMetrics>;

/// Tracks telemetry across frames to derive velocity and acceleration
#[derive(Debug, Clone, Default)]
pub struct RobotTracker {
    previous_time: Option<Timestamp>,
    previous_position: RobotTelemetry,
    previous_velocity: BTreeMap<String, BTreeMap<RobotAxis, f64>>,
}

impl RobotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update(&mut self, telemetry: &RobotTelemetry, timestamp: Timestamp) -> RobotMetrics {
        let dt = self
            .previous_time
            .map_or(0.0, |prev| timestamp.secs_since(prev));

        let mut metrics = RobotMetrics::new();
        for (joint, axes) in telemetry {
            let mut joint_metrics = JointMetrics::default();
            for (axis, value) in axes.iter().filter(|(_, v)| v.is_finite()) {
                joint_metrics.angle.insert(*axis, *value);

                if dt <= 0.0 {
                    continue;
                }
                let Some(prev) = self.previous_position.get(joint).and_then(|a| a.get(axis)) else {
                    continue;
                };
                let velocity = (value - prev) / dt;
                joint_metrics.velocity.insert(*axis, velocity);

                if let Some(prev_velocity) = self.previous_velocity.get(joint).and_then(|a| a.get(axis)) {
                    joint_metrics
                        .acceleration
                        .insert(*axis, (velocity - prev_velocity) / dt);
                }
            }
            metrics.insert(joint.clone(), joint_metrics);
        }

        self.previous_time = Some(timestamp);
        self.previous_position = telemetry.clone();
        self.previous_velocity = metrics
            .iter()
            .map(|(joint, m)| (joint.clone(), m.velocity.clone()))
            .collect();

        metrics
    }
}
