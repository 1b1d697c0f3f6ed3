//! Engine configuration.

use ergo_assess::{LiftingTask, MissingInputPolicy, RebaOptions, RulaOptions, ScoringMethod};
use ergo_rules::{DEFAULT_BAND, DEFAULT_CAPACITY, DEFAULT_CONFIDENCE_FLOOR};
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides, e.g. `ERGO_TRACKING__CONFIDENCE_FLOOR`
pub const ENV_PREFIX: &str = "ERGO";

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Posture scoring
    pub scoring: ScoringConfig,

    /// Motion sequence buffering and matching
    pub sequence: SequenceConfig,

    /// Keypoint tracking
    pub tracking: TrackingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Methods scored every frame
    pub methods: Vec<ScoringMethod>,

    pub rula: RulaOptions,

    pub reba: RebaOptions,

    /// NIOSH runs only when a lifting task is configured
    pub lifting_task: Option<LiftingTask>,

    /// Whether assessments built from substituted angles are reported
    pub missing_input: MissingInputPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Ring buffer capacity (frames)
    pub buffer_capacity: usize,

    /// Sakoe-Chiba band as a fraction of the longer sequence
    pub dtw_band: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum keypoint confidence for a joint to count as detected
    pub confidence_floor: f64,

    /// Keypoint speeds above this (normalized units/s) are treated as tracking glitches
    pub max_keypoint_speed: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            methods: vec![ScoringMethod::Rula, ScoringMethod::Reba],
            rula: RulaOptions::default(),
            reba: RebaOptions::default(),
            lifting_task: None,
            missing_input: MissingInputPolicy::default(),
        }
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            dtw_band: DEFAULT_BAND,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            max_keypoint_speed: 10.0,
        }
    }
}

impl ScoringConfig {
    pub fn enabled(&self, method: ScoringMethod) -> bool {
        self.methods.contains(&method)
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.sequence.buffer_capacity, 1800);
        assert!((config.sequence.dtw_band - 0.2).abs() < 1e-12);
        assert!((config.tracking.confidence_floor - 0.3).abs() < 1e-12);
        assert!(config.scoring.enabled(ScoringMethod::Rula));
        assert!(!config.scoring.enabled(ScoringMethod::Niosh));
        assert_eq!(config.scoring.missing_input, MissingInputPolicy::Substitute);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ergo-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[scoring]\nmethods = [\"reba\", \"niosh\"]\nmissing_input = \"require\"\n\n[sequence]\nbuffer_capacity = 600\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.scoring.methods, vec![ScoringMethod::Reba, ScoringMethod::Niosh]);
        assert_eq!(config.scoring.missing_input, MissingInputPolicy::Require);
        assert_eq!(config.sequence.buffer_capacity, 600);
        assert!((config.sequence.dtw_band - 0.2).abs() < 1e-12);
        assert_eq!(config.tracking, TrackingConfig::default());
    }
}
