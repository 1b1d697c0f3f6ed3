//! # Ergo-Runtime
//!
//! The per-frame [`Engine`]: fuses camera views, scores posture risk,
//! evaluates work-state rules and tracks the active state. One engine owns
//! all cross-frame state for one analysed session.
//!
//! ```no_run
//! use ergo_runtime::{Engine, EngineConfig, FrameInput};
//! use ergo_core::Timestamp;
//!
//! # fn run(definition_json: &str) -> ergo_core::Result<()> {
//! let mut engine = Engine::from_json(definition_json, EngineConfig::default())?;
//! let output = engine.process_frame(FrameInput::new(Timestamp::from_secs_f64(0.0)));
//! println!("{}", output.active_state);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;

pub use config::*;
pub use engine::*;
