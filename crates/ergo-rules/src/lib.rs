//! # Ergo-Rules
//!
//! Rule evaluation and work-state tracking.
//!
//! ## Pipeline
//!
//! 1. [`ConditionRule`] evaluates one typed predicate against a [`FrameContext`]
//!    into a three-valued [`Truth`]
//! 2. [`TemporalGate`] applies duration and frequency requirements per rule instance
//! 3. [`LogicTree`] combines the gated results of a transition
//! 4. [`StateMachine`] applies hold times and moves between states
//!
//! Motion templates are matched against the live [`SequenceBuffer`] with
//! [`DtwMatcher`]; robot telemetry becomes per-joint kinematics in [`RobotTracker`].

pub mod compare;
pub mod condition;
pub mod context;
pub mod logic;
pub mod machine;
pub mod robot;
pub mod rulebook;
pub mod script;
pub mod sequence;
pub mod temporal;
pub mod truth;

pub use compare::*;
pub use condition::*;
pub use context::*;
pub use logic::*;
pub use machine::*;
pub use robot::*;
pub use rulebook::*;
pub use script::{Script, Value};
pub use sequence::*;
pub use temporal::*;
pub use truth::*;
