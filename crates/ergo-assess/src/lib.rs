//! # Ergo-Assess
//!
//! Deterministic posture-risk scoring from joint-angle maps.
//!
//! ## Methods
//!
//! - **RULA** - Rapid Upper Limb Assessment, final score 1-7
//! - **REBA** - Rapid Entire Body Assessment, final score 1-15
//! - **NIOSH** - revised lifting equation, reported as the lifting index
//!
//! All three implement [`PostureScorer`] and produce a [`RiskAssessment`].
//! Missing angles never fail a score; they are substituted with a neutral
//! value and listed in [`RiskAssessment::defaulted`].
//!
//! ## Fusion
//!
//! [`fusion::fuse`] merges a front and a side view into the single angle map
//! the scorers consume.

pub mod fusion;
pub mod niosh;
pub mod reba;
pub mod risk;
pub mod rula;

pub use fusion::{fuse, ArmSide};
pub use niosh::{Coupling, LiftingTask, Multipliers, NioshScorer};
pub use reba::{RebaOptions, RebaScorer};
pub use risk::*;
pub use rula::{RulaOptions, RulaScorer};
