//! # Ergo-Core
//!
//! Core types shared by the ergoflow posture-risk and work-state engine:
//! identifiers, the host-supplied clock, keypoint poses, joint-angle maps,
//! object detections and planar geometry.

pub mod angles;
pub mod error;
pub mod geometry;
pub mod pose;
pub mod types;

pub use angles::*;
pub use error::{Error, Result};
pub use geometry::*;
pub use pose::*;
pub use types::*;
