//! Build orchestration.
//!
//! The pipeline enumerates the declared platform targets, crosses them with
//! the matching interpreter configurations, and drives the per-target
//! build → repair → test → collect sequence inside containers, with
//! distinct control flow for native and cross-compiled targets.

pub mod execute;
pub mod types;

pub use execute::build;
pub use types::{Artifact, BuildTarget, PipelineError, declared_targets};
