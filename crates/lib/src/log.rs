//! Step/phase display collaborator.
//!
//! The pipeline reports progress through an explicit `StepLogger` instance
//! rather than a process-wide global. The CLI installs a console
//! implementation with timing and fold markers; the library default just
//! forwards to `tracing`.

use tracing::{error, info};

/// Receives step and per-build notifications from the pipeline.
pub trait StepLogger {
  /// A new step began. Implicitly ends any active step successfully.
  fn step(&mut self, description: &str);

  /// The active step ended.
  fn step_end(&mut self, success: bool);

  /// A per-identifier build began.
  fn build_start(&mut self, identifier: &str);

  /// The active per-identifier build finished.
  fn build_end(&mut self);
}

/// `StepLogger` that forwards to `tracing`.
#[derive(Debug, Default)]
pub struct TraceLogger;

impl StepLogger for TraceLogger {
  fn step(&mut self, description: &str) {
    info!(step = %description, "step");
  }

  fn step_end(&mut self, success: bool) {
    if success {
      info!("step finished");
    } else {
      error!("step failed");
    }
  }

  fn build_start(&mut self, identifier: &str) {
    info!(identifier = %identifier, "build started");
  }

  fn build_end(&mut self) {
    info!("build finished");
  }
}
