//! Failure diagnostics and exit codes.
//!
//! Command failures are reported with the failing command, exit code, and
//! captured output. When the failure came from a wheel-build invocation the
//! project tree is scanned for compiled-extension artifacts left behind by a
//! previous in-place build, a common cause of this class of failure. Their
//! presence is a hint, not an error.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::container::ContainerError;
use crate::cross::CrossError;
use crate::log::StepLogger;
use crate::pipeline::PipelineError;

/// Exit code when the container engine is missing.
pub const EXIT_ENGINE_MISSING: i32 = 2;
/// Exit code for every other fatal failure.
pub const EXIT_FAILURE: i32 = 1;

/// Map a pipeline error to the process exit code.
pub fn exit_code(error: &PipelineError) -> i32 {
  if matches!(error, PipelineError::Container(ContainerError::EngineMissing { .. })) {
    EXIT_ENGINE_MISSING
  } else {
    EXIT_FAILURE
  }
}

/// Remediation text for a missing container engine.
pub fn engine_missing_help() -> String {
  let mut help = String::from(
    "Docker not found. Docker is required to run builds.\n\
     If you're building on Travis CI, add `services: [docker]` to your .travis.yml.\n\
     If you're building on Circle CI in Linux, add a `setup_remote_docker` step to \
     your .circleci/config.yml.",
  );
  if std::env::consts::OS != "linux" {
    help.push_str("\nOn this platform, install Docker Desktop and ensure the daemon is running.");
  }
  help
}

/// Report a fatal pipeline error: stop the step display, print the details,
/// run the troubleshooting heuristics, and return the exit code.
pub fn diagnose(error: &PipelineError, package_dir: &Path, log: &mut dyn StepLogger) -> i32 {
  log.step_end(false);

  match error {
    PipelineError::Container(ContainerError::EngineMissing { message }) => {
      eprintln!("wheelsmith: {}", message);
      eprintln!("{}", engine_missing_help());
    }
    PipelineError::Container(ContainerError::CommandFailed { command, code, output })
    | PipelineError::Cross(CrossError::Container(ContainerError::CommandFailed {
      command,
      code,
      output,
    })) => {
      eprintln!(
        "wheelsmith: command {:?} failed with code {:?}. {}",
        command, code, output
      );
      troubleshoot(command, package_dir);
    }
    other => {
      eprintln!("wheelsmith: {}", other);
    }
  }

  exit_code(error)
}

/// True when `argv` is one of the recognized wheel-build invocation shapes.
pub fn is_wheel_build_command(argv: &[String]) -> bool {
  let starts_with = |prefix: &[&str]| {
    argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
  };
  starts_with(&["python", "-m", "pip", "wheel"]) || starts_with(&["python", "-m", "build"])
}

/// Shared objects found in the project tree, the usual suspects after an
/// in-place build against the wrong OS.
pub fn stale_extension_files(package_dir: &Path) -> Vec<PathBuf> {
  WalkDir::new(package_dir)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|entry| {
      entry.file_type().is_file()
        && entry.path().extension().is_some_and(|ext| ext == "so")
    })
    .map(|entry| entry.into_path())
    .collect()
}

fn troubleshoot(command: &[String], package_dir: &Path) {
  if !is_wheel_build_command(command) {
    return;
  }

  eprintln!("Checking for common errors...");
  let so_files = stale_extension_files(package_dir);
  if so_files.is_empty() {
    return;
  }

  eprintln!(
    "\nNOTE: Shared object (.so) files found in this project.\n\n\
     These files might be built against the wrong OS, causing problems with\n\
     the wheel repair step.\n\n\
     If you're using Cython and have previously done an in-place build,\n\
     remove those build files (*.so and *.c) before starting wheelsmith.\n"
  );
  eprintln!("  Files detected:");
  for file in &so_files {
    eprintln!("    {}", file.display());
  }
  eprintln!();
}
