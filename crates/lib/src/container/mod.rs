//! Isolated build environments.
//!
//! Every build runs inside a container: the pipeline copies the project in,
//! executes the build/repair/test phases, and copies the produced wheels
//! back out. During cross-compilation two or three containers are alive at
//! once (the cross build environment, a throwaway native container for
//! dependency installs, and a target-native container for repair/test).
//!
//! The traits here exist so the pipeline can be exercised against fakes;
//! the real implementation drives the `docker` CLI (see [`docker`]).

pub mod docker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use docker::{DockerContainer, DockerEngine};

#[derive(Debug, Error)]
pub enum ContainerError {
  /// The container engine binary is not installed or not on PATH.
  /// Reported before any environment is created, with its own exit code.
  #[error("container engine not available: {message}")]
  EngineMissing { message: String },

  /// A command run inside (or against) a container exited non-zero.
  #[error("command {command:?} failed with exit code {code:?}")]
  CommandFailed {
    command: Vec<String>,
    code: Option<i32>,
    output: String,
  },

  /// The environment listing produced by the container could not be parsed.
  #[error("malformed environment listing: {0}")]
  MalformedEnvironment(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Per-call execution options.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecOpts<'a> {
  /// Environment for the command; the container's own environment is used
  /// when absent.
  pub env: Option<&'a BTreeMap<String, String>>,
  /// Working directory; the container's configured cwd is used when absent.
  pub cwd: Option<&'a Path>,
  /// Capture stdout and return it instead of streaming to the console.
  pub capture: bool,
}

impl<'a> ExecOpts<'a> {
  pub fn with_env(env: &'a BTreeMap<String, String>) -> Self {
    Self {
      env: Some(env),
      ..Self::default()
    }
  }

  pub fn captured(mut self) -> Self {
    self.capture = true;
    self
  }

  pub fn in_dir(mut self, cwd: &'a Path) -> Self {
    self.cwd = Some(cwd);
    self
  }
}

/// An isolated execution context.
///
/// Commands run to completion; a non-zero exit raises
/// [`ContainerError::CommandFailed`] carrying the command, exit code, and
/// captured output. File transfer is recursive in both directions.
#[allow(async_fn_in_trait)]
pub trait Environment {
  /// Run a command to completion, returning captured stdout (empty unless
  /// `opts.capture` is set).
  async fn exec(&self, argv: &[String], opts: ExecOpts<'_>) -> Result<String, ContainerError>;

  /// Recursively copy a host file or directory into the container.
  async fn copy_into(&self, host_path: &Path, container_path: &Path) -> Result<(), ContainerError>;

  /// Recursively copy a container directory out to the host.
  async fn copy_out(&self, container_path: &Path, host_path: &Path) -> Result<(), ContainerError>;

  /// List entries of `dir` matching a shell glob pattern.
  ///
  /// Ordering is whatever the underlying listing returns; callers that pick
  /// "the first match" must sort first.
  async fn glob(&self, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ContainerError>;

  /// The container's current environment variables, as a mutable copy for
  /// the caller to layer onto.
  async fn snapshot_env(&self) -> Result<BTreeMap<String, String>, ContainerError>;

  /// Release the container. Guaranteed to be called on every exit path of a
  /// target's processing, including failures.
  async fn stop(&mut self) -> Result<(), ContainerError>;
}

/// What to start a container from.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
  pub image: String,
  /// Default working directory for `exec`.
  pub cwd: PathBuf,
  /// Prefix every command with `linux32` (i686 images on x86_64 hosts).
  pub simulate_32_bit: bool,
}

impl ContainerSpec {
  pub fn new(image: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
    Self {
      image: image.into(),
      cwd: cwd.into(),
      simulate_32_bit: false,
    }
  }

  pub fn simulate_32_bit(mut self, simulate: bool) -> Self {
    self.simulate_32_bit = simulate;
    self
  }
}

/// Creates and probes containers.
#[allow(async_fn_in_trait)]
pub trait ContainerEngine {
  type Env: Environment;

  /// Verify the engine is usable. Failure here means the prerequisite tool
  /// is missing, which is reported differently from build errors.
  async fn check_available(&self) -> Result<(), ContainerError>;

  /// Start a long-lived container with the host root mounted at `/host`.
  async fn start(&self, spec: &ContainerSpec) -> Result<Self::Env, ContainerError>;

  /// Run a single command in a throwaway container (host root mounted at
  /// `/host`), blocking until it completes.
  async fn run_once(&self, image: &str, argv: &[String]) -> Result<(), ContainerError>;

  /// Register qemu binfmt handlers so emulated containers can run.
  async fn register_binfmt(&self) -> Result<(), ContainerError>;
}
