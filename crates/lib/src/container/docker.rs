//! Docker implementation of the container traits.
//!
//! Containers are started detached with `/bin/cat` holding stdin open and
//! the host root mounted at `/host`; commands run through `docker exec` with
//! the environment passed explicitly, so the container's shell profile never
//! leaks into a build.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::consts::APP_NAME;
use crate::container::{ContainerEngine, ContainerError, ContainerSpec, Environment, ExecOpts};

/// Image used to register qemu binfmt handlers for emulated containers.
const BINFMT_IMAGE: &str = "hypriot/qemu-register";

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_container_name() -> String {
  let seq = CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed);
  format!("{}-{}-{}", APP_NAME, std::process::id(), seq)
}

/// Engine driving the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerEngine {
  binary: String,
}

impl DockerEngine {
  pub fn new() -> Self {
    Self {
      binary: "docker".to_string(),
    }
  }
}

impl Default for DockerEngine {
  fn default() -> Self {
    Self::new()
  }
}

/// Run the engine binary, capturing stdout.
async fn engine_capture(binary: &str, args: &[String]) -> Result<String, ContainerError> {
  debug!(binary = %binary, args = ?args, "running engine command");
  let output = Command::new(binary)
    .args(args)
    .stdin(Stdio::null())
    .output()
    .await
    .map_err(|e| map_spawn_error(binary, e))?;

  if !output.status.success() {
    let mut command = vec![binary.to_string()];
    command.extend(args.iter().cloned());
    return Err(ContainerError::CommandFailed {
      command,
      code: output.status.code(),
      output: String::from_utf8_lossy(&output.stderr).to_string(),
    });
  }
  Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run the engine binary with stdio streamed to the console.
async fn engine_status(binary: &str, args: &[String]) -> Result<(), ContainerError> {
  debug!(binary = %binary, args = ?args, "running engine command");
  let status = Command::new(binary)
    .args(args)
    .stdin(Stdio::null())
    .status()
    .await
    .map_err(|e| map_spawn_error(binary, e))?;

  if !status.success() {
    let mut command = vec![binary.to_string()];
    command.extend(args.iter().cloned());
    return Err(ContainerError::CommandFailed {
      command,
      code: status.code(),
      output: String::new(),
    });
  }
  Ok(())
}

fn map_spawn_error(binary: &str, error: std::io::Error) -> ContainerError {
  if error.kind() == std::io::ErrorKind::NotFound {
    ContainerError::EngineMissing {
      message: format!("'{}' was not found on PATH", binary),
    }
  } else {
    ContainerError::Io(error)
  }
}

/// Arguments for `docker run` starting a long-lived container.
fn start_args(name: &str, spec: &ContainerSpec) -> Vec<String> {
  vec![
    "run".to_string(),
    "-d".to_string(),
    "-i".to_string(),
    "--name".to_string(),
    name.to_string(),
    "--volume=/:/host".to_string(),
    spec.image.clone(),
    "/bin/cat".to_string(),
  ]
}

/// Arguments for `docker exec` running `argv` inside a container.
fn exec_args(
  name: &str,
  default_cwd: &Path,
  simulate_32_bit: bool,
  argv: &[String],
  opts: &ExecOpts<'_>,
) -> Vec<String> {
  let mut args = vec!["exec".to_string()];
  let cwd = opts.cwd.unwrap_or(default_cwd);
  args.push("-w".to_string());
  args.push(cwd.display().to_string());
  if let Some(env) = opts.env {
    for (key, value) in env {
      args.push("-e".to_string());
      args.push(format!("{}={}", key, value));
    }
  }
  args.push(name.to_string());
  if simulate_32_bit {
    args.push("linux32".to_string());
  }
  args.extend(argv.iter().cloned());
  args
}

/// Arguments for a one-shot `docker run --rm` with the host root mounted.
fn run_once_args(image: &str, argv: &[String]) -> Vec<String> {
  let mut args = vec![
    "run".to_string(),
    "--rm".to_string(),
    "--volume=/:/host".to_string(),
    image.to_string(),
  ];
  args.extend(argv.iter().cloned());
  args
}

impl ContainerEngine for DockerEngine {
  type Env = DockerContainer;

  async fn check_available(&self) -> Result<(), ContainerError> {
    engine_capture(&self.binary, &["--version".to_string()])
      .await
      .map(|_| ())
      .map_err(|e| match e {
        ContainerError::EngineMissing { .. } => e,
        other => ContainerError::EngineMissing {
          message: other.to_string(),
        },
      })
  }

  async fn start(&self, spec: &ContainerSpec) -> Result<DockerContainer, ContainerError> {
    let name = next_container_name();
    info!(image = %spec.image, name = %name, "starting container");
    engine_capture(&self.binary, &start_args(&name, spec)).await?;
    Ok(DockerContainer {
      binary: self.binary.clone(),
      name,
      cwd: spec.cwd.clone(),
      simulate_32_bit: spec.simulate_32_bit,
      stopped: false,
    })
  }

  async fn run_once(&self, image: &str, argv: &[String]) -> Result<(), ContainerError> {
    info!(image = %image, "running one-shot container");
    engine_status(&self.binary, &run_once_args(image, argv)).await
  }

  async fn register_binfmt(&self) -> Result<(), ContainerError> {
    engine_status(
      &self.binary,
      &[
        "run".to_string(),
        "--rm".to_string(),
        "--privileged".to_string(),
        BINFMT_IMAGE.to_string(),
      ],
    )
    .await
  }
}

/// A running Docker container.
#[derive(Debug)]
pub struct DockerContainer {
  binary: String,
  name: String,
  cwd: PathBuf,
  simulate_32_bit: bool,
  stopped: bool,
}

impl DockerContainer {
  pub fn name(&self) -> &str {
    &self.name
  }
}

impl Environment for DockerContainer {
  async fn exec(&self, argv: &[String], opts: ExecOpts<'_>) -> Result<String, ContainerError> {
    let args = exec_args(&self.name, &self.cwd, self.simulate_32_bit, argv, &opts);
    debug!(container = %self.name, argv = ?argv, "exec");

    let mut command = Command::new(&self.binary);
    command.args(&args).stdin(Stdio::null());

    if opts.capture {
      let output = command.output().await.map_err(|e| map_spawn_error(&self.binary, e))?;
      if !output.status.success() {
        return Err(ContainerError::CommandFailed {
          command: argv.to_vec(),
          code: output.status.code(),
          output: String::from_utf8_lossy(&output.stderr).to_string(),
        });
      }
      Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
      let status = command.status().await.map_err(|e| map_spawn_error(&self.binary, e))?;
      if !status.success() {
        return Err(ContainerError::CommandFailed {
          command: argv.to_vec(),
          code: status.code(),
          output: String::new(),
        });
      }
      Ok(String::new())
    }
  }

  async fn copy_into(&self, host_path: &Path, container_path: &Path) -> Result<(), ContainerError> {
    debug!(container = %self.name, from = %host_path.display(), to = %container_path.display(), "copy into");
    if host_path.is_dir() {
      // `docker cp src/. ctr:dest` merges into dest, which must exist.
      self
        .exec(
          &["mkdir".to_string(), "-p".to_string(), container_path.display().to_string()],
          ExecOpts::default(),
        )
        .await?;
      engine_capture(
        &self.binary,
        &[
          "cp".to_string(),
          format!("{}/.", host_path.display()),
          format!("{}:{}", self.name, container_path.display()),
        ],
      )
      .await?;
    } else {
      engine_capture(
        &self.binary,
        &[
          "cp".to_string(),
          host_path.display().to_string(),
          format!("{}:{}", self.name, container_path.display()),
        ],
      )
      .await?;
    }
    Ok(())
  }

  async fn copy_out(&self, container_path: &Path, host_path: &Path) -> Result<(), ContainerError> {
    debug!(container = %self.name, from = %container_path.display(), to = %host_path.display(), "copy out");
    tokio::fs::create_dir_all(host_path).await?;
    engine_capture(
      &self.binary,
      &[
        "cp".to_string(),
        format!("{}:{}/.", self.name, container_path.display()),
        host_path.display().to_string(),
      ],
    )
    .await?;
    Ok(())
  }

  async fn glob(&self, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ContainerError> {
    let listing = self
      .exec(
        &[
          "find".to_string(),
          dir.display().to_string(),
          "-mindepth".to_string(),
          "1".to_string(),
          "-maxdepth".to_string(),
          "1".to_string(),
          "-name".to_string(),
          pattern.to_string(),
        ],
        ExecOpts::default().captured(),
      )
      .await?;
    Ok(listing.lines().filter(|l| !l.is_empty()).map(PathBuf::from).collect())
  }

  async fn snapshot_env(&self) -> Result<BTreeMap<String, String>, ContainerError> {
    let listing = self
      .exec(
        &["sh".to_string(), "-c".to_string(), "env -0".to_string()],
        ExecOpts::default().captured(),
      )
      .await?;

    let mut env = BTreeMap::new();
    for entry in listing.split('\0').filter(|e| !e.is_empty()) {
      let (key, value) = entry
        .split_once('=')
        .ok_or_else(|| ContainerError::MalformedEnvironment(entry.to_string()))?;
      env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
  }

  async fn stop(&mut self) -> Result<(), ContainerError> {
    if self.stopped {
      return Ok(());
    }
    info!(container = %self.name, "stopping container");
    engine_capture(
      &self.binary,
      &["rm".to_string(), "-f".to_string(), self.name.clone()],
    )
    .await?;
    self.stopped = true;
    Ok(())
  }
}

impl Drop for DockerContainer {
  fn drop(&mut self) {
    if !self.stopped {
      warn!(container = %self.name, "container not stopped cleanly, removing");
      let _ = std::process::Command::new(&self.binary)
        .args(["rm", "-f", &self.name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    }
  }
}
