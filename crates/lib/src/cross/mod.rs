//! Cross-compilation toolchain bootstrap.
//!
//! A cross build runs inside a shim environment that cannot install
//! target-native packages itself. Hook commands (`before_all`,
//! `before_build`) are therefore routed through [`bootstrap`]:
//!
//! - package-manager sub-commands run in a throwaway container built from
//!   the target architecture's *native* image, and the files they install
//!   are relayed into the toolchain's dependency root for linking;
//! - interpreter sub-commands run against the build-time interpreter via a
//!   temporary redirect directory prepended to PATH;
//! - anything else aborts the bootstrap.
//!
//! Relaying works over a shared host temp root mounted at `/host` in every
//! participating container.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::consts::INSTALL_DEPS_SCRIPT;
use crate::container::{ContainerEngine, ContainerError, Environment, ExecOpts};
use crate::platform::Arch;

#[derive(Debug, Error)]
pub enum CrossError {
  /// `CROSS_ROOT` must be set by the cross image's environment.
  #[error("CROSS_ROOT is not set in the build environment")]
  MissingCrossRoot,

  /// No native image / cross triple is configured for this architecture.
  #[error("cross-compilation is not supported for {0}")]
  UnsupportedArch(Arch),

  /// A bootstrap sub-command used an unrecognized verb.
  #[error(
    "invalid command during cross bootstrap (only yum/pip/python commands are permitted): {command}"
  )]
  InvalidBootstrapCommand { command: String },

  /// `which build-pip` returned something without a parent directory.
  #[error("could not derive the build toolchain bin directory from '{path}'")]
  MalformedToolchainPath { path: String },

  #[error(transparent)]
  Container(#[from] ContainerError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Native (non-cross) image used to resolve dependencies for each
/// cross-compiled architecture.
pub fn native_image(arch: Arch) -> Result<&'static str, CrossError> {
  match arch {
    Arch::Aarch64 => Ok("quay.io/pypa/manylinux2014_aarch64:2021-07-14-67a6e11"),
    other => Err(CrossError::UnsupportedArch(other)),
  }
}

/// Toolchain triple subdirectory for each cross-compiled architecture.
fn cross_triple(arch: Arch) -> Result<&'static str, CrossError> {
  match arch {
    Arch::Aarch64 => Ok("aarch64-unknown-linux-gnueabi"),
    other => Err(CrossError::UnsupportedArch(other)),
  }
}

/// Read-only view of the paths involved in cross-compilation relaying.
///
/// Every path is derived from the environment map and target architecture;
/// the view is recomputed wherever needed, never cached across contexts.
#[derive(Debug, Clone)]
pub struct TargetArchPaths {
  /// Shared temp root on the host (and inside containers that own it).
  pub tmp: PathBuf,
  /// Mount point of the host root inside containers.
  pub host: PathBuf,
  /// Host temp root as seen from inside a container.
  pub host_tmp_in_container: PathBuf,
  /// Dependency install root as seen from inside a container.
  pub host_deps_in_container: PathBuf,
  /// `usr` subtree of the dependency install root, container view.
  pub host_deps_usr_in_container: PathBuf,
  /// `usr` subtree of the dependency install root, host view.
  pub deps_usr_on_host: PathBuf,
  /// Where relayed dependencies land inside the cross toolchain.
  pub toolchain_deps: PathBuf,
}

impl TargetArchPaths {
  pub fn new(env: &BTreeMap<String, String>, arch: Arch) -> Result<Self, CrossError> {
    let cross_root = env.get("CROSS_ROOT").ok_or(CrossError::MissingCrossRoot)?;

    let tmp = PathBuf::from("/tmp");
    let host = PathBuf::from("/host");
    let host_tmp_in_container = host.join("tmp");
    let host_deps_in_container = host_tmp_in_container.join("install_deps");
    let host_deps_usr_in_container = host_deps_in_container.join("usr");
    let deps_usr_on_host = tmp.join("install_deps").join("usr");
    let toolchain_deps = PathBuf::from(cross_root).join(cross_triple(arch)?);

    Ok(Self {
      tmp,
      host,
      host_tmp_in_container,
      host_deps_in_container,
      host_deps_usr_in_container,
      deps_usr_on_host,
      toolchain_deps,
    })
  }

  /// Re-root a container path under the host mount point, so a second
  /// container can reach files the first one wrote to the shared temp root.
  pub fn remap_to_host(&self, path: &Path) -> PathBuf {
    self.host.join(path.strip_prefix("/").unwrap_or(path))
  }
}

const PACKAGE_MANAGER_VERBS: &[&str] = &["yum"];
const INTERPRETER_VERBS: &[&str] = &["pip", "python", "python3"];

/// Classification of one bootstrap sub-command by its leading verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
  PackageManager,
  Interpreter,
  Unrecognized,
}

/// Classify a sub-command by matching its leading token against the fixed
/// verb tables.
pub fn classify(command: &str) -> CommandKind {
  let verb = command.split_whitespace().next().unwrap_or("");
  if PACKAGE_MANAGER_VERBS.contains(&verb) {
    CommandKind::PackageManager
  } else if INTERPRETER_VERBS.contains(&verb) {
    CommandKind::Interpreter
  } else {
    CommandKind::Unrecognized
  }
}

/// Split a compound hook command on the `&&` separator, trimming and
/// normalizing whitespace per sub-command.
pub fn split_subcommands(command: &str) -> Vec<String> {
  command
    .split("&&")
    .map(|c| c.trim().replace('\t', " "))
    .filter(|c| !c.is_empty())
    .collect()
}

/// Run a compound hook command under the cross bootstrap protocol.
///
/// `env` is the build container's composed environment; the interpreter
/// redirect mutates its PATH in place so later sub-commands (and the
/// subsequent build) see the redirect. The redirect directory is created at
/// most once per call, only when `redirect_interpreter` is set, and is
/// always removed before returning.
pub async fn bootstrap<E: ContainerEngine>(
  engine: &E,
  container: &E::Env,
  command: &str,
  redirect_interpreter: bool,
  arch: Arch,
  env: &mut BTreeMap<String, String>,
) -> Result<(), CrossError> {
  let paths = TargetArchPaths::new(env, arch)?;
  let image = native_image(arch)?;
  let subcommands = split_subcommands(command);

  stage_install_script(container, &paths).await?;

  let mut redirect_dir: Option<PathBuf> = None;
  let result = async {
    for sub in &subcommands {
      match classify(sub) {
        CommandKind::PackageManager => {
          relay_native_install(engine, container, sub, &paths, image).await?;
        }
        CommandKind::Interpreter => {
          if redirect_interpreter && redirect_dir.is_none() {
            redirect_dir = Some(setup_interpreter_redirect(container, env).await?);
          }
          container
            .exec(
              &["sh".to_string(), "-c".to_string(), sub.clone()],
              ExecOpts::with_env(env),
            )
            .await?;
        }
        CommandKind::Unrecognized => {
          error!(
            command = %sub,
            "only yum/pip/python commands are permitted during the cross bootstrap phase"
          );
          return Err(CrossError::InvalidBootstrapCommand { command: sub.clone() });
        }
      }
    }
    Ok(())
  }
  .await;

  if let Some(dir) = &redirect_dir {
    let cleanup = container
      .exec(
        &["rm".to_string(), "-rf".to_string(), dir.display().to_string()],
        ExecOpts::default(),
      )
      .await;
    if result.is_ok() {
      cleanup?;
    }
  }

  result
}

/// Stage the native install helper into the shared host temp root, once.
async fn stage_install_script<E: Environment>(
  container: &E,
  paths: &TargetArchPaths,
) -> Result<(), CrossError> {
  let host_script = paths.tmp.join(INSTALL_DEPS_SCRIPT);
  if tokio::fs::try_exists(&host_script).await.unwrap_or(false) {
    return Ok(());
  }
  debug!(script = %host_script.display(), "staging install helper to shared temp root");
  container
    .exec(
      &[
        "cp".to_string(),
        paths.tmp.join(INSTALL_DEPS_SCRIPT).display().to_string(),
        paths.host_tmp_in_container.display().to_string(),
      ],
      ExecOpts::default(),
    )
    .await?;
  Ok(())
}

/// Run a package-manager sub-command in the target's native image and relay
/// everything it installed into the toolchain dependency root.
async fn relay_native_install<E: ContainerEngine>(
  engine: &E,
  container: &E::Env,
  command: &str,
  paths: &TargetArchPaths,
  image: &str,
) -> Result<(), CrossError> {
  info!(
    command = %command,
    image = %image,
    "running package install in the target's native container"
  );
  let script = paths.host_tmp_in_container.join(INSTALL_DEPS_SCRIPT);
  engine
    .run_once(
      image,
      &[
        "bash".to_string(),
        "-c".to_string(),
        format!("{} \"{}\"", script.display(), command),
      ],
    )
    .await?;

  // The install helper leaves its output under the shared temp root on the
  // host; copy each entry into the toolchain.
  let mut entries = match tokio::fs::read_dir(&paths.deps_usr_on_host).await {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      warn!(path = %paths.deps_usr_on_host.display(), "package install produced no files to relay");
      return Ok(());
    }
    Err(e) => return Err(CrossError::Io(e)),
  };

  while let Some(entry) = entries.next_entry().await? {
    let source = paths.host_deps_usr_in_container.join(entry.file_name());
    debug!(from = %source.display(), to = %paths.toolchain_deps.display(), "relaying into toolchain");
    container
      .exec(
        &[
          "cp".to_string(),
          "-rf".to_string(),
          source.display().to_string(),
          paths.toolchain_deps.display().to_string(),
        ],
        ExecOpts::default(),
      )
      .await?;
  }

  Ok(())
}

/// Create the redirect directory that makes interpreter-family names resolve
/// to the build-time toolchain, and prepend it to PATH.
async fn setup_interpreter_redirect<E: Environment>(
  container: &E,
  env: &mut BTreeMap<String, String>,
) -> Result<PathBuf, CrossError> {
  let redirect_dir = container
    .exec(
      &["mktemp".to_string(), "-d".to_string()],
      ExecOpts::default().captured(),
    )
    .await?
    .trim()
    .to_string();

  let path = env.get("PATH").cloned().unwrap_or_default();
  env.insert("PATH".to_string(), format!("{}:{}", redirect_dir, path));

  // Discover the build-time installer on the now-prioritized PATH and
  // derive the build interpreter's bin directory from it.
  let build_pip = container
    .exec(
      &["which".to_string(), "build-pip".to_string()],
      ExecOpts::with_env(env).captured(),
    )
    .await?
    .trim()
    .to_string();
  let build_pip_path = PathBuf::from(&build_pip);
  let build_bin = build_pip_path
    .parent()
    .ok_or_else(|| CrossError::MalformedToolchainPath { path: build_pip.clone() })?
    .to_path_buf();

  let redirect_dir = PathBuf::from(redirect_dir);
  let links = [
    (build_pip_path.clone(), redirect_dir.join("pip")),
    (build_bin.join("build-pip3"), redirect_dir.join("pip3")),
    (build_bin.join("build-python"), redirect_dir.join("python")),
    (build_bin.join("build-python3"), redirect_dir.join("python3")),
  ];
  for (target, link) in links {
    container
      .exec(
        &[
          "ln".to_string(),
          "-s".to_string(),
          target.display().to_string(),
          link.display().to_string(),
        ],
        ExecOpts::with_env(env),
      )
      .await?;
  }

  info!(dir = %redirect_dir.display(), "interpreter redirect established");
  Ok(redirect_dir)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn env_with_cross_root() -> BTreeMap<String, String> {
    [("CROSS_ROOT".to_string(), "/opt/cross".to_string())]
      .into_iter()
      .collect()
  }

  #[test]
  fn classify_package_manager_verbs() {
    assert_eq!(classify("yum install libffi-devel"), CommandKind::PackageManager);
  }

  #[test]
  fn classify_interpreter_verbs() {
    assert_eq!(classify("pip install numpy"), CommandKind::Interpreter);
    assert_eq!(classify("python setup.py --version"), CommandKind::Interpreter);
    assert_eq!(classify("python3 -c 'pass'"), CommandKind::Interpreter);
  }

  #[test]
  fn classify_unrecognized_verbs() {
    assert_eq!(classify("apt-get install x"), CommandKind::Unrecognized);
    assert_eq!(classify("pipx run build"), CommandKind::Unrecognized);
    assert_eq!(classify(""), CommandKind::Unrecognized);
  }

  #[test]
  fn split_normalizes_whitespace_and_tabs() {
    let subs = split_subcommands("  yum install foo\t&&\tpip\tinstall bar ");
    assert_eq!(subs, vec!["yum install foo", "pip install bar"]);
  }

  #[test]
  fn paths_derive_from_environment_and_arch() {
    let paths = TargetArchPaths::new(&env_with_cross_root(), Arch::Aarch64).unwrap();
    assert_eq!(paths.host_tmp_in_container, PathBuf::from("/host/tmp"));
    assert_eq!(paths.host_deps_usr_in_container, PathBuf::from("/host/tmp/install_deps/usr"));
    assert_eq!(paths.deps_usr_on_host, PathBuf::from("/tmp/install_deps/usr"));
    assert_eq!(
      paths.toolchain_deps,
      PathBuf::from("/opt/cross/aarch64-unknown-linux-gnueabi")
    );
  }

  #[test]
  fn missing_cross_root_is_an_error() {
    let env = BTreeMap::new();
    assert!(matches!(
      TargetArchPaths::new(&env, Arch::Aarch64),
      Err(CrossError::MissingCrossRoot)
    ));
  }

  #[test]
  fn unsupported_arch_is_an_error() {
    assert!(matches!(
      TargetArchPaths::new(&env_with_cross_root(), Arch::S390x),
      Err(CrossError::UnsupportedArch(Arch::S390x))
    ));
  }

  #[test]
  fn remap_re_roots_under_host_mount() {
    let paths = TargetArchPaths::new(&env_with_cross_root(), Arch::Aarch64).unwrap();
    assert_eq!(
      paths.remap_to_host(Path::new("/tmp/wheelsmith/built_wheel")),
      PathBuf::from("/host/tmp/wheelsmith/built_wheel")
    );
  }
}
