//! Pipeline tests against a scripted fake container engine.
//!
//! The fake records every lifecycle event and emulates just enough command
//! behavior (which/mkdir/rm/mv/front-end invocations) for the pipeline to
//! run end to end without Docker.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use wheelsmith_lib::container::{
  ContainerEngine, ContainerError, ContainerSpec, Environment, ExecOpts,
};
use wheelsmith_lib::cross;
use wheelsmith_lib::log::TraceLogger;
use wheelsmith_lib::options::BuildOptions;
use wheelsmith_lib::pipeline::{self, PipelineError};
use wheelsmith_lib::platform::Arch;
use wheelsmith_lib::report;
use wheelsmith_lib::select::Selector;

#[derive(Debug)]
struct FakeState {
  available: bool,
  started: Vec<String>,
  stopped: usize,
  binfmt_registrations: usize,
  execs: Vec<(Vec<String>, Option<BTreeMap<String, String>>)>,
  run_once: Vec<(String, Vec<String>)>,
  /// Container-side files, as absolute path strings.
  files: BTreeSet<String>,
  base_env: BTreeMap<String, String>,
  /// Wheels the build front-end drops into its output directory.
  wheel_names: Vec<String>,
  /// Any exec whose joined argv contains this substring fails.
  fail_on: Option<String>,
}

impl FakeState {
  fn new() -> Self {
    Self {
      available: true,
      started: vec![],
      stopped: 0,
      binfmt_registrations: 0,
      execs: vec![],
      run_once: vec![],
      files: BTreeSet::new(),
      base_env: [
        ("PATH".to_string(), "/usr/bin:/bin".to_string()),
        ("HOME".to_string(), "/root".to_string()),
      ]
      .into_iter()
      .collect(),
      wheel_names: vec!["demo-0.1.0-cp39-cp39-manylinux_x86_64.whl".to_string()],
      fail_on: None,
    }
  }
}

type SharedState = Arc<Mutex<FakeState>>;

#[derive(Clone)]
struct FakeEngine {
  state: SharedState,
}

impl FakeEngine {
  fn new() -> (Self, SharedState) {
    let state = Arc::new(Mutex::new(FakeState::new()));
    (Self { state: state.clone() }, state)
  }
}

struct FakeEnv {
  state: SharedState,
}

impl Environment for FakeEnv {
  async fn exec(&self, argv: &[String], opts: ExecOpts<'_>) -> Result<String, ContainerError> {
    let mut st = self.state.lock().unwrap();
    st.execs.push((argv.to_vec(), opts.env.cloned()));

    if let Some(pattern) = &st.fail_on {
      if argv.join(" ").contains(pattern.as_str()) {
        return Err(ContainerError::CommandFailed {
          command: argv.to_vec(),
          code: Some(1),
          output: String::new(),
        });
      }
    }

    match argv.first().map(String::as_str) {
      Some("which") => {
        let tool = argv[1].clone();
        if tool.starts_with("build-") {
          // The redirect directory holds no build-* entries, so lookup
          // lands in the cross image's toolchain bin.
          return Ok(format!("/opt/python/cp39-cp39-xc/bin/{}\n", tool));
        }
        let path = opts
          .env
          .and_then(|e| e.get("PATH"))
          .cloned()
          .unwrap_or_default();
        let first = path.split(':').next().unwrap_or("").to_string();
        Ok(format!("{}/{}\n", first, tool))
      }
      Some("rm") => {
        let target = argv.last().unwrap().clone();
        st.files.retain(|f| !f.starts_with(&target));
        Ok(String::new())
      }
      Some("mv") => {
        let dest = argv.last().unwrap().trim_end_matches('/').to_string();
        let sources: Vec<String> = argv[1..argv.len() - 1].to_vec();
        for source in sources {
          if st.files.remove(&source) {
            let name = Path::new(&source)
              .file_name()
              .map(|n| n.to_string_lossy().into_owned())
              .unwrap_or_default();
            st.files.insert(format!("{}/{}", dest, name));
          }
        }
        Ok(String::new())
      }
      Some("python") => {
        let out_dir = argv.iter().find_map(|a| {
          a.strip_prefix("--wheel-dir=")
            .or_else(|| a.strip_prefix("--dist-dir="))
            .or_else(|| a.strip_prefix("--outdir="))
        });
        if let Some(dir) = out_dir {
          let dir = dir.to_string();
          let names = st.wheel_names.clone();
          for name in names {
            st.files.insert(format!("{}/{}", dir, name));
          }
        }
        Ok(String::new())
      }
      Some("mktemp") => Ok("/tmp/fake-redirect\n".to_string()),
      _ => Ok(String::new()),
    }
  }

  async fn copy_into(&self, _host_path: &Path, _container_path: &Path) -> Result<(), ContainerError> {
    Ok(())
  }

  async fn copy_out(&self, container_path: &Path, host_path: &Path) -> Result<(), ContainerError> {
    let files: Vec<String> = {
      let st = self.state.lock().unwrap();
      st.files
        .iter()
        .filter(|f| Path::new(f).parent() == Some(container_path))
        .cloned()
        .collect()
    };
    std::fs::create_dir_all(host_path)?;
    for file in files {
      let name = Path::new(&file).file_name().unwrap();
      std::fs::write(host_path.join(name), b"")?;
    }
    Ok(())
  }

  async fn glob(&self, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ContainerError> {
    let st = self.state.lock().unwrap();
    let suffix = pattern.trim_start_matches('*');
    Ok(
      st.files
        .iter()
        .filter(|f| Path::new(f).parent() == Some(dir) && f.ends_with(suffix))
        .map(PathBuf::from)
        .collect(),
    )
  }

  async fn snapshot_env(&self) -> Result<BTreeMap<String, String>, ContainerError> {
    Ok(self.state.lock().unwrap().base_env.clone())
  }

  async fn stop(&mut self) -> Result<(), ContainerError> {
    self.state.lock().unwrap().stopped += 1;
    Ok(())
  }
}

impl ContainerEngine for FakeEngine {
  type Env = FakeEnv;

  async fn check_available(&self) -> Result<(), ContainerError> {
    if self.state.lock().unwrap().available {
      Ok(())
    } else {
      Err(ContainerError::EngineMissing {
        message: "'docker' was not found on PATH".to_string(),
      })
    }
  }

  async fn start(&self, spec: &ContainerSpec) -> Result<FakeEnv, ContainerError> {
    self.state.lock().unwrap().started.push(spec.image.clone());
    Ok(FakeEnv {
      state: self.state.clone(),
    })
  }

  async fn run_once(&self, image: &str, argv: &[String]) -> Result<(), ContainerError> {
    self
      .state
      .lock()
      .unwrap()
      .run_once
      .push((image.to_string(), argv.to_vec()));
    Ok(())
  }

  async fn register_binfmt(&self) -> Result<(), ContainerError> {
    self.state.lock().unwrap().binfmt_registrations += 1;
    Ok(())
  }
}

fn cp39_options(output_dir: &Path) -> BuildOptions {
  let mut options = BuildOptions::new(".", output_dir);
  options.architectures = BTreeSet::from([Arch::X86_64]);
  options.build_selector = Selector::new("cp39-manylinux_x86_64", "");
  options
}

fn execs_of(state: &SharedState) -> Vec<Vec<String>> {
  state.lock().unwrap().execs.iter().map(|(argv, _)| argv.clone()).collect()
}

mod target_selection {
  use super::*;

  #[tokio::test]
  async fn no_matching_configurations_skips_without_starting() {
    let (engine, state) = FakeEngine::new();
    let temp = tempfile::TempDir::new().unwrap();
    let mut options = cp39_options(temp.path());
    options.build_selector = Selector::new("cp99-*", "");

    pipeline::build(&engine, &options, &mut TraceLogger).await.unwrap();

    let st = state.lock().unwrap();
    assert!(st.started.is_empty());
    assert_eq!(st.stopped, 0);
  }

  #[tokio::test]
  async fn missing_engine_reported_before_any_start() {
    let (engine, state) = FakeEngine::new();
    state.lock().unwrap().available = false;
    let temp = tempfile::TempDir::new().unwrap();
    let options = cp39_options(temp.path());

    let error = pipeline::build(&engine, &options, &mut TraceLogger).await.unwrap_err();

    assert_eq!(report::exit_code(&error), 2);
    assert!(state.lock().unwrap().started.is_empty());
  }
}

mod environment_invariants {
  use super::*;

  #[tokio::test]
  async fn configured_interpreter_is_first_on_path() {
    let (engine, state) = FakeEngine::new();
    let temp = tempfile::TempDir::new().unwrap();
    let options = cp39_options(temp.path());

    pipeline::build(&engine, &options, &mut TraceLogger).await.unwrap();

    let st = state.lock().unwrap();
    let which_python = st
      .execs
      .iter()
      .find(|(argv, _)| argv[0] == "which" && argv[1] == "python")
      .expect("which python was never run");
    let env = which_python.1.as_ref().unwrap();
    assert!(env["PATH"].starts_with("/opt/python/cp39-cp39/bin:"));
  }

  #[tokio::test]
  async fn path_override_aborts_with_precedence_error() {
    let (engine, state) = FakeEngine::new();
    let temp = tempfile::TempDir::new().unwrap();
    let mut options = cp39_options(temp.path());
    options.environment.push("PATH", "/usr/local/override/bin:$PATH");

    let error = pipeline::build(&engine, &options, &mut TraceLogger).await.unwrap_err();

    assert!(matches!(error, PipelineError::PathPrecedence { ref tool, .. } if tool == "python"));
    assert_eq!(report::exit_code(&error), 1);
    // The container still came down.
    let st = state.lock().unwrap();
    assert_eq!(st.started.len(), 1);
    assert_eq!(st.stopped, 1);
  }
}

mod teardown {
  use super::*;

  #[tokio::test]
  async fn container_stops_even_when_a_phase_fails() {
    let (engine, state) = FakeEngine::new();
    state.lock().unwrap().fail_on = Some("pip wheel".to_string());
    let temp = tempfile::TempDir::new().unwrap();
    let options = cp39_options(temp.path());

    let error = pipeline::build(&engine, &options, &mut TraceLogger).await.unwrap_err();

    assert!(matches!(
      error,
      PipelineError::Container(ContainerError::CommandFailed { code: Some(1), .. })
    ));
    let st = state.lock().unwrap();
    assert_eq!(st.started.len(), 1);
    assert_eq!(st.stopped, 1, "stop must be observed despite the failure");
  }
}

mod artifacts {
  use super::*;

  #[tokio::test]
  async fn none_any_wheel_is_rejected() {
    let (engine, state) = FakeEngine::new();
    let temp = tempfile::TempDir::new().unwrap();
    let options = cp39_options(temp.path());
    state.lock().unwrap().wheel_names = vec!["demo-0.1.0-py3-none-any.whl".to_string()];

    let error = pipeline::build(&engine, &options, &mut TraceLogger).await.unwrap_err();
    assert!(matches!(error, PipelineError::NonPlatformWheel { .. }));
  }

  #[tokio::test]
  async fn more_than_one_built_wheel_is_rejected() {
    let (engine, state) = FakeEngine::new();
    let temp = tempfile::TempDir::new().unwrap();
    let options = cp39_options(temp.path());
    state.lock().unwrap().wheel_names = vec![
      "demo-0.1.0-cp39-cp39-manylinux_x86_64.whl".to_string(),
      "demo-0.1.0-cp39-cp39-manylinux1_x86_64.whl".to_string(),
    ];

    let error = pipeline::build(&engine, &options, &mut TraceLogger).await.unwrap_err();
    assert!(matches!(error, PipelineError::WheelCount { count: 2, .. }));
  }
}

mod scenarios {
  use super::*;

  /// cp39 / manylinux_x86_64, no hooks, pip front-end, no repair command,
  /// no test command: exactly one matching wheel lands in the output dir.
  #[tokio::test]
  async fn cp39_native_build_produces_one_wheel() {
    let (engine, state) = FakeEngine::new();
    let temp = tempfile::TempDir::new().unwrap();
    let options = cp39_options(temp.path());

    pipeline::build(&engine, &options, &mut TraceLogger).await.unwrap();

    let produced: Vec<_> = std::fs::read_dir(temp.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(produced.len(), 1);
    assert!(produced[0].contains("cp39"));
    assert!(produced[0].contains("manylinux_x86_64"));
    assert!(produced[0].ends_with(".whl"));

    let st = state.lock().unwrap();
    assert_eq!(st.started.len(), 1);
    assert_eq!(st.stopped, 1);
    assert_eq!(st.binfmt_registrations, 0);
  }
}

mod bootstrap {
  use super::*;
  use serial_test::serial;

  fn cross_env() -> BTreeMap<String, String> {
    [
      ("CROSS_ROOT".to_string(), "/opt/cross".to_string()),
      (
        "PATH".to_string(),
        "/opt/python/cp39-cp39-xc/bin:/usr/bin".to_string(),
      ),
    ]
    .into_iter()
    .collect()
  }

  async fn start_env(engine: &FakeEngine) -> FakeEnv {
    engine
      .start(&ContainerSpec::new("fake-xc-image", "/project"))
      .await
      .unwrap()
  }

  #[tokio::test]
  #[serial]
  async fn yum_routes_to_native_container_and_relays_files() {
    // The install helper's host-side output root.
    let deps_usr = Path::new("/tmp/install_deps/usr");
    std::fs::create_dir_all(deps_usr.join("lib64")).unwrap();
    std::fs::create_dir_all(deps_usr.join("include")).unwrap();

    let (engine, state) = FakeEngine::new();
    let container = start_env(&engine).await;
    let mut env = cross_env();

    cross::bootstrap(
      &engine,
      &container,
      "yum install foo && pip install bar",
      true,
      Arch::Aarch64,
      &mut env,
    )
    .await
    .unwrap();

    {
      let st = state.lock().unwrap();
      assert_eq!(st.run_once.len(), 1);
      let (image, argv) = &st.run_once[0];
      assert_eq!(image, cross::native_image(Arch::Aarch64).unwrap());
      assert!(argv[2].contains("/host/tmp/install_deps.sh \"yum install foo\""));
    }

    let execs = execs_of(&state);
    let relays: Vec<_> = execs
      .iter()
      .filter(|argv| argv.first().map(String::as_str) == Some("cp") && argv.get(1).map(String::as_str) == Some("-rf"))
      .collect();
    assert_eq!(relays.len(), 2);
    for relay in &relays {
      assert!(relay[2].starts_with("/host/tmp/install_deps/usr/"));
      assert_eq!(relay[3], "/opt/cross/aarch64-unknown-linux-gnueabi");
    }

    // The pip sub-command saw the redirect directory first on PATH.
    assert!(env["PATH"].starts_with("/tmp/fake-redirect:"));
    let links: Vec<_> = execs.iter().filter(|argv| argv.first().map(String::as_str) == Some("ln")).collect();
    assert_eq!(links.len(), 4, "four redirect entries expected");

    std::fs::remove_dir_all("/tmp/install_deps").unwrap();
  }

  #[tokio::test]
  #[serial]
  async fn redirect_directory_is_created_once_and_removed() {
    let (engine, state) = FakeEngine::new();
    let container = start_env(&engine).await;
    let mut env = cross_env();

    cross::bootstrap(
      &engine,
      &container,
      "pip install a && pip install b",
      true,
      Arch::Aarch64,
      &mut env,
    )
    .await
    .unwrap();

    let execs = execs_of(&state);
    let mktemps = execs.iter().filter(|argv| argv[0] == "mktemp").count();
    assert_eq!(mktemps, 1, "redirect setup must run exactly once");
    assert_eq!(execs.iter().filter(|argv| argv[0] == "ln").count(), 4);
    assert!(
      execs
        .iter()
        .any(|argv| argv[0] == "rm" && argv.last().map(String::as_str) == Some("/tmp/fake-redirect")),
      "redirect directory must be removed"
    );
  }

  #[tokio::test]
  #[serial]
  async fn no_redirect_without_the_flag() {
    let (engine, state) = FakeEngine::new();
    let container = start_env(&engine).await;
    let mut env = cross_env();

    cross::bootstrap(&engine, &container, "pip install a", false, Arch::Aarch64, &mut env)
      .await
      .unwrap();

    let execs = execs_of(&state);
    assert!(execs.iter().all(|argv| argv[0] != "mktemp" && argv[0] != "ln"));
  }

  #[tokio::test]
  #[serial]
  async fn unrecognized_verb_aborts_without_relaying() {
    let (engine, state) = FakeEngine::new();
    let container = start_env(&engine).await;
    let mut env = cross_env();

    let error = cross::bootstrap(
      &engine,
      &container,
      "apt-get install x",
      true,
      Arch::Aarch64,
      &mut env,
    )
    .await
    .unwrap_err();

    assert!(matches!(error, cross::CrossError::InvalidBootstrapCommand { .. }));
    assert_eq!(report::exit_code(&PipelineError::from(error)), 1);
    assert!(state.lock().unwrap().run_once.is_empty());
  }
}
