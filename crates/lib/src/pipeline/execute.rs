//! The build pipeline.
//!
//! One target at a time, one configuration at a time; every suspension point
//! is a blocking process-execution call. A started container is guaranteed
//! to stop before control leaves its target, success or failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::consts::{
  BEFORE_ALL_PYTHON_BIN, CONSTRAINTS_FILE, OUTPUT_DIR, PROJECT_DIR, REPAIR_SCRIPT, SCRATCH_DIR,
};
use crate::container::{ContainerEngine, ContainerSpec, Environment, ExecOpts};
use crate::cross::{self, TargetArchPaths};
use crate::ident::{Identifier, PlatformTag};
use crate::log::StepLogger;
use crate::manifest::{PythonConfiguration, matching_configurations};
use crate::options::{BuildFrontend, BuildOptions, build_verbosity_flags};
use crate::pipeline::types::{Artifact, BuildTarget, PipelineError, declared_targets};
use crate::platform::Arch;
use crate::template;

/// Everything a target's processing needs besides the live container.
struct TargetContext<'a> {
  target: &'a BuildTarget,
  configs: &'a [&'a PythonConfiguration],
  options: &'a BuildOptions,
  /// Host directory copied into the container at the project mount.
  host_project: &'a Path,
  /// The package directory's location inside the container.
  container_package_dir: &'a Path,
}

/// Build wheels for every declared target with matching configurations.
pub async fn build<E: ContainerEngine>(
  engine: &E,
  options: &BuildOptions,
  log: &mut dyn StepLogger,
) -> Result<(), PipelineError> {
  // The engine is a hard prerequisite, checked before anything is started.
  engine.check_available().await?;

  let configurations = matching_configurations(&options.build_selector, &options.architectures)?;
  for config in &configurations {
    // Unrecognized interpreter kinds or platform tags fail the run up front.
    Identifier::parse(&config.identifier)?;
  }
  let targets = declared_targets(&options.manylinux_images)?;

  let cwd = std::env::current_dir()?.canonicalize()?;
  let package_dir = if options.package_dir.is_absolute() {
    options.package_dir.clone()
  } else {
    cwd.join(&options.package_dir)
  };
  let package_dir = package_dir.canonicalize()?;
  if package_dir != cwd && !package_dir.starts_with(&cwd) {
    return Err(PipelineError::PackageDirOutsideProject { package_dir });
  }
  let container_package_dir = container_package_path(&cwd, &package_dir);

  if options.cross_compile_arch.is_some() {
    log.step("Registering qemu binfmt handlers...");
    engine.register_binfmt().await?;
  }

  for target in &targets {
    if target_is_superseded(target, options.cross_compile_arch) {
      info!(
        platform = %target.platform_tag,
        "skipping native target superseded by cross-compilation"
      );
      continue;
    }
    if target.is_cross && options.cross_compile_arch != Some(target.platform_tag.arch()) {
      continue;
    }

    let target_configs: Vec<&PythonConfiguration> = configurations
      .iter()
      .filter(|c| {
        c.identifier.starts_with(target.prefix.as_str())
          && c.identifier.ends_with(target.platform_tag.as_str())
      })
      .collect();
    if target_configs.is_empty() {
      debug!(
        platform = %target.platform_tag,
        prefix = %target.prefix,
        "no matching configurations, skipping target"
      );
      continue;
    }

    log.step(&format!("Starting container image {}...", target.image));
    let spec = ContainerSpec::new(target.image.clone(), PROJECT_DIR)
      .simulate_32_bit(target.platform_tag == PlatformTag::ManylinuxI686);
    let mut container = engine.start(&spec).await?;

    let ctx = TargetContext {
      target,
      configs: &target_configs,
      options,
      host_project: &cwd,
      container_package_dir: &container_package_dir,
    };
    let result = process_target(engine, &container, &ctx, log).await;
    let stopped = container.stop().await;
    result?;
    stopped?;
  }

  Ok(())
}

/// The package directory's path inside the container: the project mount
/// plus the package's path relative to the working directory.
fn container_package_path(cwd: &Path, package_dir: &Path) -> PathBuf {
  let project = PathBuf::from(PROJECT_DIR);
  match package_dir.strip_prefix(cwd) {
    Ok(relative) => project.join(relative),
    Err(_) => project,
  }
}

/// True when cross-compilation is active and this native target builds for
/// the architecture the cross target supersedes.
fn target_is_superseded(target: &BuildTarget, cross_compile_arch: Option<Arch>) -> bool {
  match cross_compile_arch {
    Some(arch) => target.platform_tag.arch() == arch && !target.is_cross,
    None => false,
  }
}

async fn process_target<E: ContainerEngine>(
  engine: &E,
  container: &E::Env,
  ctx: &TargetContext<'_>,
  log: &mut dyn StepLogger,
) -> Result<(), PipelineError> {
  log.step("Copying project into container...");
  container.copy_into(ctx.host_project, Path::new(PROJECT_DIR)).await?;

  let cross_arch = if ctx.target.is_cross {
    Some(ctx.target.platform_tag.arch())
  } else {
    None
  };

  if let Some(before_all) = &ctx.options.before_all {
    log.step("Running before_all...");
    let mut env = container.snapshot_env().await?;
    prepend_path(&mut env, Path::new(BEFORE_ALL_PYTHON_BIN));
    env.insert("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string());
    ctx.options.environment.apply(&mut env);

    let prepared = template::prepare(
      before_all,
      &[
        ("project", Path::new(PROJECT_DIR)),
        ("package", ctx.container_package_dir),
      ],
    );
    match cross_arch {
      Some(arch) => cross::bootstrap(engine, container, &prepared, false, arch, &mut env).await?,
      None => {
        container.exec(&sh(&prepared), ExecOpts::with_env(&env)).await?;
      }
    }
  }

  for &config in ctx.configs {
    build_one(engine, container, ctx, config, cross_arch, log).await?;
  }

  log.step("Copying wheels back to host...");
  container.copy_out(Path::new(OUTPUT_DIR), &ctx.options.output_dir).await?;
  log.step_end(true);
  Ok(())
}

/// Run the per-configuration phase sequence: environment setup and its
/// invariants, before_build, build, repair, test, collect.
async fn build_one<E: ContainerEngine>(
  engine: &E,
  container: &E::Env,
  ctx: &TargetContext<'_>,
  config: &PythonConfiguration,
  cross_arch: Option<Arch>,
  log: &mut dyn StepLogger,
) -> Result<(), PipelineError> {
  log.build_start(&config.identifier);

  let mut constraint_flags: Vec<String> = vec![];
  if let Some(constraints) = &ctx.options.dependency_constraints {
    container.copy_into(constraints, Path::new(CONSTRAINTS_FILE)).await?;
    constraint_flags = vec!["-c".to_string(), CONSTRAINTS_FILE.to_string()];
  }

  log.step("Setting up build environment...");
  let mut env = container.snapshot_env().await?;
  let python_bin = config.path.join("bin");
  prepend_path(&mut env, &python_bin);
  if cross_arch.is_some() {
    // The build-time interpreter lives one level above the cross
    // environment; its bin dir carries the build-* entry points.
    let build_bin = config.path.parent().unwrap_or(&config.path).join("bin");
    prepend_path(&mut env, &build_bin);
  }
  ctx.options.environment.apply(&mut env);

  // The interpreter and installer that will actually run must be exactly
  // the ones this configuration installed.
  assert_resolves_to(container, "python", &python_bin, &env).await?;
  assert_resolves_to(container, "pip", &python_bin, &env).await?;

  if let Some(before_build) = &ctx.options.before_build {
    log.step("Running before_build...");
    let prepared = template::prepare(
      before_build,
      &[
        ("project", Path::new(PROJECT_DIR)),
        ("package", ctx.container_package_dir),
      ],
    );
    match cross_arch {
      Some(arch) => cross::bootstrap(engine, container, &prepared, true, arch, &mut env).await?,
      None => {
        container.exec(&sh(&prepared), ExecOpts::with_env(&env)).await?;
      }
    }
  }

  log.step("Building wheel...");
  let scratch = PathBuf::from(SCRATCH_DIR);
  let built_wheel_dir = scratch.join("built_wheel");
  container.exec(&rm_rf(&built_wheel_dir), ExecOpts::default()).await?;
  container.exec(&mkdir_p(&built_wheel_dir), ExecOpts::default()).await?;

  let verbosity = build_verbosity_flags(ctx.options.build_verbosity);
  match (cross_arch, ctx.options.build_frontend) {
    (Some(_), _) => {
      // Wheel front-ends are not reliable under the cross shim; drive the
      // legacy setup.py path straight into the output directory.
      let mut argv: Vec<String> = vec![
        "python".to_string(),
        "setup.py".to_string(),
        "bdist_wheel".to_string(),
        format!("--dist-dir={}", built_wheel_dir.display()),
      ];
      argv.extend(verbosity);
      container
        .exec(&argv, ExecOpts::with_env(&env).in_dir(ctx.container_package_dir))
        .await?;
    }
    (None, BuildFrontend::Pip) => {
      let mut argv: Vec<String> = vec![
        "python".to_string(),
        "-m".to_string(),
        "pip".to_string(),
        "wheel".to_string(),
        ctx.container_package_dir.display().to_string(),
        format!("--wheel-dir={}", built_wheel_dir.display()),
        "--no-deps".to_string(),
      ];
      argv.extend(verbosity);
      container.exec(&argv, ExecOpts::with_env(&env)).await?;
    }
    (None, BuildFrontend::Build) => {
      let argv: Vec<String> = vec![
        "python".to_string(),
        "-m".to_string(),
        "build".to_string(),
        ctx.container_package_dir.display().to_string(),
        "--wheel".to_string(),
        format!("--outdir={}", built_wheel_dir.display()),
        format!("--config-setting={}", verbosity.join(" ")),
      ];
      container.exec(&argv, ExecOpts::with_env(&env)).await?;
    }
  }

  let built_wheel =
    Artifact::sole_match(&built_wheel_dir, container.glob(&built_wheel_dir, "*.whl").await?)?;
  built_wheel.ensure_platform_specific()?;

  let repaired_wheel_dir = scratch.join("repaired_wheel");
  let repaired_wheels = match cross_arch {
    Some(arch) => {
      cross_repair_and_test(
        engine,
        container,
        ctx,
        config,
        arch,
        &built_wheel,
        &scratch,
        &repaired_wheel_dir,
        &env,
        &constraint_flags,
        log,
      )
      .await?
    }
    None => {
      native_repair(container, ctx, &built_wheel, &repaired_wheel_dir, &env, log).await?;
      let repaired = container.glob(&repaired_wheel_dir, "*.whl").await?;

      if ctx.options.test_command.is_some()
        && ctx.options.test_selector.matches(&config.identifier)
      {
        log.step("Testing wheel...");
        let wheel = pick_first(repaired.clone()).ok_or_else(|| PipelineError::WheelCount {
          dir: repaired_wheel_dir.clone(),
          count: 0,
        })?;
        test_wheel(container, ctx, &wheel, &env, &constraint_flags).await?;
      }
      repaired
    }
  };

  if repaired_wheels.is_empty() {
    return Err(PipelineError::WheelCount {
      dir: repaired_wheel_dir,
      count: 0,
    });
  }

  // Collect: repaired wheels move to the shared output location.
  container.exec(&mkdir_p(Path::new(OUTPUT_DIR)), ExecOpts::default()).await?;
  let mut mv: Vec<String> = vec!["mv".to_string()];
  mv.extend(repaired_wheels.iter().map(|w| w.display().to_string()));
  mv.push(OUTPUT_DIR.to_string());
  container.exec(&mv, ExecOpts::default()).await?;

  log.build_end();
  Ok(())
}

/// Repair in the same container: run the configured repair command, or move
/// the wheel unmodified.
async fn native_repair<E: Environment>(
  container: &E,
  ctx: &TargetContext<'_>,
  built_wheel: &Artifact,
  repaired_wheel_dir: &Path,
  env: &BTreeMap<String, String>,
  log: &mut dyn StepLogger,
) -> Result<(), PipelineError> {
  container.exec(&rm_rf(repaired_wheel_dir), ExecOpts::default()).await?;
  container.exec(&mkdir_p(repaired_wheel_dir), ExecOpts::default()).await?;

  if let Some(repair_command) = &ctx.options.repair_command {
    log.step("Repairing wheel...");
    let prepared = template::prepare(
      repair_command,
      &[
        ("wheel", built_wheel.path.as_path()),
        ("dest_dir", repaired_wheel_dir),
      ],
    );
    container.exec(&sh(&prepared), ExecOpts::with_env(env)).await?;
  } else {
    container
      .exec(
        &[
          "mv".to_string(),
          built_wheel.path.display().to_string(),
          repaired_wheel_dir.display().to_string(),
        ],
        ExecOpts::default(),
      )
      .await?;
  }
  Ok(())
}

/// Cross targets repair (and test) in a second container running the
/// target's true architecture: the cross build environment is only a shim
/// and cannot run target-native repair tooling. The built wheel, the
/// toolchain's staged files, and the repair helper script travel through
/// the shared host temp root.
#[allow(clippy::too_many_arguments)]
async fn cross_repair_and_test<E: ContainerEngine>(
  engine: &E,
  container: &E::Env,
  ctx: &TargetContext<'_>,
  config: &PythonConfiguration,
  arch: Arch,
  built_wheel: &Artifact,
  scratch: &Path,
  repaired_wheel_dir: &Path,
  env: &BTreeMap<String, String>,
  constraint_flags: &[String],
  log: &mut dyn StepLogger,
) -> Result<Vec<PathBuf>, PipelineError> {
  let paths = TargetArchPaths::new(env, arch)?;

  // Addressed through /host so both containers see the same files.
  let built_wheel_host = paths.remap_to_host(&built_wheel.path);
  let repaired_dir_host = paths.remap_to_host(repaired_wheel_dir);

  container.exec(&rm_rf(&repaired_dir_host), ExecOpts::default()).await?;
  container.exec(&mkdir_p(&repaired_dir_host), ExecOpts::default()).await?;
  container
    .exec(
      &[
        "cp".to_string(),
        "-r".to_string(),
        scratch.display().to_string(),
        paths.host_tmp_in_container.display().to_string(),
      ],
      ExecOpts::default(),
    )
    .await?;
  container
    .exec(
      &[
        "cp".to_string(),
        paths.tmp.join(REPAIR_SCRIPT).display().to_string(),
        paths.host_tmp_in_container.display().to_string(),
      ],
      ExecOpts::default(),
    )
    .await?;

  log.step("Starting target-native container for repair...");
  let spec = ContainerSpec::new(cross::native_image(arch)?, PROJECT_DIR);
  let mut native = engine.start(&spec).await?;

  let result = cross_native_phases(
    &native,
    ctx,
    config,
    &paths,
    &built_wheel_host,
    &repaired_dir_host,
    env,
    constraint_flags,
    log,
  )
  .await;
  let stopped = native.stop().await;
  let wheels = result?;
  stopped?;
  Ok(wheels)
}

/// Repair, and optionally test, inside the target-native container.
#[allow(clippy::too_many_arguments)]
async fn cross_native_phases<E: Environment>(
  native: &E,
  ctx: &TargetContext<'_>,
  config: &PythonConfiguration,
  paths: &TargetArchPaths,
  built_wheel_host: &Path,
  repaired_dir_host: &Path,
  env: &BTreeMap<String, String>,
  constraint_flags: &[String],
  log: &mut dyn StepLogger,
) -> Result<Vec<PathBuf>, PipelineError> {
  if let Some(repair_command) = &ctx.options.repair_command {
    log.step("Repairing wheel...");
    let prepared = template::prepare(
      repair_command,
      &[("wheel", built_wheel_host), ("dest_dir", repaired_dir_host)],
    );
    native
      .exec(
        &[
          paths.host_tmp_in_container.join(REPAIR_SCRIPT).display().to_string(),
          paths.host_deps_in_container.display().to_string(),
          prepared,
        ],
        ExecOpts::default(),
      )
      .await?;
  } else {
    native
      .exec(
        &[
          "mv".to_string(),
          built_wheel_host.display().to_string(),
          repaired_dir_host.display().to_string(),
        ],
        ExecOpts::default(),
      )
      .await?;
  }

  let repaired = native.glob(repaired_dir_host, "*.whl").await?;

  if ctx.options.test_command.is_some() && ctx.options.test_selector.matches(&config.identifier) {
    log.step("Testing wheel...");
    // Tests run where the artifact can actually execute, so this container
    // needs its own copy of the project and constraints.
    native.copy_into(ctx.host_project, Path::new(PROJECT_DIR)).await?;
    if let Some(constraints) = &ctx.options.dependency_constraints {
      native.copy_into(constraints, Path::new(CONSTRAINTS_FILE)).await?;
    }

    let mut native_env = native.snapshot_env().await?;
    // The build PATH names the cross toolchain layout; dropping the -xc
    // token points the same entries at the target-native interpreters.
    let build_path = env.get("PATH").cloned().unwrap_or_default().replace("-xc", "");
    let native_path = native_env.get("PATH").cloned().unwrap_or_default();
    native_env.insert("PATH".to_string(), format!("{}:{}", build_path, native_path));

    let wheel = pick_first(repaired.clone()).ok_or_else(|| PipelineError::WheelCount {
      dir: repaired_dir_host.to_path_buf(),
      count: 0,
    })?;
    test_wheel(native, ctx, &wheel, &native_env, constraint_flags).await?;
  }

  Ok(repaired)
}

/// Install the wheel into a fresh isolated environment and run the test
/// command from outside the project tree.
async fn test_wheel<E: Environment>(
  container: &E,
  ctx: &TargetContext<'_>,
  wheel: &Path,
  env: &BTreeMap<String, String>,
  constraint_flags: &[String],
) -> Result<(), PipelineError> {
  // An isolated environment guarantees nothing pulled in at build time
  // leaks into the test.
  let mut install_virtualenv: Vec<String> =
    vec!["pip".to_string(), "install".to_string(), "virtualenv".to_string()];
  install_virtualenv.extend(constraint_flags.iter().cloned());
  container.exec(&install_virtualenv, ExecOpts::with_env(env)).await?;

  let temp = container
    .exec(&["mktemp".to_string(), "-d".to_string()], ExecOpts::default().captured())
    .await?
    .trim()
    .to_string();
  let venv_dir = PathBuf::from(temp).join("venv");
  container
    .exec(
      &[
        "python".to_string(),
        "-m".to_string(),
        "virtualenv".to_string(),
        "--no-download".to_string(),
        venv_dir.display().to_string(),
      ],
      ExecOpts::with_env(env),
    )
    .await?;

  let mut venv_env = env.clone();
  prepend_path(&mut venv_env, &venv_dir.join("bin"));

  if let Some(before_test) = &ctx.options.before_test {
    let prepared = template::prepare(
      before_test,
      &[
        ("project", Path::new(PROJECT_DIR)),
        ("package", ctx.container_package_dir),
      ],
    );
    container.exec(&sh(&prepared), ExecOpts::with_env(&venv_env)).await?;
  }

  container
    .exec(
      &[
        "pip".to_string(),
        "install".to_string(),
        format!("{}{}", wheel.display(), ctx.options.test_extras),
      ],
      ExecOpts::with_env(&venv_env),
    )
    .await?;

  if !ctx.options.test_requires.is_empty() {
    let mut argv: Vec<String> = vec!["pip".to_string(), "install".to_string()];
    argv.extend(ctx.options.test_requires.iter().cloned());
    container.exec(&argv, ExecOpts::with_env(&venv_env)).await?;
  }

  if let Some(test_command) = &ctx.options.test_command {
    let prepared = template::prepare(
      test_command,
      &[
        ("project", Path::new(PROJECT_DIR)),
        ("package", ctx.container_package_dir),
      ],
    );
    // From a directory outside the project tree, so the installed wheel is
    // imported rather than the source tree.
    container
      .exec(
        &sh(&prepared),
        ExecOpts::with_env(&venv_env).in_dir(Path::new("/root")),
      )
      .await?;
  }

  container.exec(&rm_rf(&venv_dir), ExecOpts::default()).await?;
  Ok(())
}

/// Check that `which <tool>` resolves to the configured bin directory.
async fn assert_resolves_to<E: Environment>(
  container: &E,
  tool: &str,
  expected_bin: &Path,
  env: &BTreeMap<String, String>,
) -> Result<(), PipelineError> {
  let found = container
    .exec(
      &["which".to_string(), tool.to_string()],
      ExecOpts::with_env(env).captured(),
    )
    .await?
    .trim()
    .to_string();
  let expected = expected_bin.join(tool);
  if Path::new(&found) != expected {
    return Err(PipelineError::PathPrecedence {
      tool: tool.to_string(),
      expected,
      found,
    });
  }
  Ok(())
}

fn prepend_path(env: &mut BTreeMap<String, String>, dir: &Path) {
  let path = env.get("PATH").cloned().unwrap_or_default();
  env.insert("PATH".to_string(), format!("{}:{}", dir.display(), path));
}

fn pick_first(mut wheels: Vec<PathBuf>) -> Option<PathBuf> {
  wheels.sort();
  wheels.into_iter().next()
}

fn sh(command: &str) -> Vec<String> {
  vec!["sh".to_string(), "-c".to_string(), command.to_string()]
}

fn rm_rf(path: &Path) -> Vec<String> {
  vec!["rm".to_string(), "-rf".to_string(), path.display().to_string()]
}

fn mkdir_p(path: &Path) -> Vec<String> {
  vec!["mkdir".to_string(), "-p".to_string(), path.display().to_string()]
}
