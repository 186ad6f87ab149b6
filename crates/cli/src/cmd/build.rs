//! Implementation of the `wheelsmith build` command.
//!
//! Resolves CLI flags into `BuildOptions`, runs the pipeline against the
//! Docker engine, and maps failures to exit codes (2 when Docker itself is
//! missing, 1 for everything else).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing::info;

use wheelsmith_lib::container::DockerEngine;
use wheelsmith_lib::options::{BuildFrontend, BuildOptions};
use wheelsmith_lib::pipeline;
use wheelsmith_lib::platform::Arch;
use wheelsmith_lib::report;
use wheelsmith_lib::select::Selector;

use crate::output::{self, ConsoleLogger};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum FrontendArg {
  #[default]
  Pip,
  Build,
}

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
  /// Directory containing the package to build
  #[arg(default_value = ".")]
  pub package_dir: PathBuf,

  /// Destination directory for repaired wheels
  #[arg(long, default_value = "wheelhouse")]
  pub output_dir: PathBuf,

  /// Architectures to build for (defaults to the host architecture)
  #[arg(long, value_delimiter = ',')]
  pub archs: Vec<Arch>,

  /// Identifiers to build: whitespace-separated glob patterns
  #[arg(long, default_value = "")]
  pub build: String,

  /// Identifiers to skip: whitespace-separated glob patterns
  #[arg(long, default_value = "")]
  pub skip: String,

  /// Identifiers to skip in the test phase
  #[arg(long, default_value = "")]
  pub test_skip: String,

  /// Command run once per target before any build
  #[arg(long)]
  pub before_all: Option<String>,

  /// Command run before each build
  #[arg(long)]
  pub before_build: Option<String>,

  /// Command that repairs a built wheel ({wheel}, {dest_dir})
  #[arg(long)]
  pub repair_command: Option<String>,

  /// Command that tests the installed wheel ({project}, {package})
  #[arg(long)]
  pub test_command: Option<String>,

  /// Command run in the test environment before installing the wheel
  #[arg(long)]
  pub before_test: Option<String>,

  /// Extra requirements installed before running tests
  #[arg(long)]
  pub test_requires: Vec<String>,

  /// Extras suffix appended when installing the built wheel, e.g. "[test]"
  #[arg(long, default_value = "")]
  pub test_extras: String,

  /// pip constraints file applied to the test environment install
  #[arg(long)]
  pub constraints: Option<PathBuf>,

  /// Front-end used to build native wheels
  #[arg(long, value_enum, default_value_t)]
  pub frontend: FrontendArg,

  /// Front-end verbosity: positive for repeated -v, negative for -q
  #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
  pub build_verbosity: i32,

  /// Cross-compile for this architecture instead of emulating it
  #[arg(long)]
  pub cross_compile: Option<Arch>,

  /// Environment overrides applied inside the containers (NAME=value,
  /// values may reference existing variables)
  #[arg(long = "env", value_name = "NAME=VALUE")]
  pub env: Vec<String>,

  /// Image overrides (KEY=IMAGE; `wheelsmith targets` lists the keys)
  #[arg(long = "image", value_name = "KEY=IMAGE")]
  pub image: Vec<String>,
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let options = resolve_options(&args)?;
  let engine = DockerEngine::new();
  let mut log = ConsoleLogger::new();

  let rt = tokio::runtime::Runtime::new().context("failed to create async runtime")?;
  match rt.block_on(pipeline::build(&engine, &options, &mut log)) {
    Ok(()) => {
      info!(output_dir = %options.output_dir.display(), "all targets built");
      output::print_success(&format!("Wheels available in {}", options.output_dir.display()));
      Ok(())
    }
    Err(error) => {
      let code = report::diagnose(&error, &options.package_dir, &mut log);
      std::process::exit(code);
    }
  }
}

fn resolve_options(args: &BuildArgs) -> Result<BuildOptions> {
  let mut options = BuildOptions::new(&args.package_dir, &args.output_dir);

  if !args.archs.is_empty() {
    options.architectures = args.archs.iter().copied().collect();
  }
  options.build_selector = Selector::new(&args.build, &args.skip);
  options.test_selector = Selector::new("", &args.test_skip);

  for pair in &args.env {
    let (name, value) = pair
      .split_once('=')
      .with_context(|| format!("invalid --env '{}', expected NAME=VALUE", pair))?;
    options.environment.push(name, value);
  }
  for pair in &args.image {
    let (key, image) = pair
      .split_once('=')
      .with_context(|| format!("invalid --image '{}', expected KEY=IMAGE", pair))?;
    options.manylinux_images.insert(key.to_string(), image.to_string());
  }

  options.before_all = args.before_all.clone();
  options.before_build = args.before_build.clone();
  options.repair_command = args.repair_command.clone();
  options.test_command = args.test_command.clone();
  options.before_test = args.before_test.clone();
  options.test_requires = args.test_requires.clone();
  options.test_extras = args.test_extras.clone();
  options.dependency_constraints = args.constraints.clone();
  options.build_frontend = match args.frontend {
    FrontendArg::Pip => BuildFrontend::Pip,
    FrontendArg::Build => BuildFrontend::Build,
  };
  options.build_verbosity = args.build_verbosity;
  options.cross_compile_arch = args.cross_compile;

  Ok(options)
}
