//! Build options.
//!
//! `BuildOptions` is the fully-resolved input to the pipeline; flag parsing
//! and config-file handling live in the CLI crate.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::environment::EnvironmentAssignments;
use crate::platform::Arch;
use crate::select::Selector;

/// The tool invoked to produce the wheel from source for native targets.
///
/// Cross-compiled targets always use a legacy `setup.py bdist_wheel`
/// invocation instead; neither front-end is reliable under the cross shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildFrontend {
  /// `python -m pip wheel --no-deps`
  #[default]
  Pip,
  /// `python -m build --wheel`
  Build,
}

impl BuildFrontend {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pip => "pip",
      Self::Build => "build",
    }
  }
}

/// Fully-resolved options for one pipeline run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  /// Directory containing the package to build. Must be the working
  /// directory or inside it.
  pub package_dir: PathBuf,
  /// Host directory repaired wheels are copied into.
  pub output_dir: PathBuf,
  pub build_selector: Selector,
  pub test_selector: Selector,
  /// Architectures to build for.
  pub architectures: BTreeSet<Arch>,
  /// Container image per image key (see `default_images`).
  pub manylinux_images: BTreeMap<String, String>,
  /// When set, wheels for this architecture are produced by the cross
  /// toolchain target instead of emulation.
  pub cross_compile_arch: Option<Arch>,
  /// User environment overrides, applied after the pipeline's own PATH
  /// composition.
  pub environment: EnvironmentAssignments,
  pub before_all: Option<String>,
  pub before_build: Option<String>,
  pub repair_command: Option<String>,
  pub test_command: Option<String>,
  pub before_test: Option<String>,
  pub test_requires: Vec<String>,
  /// Extras suffix appended to the wheel spec when installing for tests,
  /// e.g. `[test]`.
  pub test_extras: String,
  /// Optional pip constraints file, copied into the container and passed to
  /// the test-environment install.
  pub dependency_constraints: Option<PathBuf>,
  pub build_frontend: BuildFrontend,
  /// Verbosity for the build front-end: positive for repeated `-v`,
  /// negative for repeated `-q`.
  pub build_verbosity: i32,
}

impl BuildOptions {
  /// Options with defaults for everything but the package and output
  /// directories.
  pub fn new(package_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
    let mut architectures = BTreeSet::new();
    if let Some(arch) = Arch::current() {
      architectures.insert(arch);
    }
    Self {
      package_dir: package_dir.into(),
      output_dir: output_dir.into(),
      build_selector: Selector::all(),
      test_selector: Selector::all(),
      architectures,
      manylinux_images: default_images(),
      cross_compile_arch: None,
      environment: EnvironmentAssignments::new(),
      before_all: None,
      before_build: None,
      repair_command: None,
      test_command: None,
      before_test: None,
      test_requires: vec![],
      test_extras: String::new(),
      dependency_constraints: None,
      build_frontend: BuildFrontend::default(),
      build_verbosity: 0,
    }
  }
}

/// Image keys recognized in `BuildOptions::manylinux_images`.
pub const IMAGE_KEYS: [&str; 9] = [
  "x86_64",
  "i686",
  "aarch64",
  "xc_aarch64",
  "ppc64le",
  "s390x",
  "pypy_x86_64",
  "pypy_aarch64",
  "pypy_i686",
];

/// Default build image per image key.
pub fn default_images() -> BTreeMap<String, String> {
  [
    ("x86_64", "quay.io/pypa/manylinux2014_x86_64"),
    ("i686", "quay.io/pypa/manylinux2014_i686"),
    ("aarch64", "quay.io/pypa/manylinux2014_aarch64"),
    ("xc_aarch64", "quay.io/pypa/manylinux2014_xc_aarch64"),
    ("ppc64le", "quay.io/pypa/manylinux2014_ppc64le"),
    ("s390x", "quay.io/pypa/manylinux2014_s390x"),
    ("pypy_x86_64", "quay.io/pypa/manylinux2014_x86_64"),
    ("pypy_aarch64", "quay.io/pypa/manylinux2014_aarch64"),
    ("pypy_i686", "quay.io/pypa/manylinux2014_i686"),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_string(), v.to_string()))
  .collect()
}

/// Render the verbosity level as front-end flags.
pub fn build_verbosity_flags(verbosity: i32) -> Vec<String> {
  if verbosity > 0 {
    vec!["-v".to_string(); verbosity.min(3) as usize]
  } else if verbosity < 0 {
    vec!["-q".to_string(); (-verbosity).min(3) as usize]
  } else {
    vec![]
  }
}
