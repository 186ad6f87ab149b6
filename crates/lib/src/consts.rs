//! Fixed path conventions shared between the host and build containers.

pub const APP_NAME: &str = "wheelsmith";

/// Mount point of the project tree inside every build container.
pub const PROJECT_DIR: &str = "/project";

/// Directory inside the primary container where repaired wheels are
/// collected before being copied back to the host.
pub const OUTPUT_DIR: &str = "/output";

/// Scratch root for intermediate build/repair artifacts.
pub const SCRATCH_DIR: &str = "/tmp/wheelsmith";

/// Location of the dependency constraints file inside the container.
pub const CONSTRAINTS_FILE: &str = "/constraints.txt";

/// Interpreter used to run `before_all`, before any per-configuration
/// interpreter has been put on PATH.
pub const BEFORE_ALL_PYTHON_BIN: &str = "/opt/python/cp38-cp38/bin";

/// Helper script shipped in cross images that installs target-native
/// packages into a throwaway container.
pub const INSTALL_DEPS_SCRIPT: &str = "install_deps.sh";

/// Helper script shipped in cross images that repairs a wheel against the
/// relayed toolchain dependency root.
pub const REPAIR_SCRIPT: &str = "repair_wheel.sh";
