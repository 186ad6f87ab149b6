//! Interpreter configuration manifest.
//!
//! The set of interpreters available inside the build images is declared in
//! an embedded TOML document, keyed by OS family. Each record carries the
//! interpreter version, its build identifier, and the interpreter's install
//! path inside the image.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Arch;
use crate::select::Selector;

/// Interpreter configurations shipped in the build images.
const BUILD_PLATFORMS: &str = include_str!("build-platforms.toml");

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to parse interpreter manifest: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("no interpreter configurations declared for OS family '{0}'")]
  UnknownOs(String),
}

/// One interpreter available inside a build image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonConfiguration {
  pub version: String,
  pub identifier: String,
  pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct OsConfigurations {
  python_configurations: Vec<PythonConfiguration>,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
  linux: OsConfigurations,
}

/// Read the declared interpreter configurations for an OS family.
pub fn read_python_configs(os: &str) -> Result<Vec<PythonConfiguration>, ManifestError> {
  let manifest: ManifestFile = toml::from_str(BUILD_PLATFORMS)?;
  match os {
    "linux" => Ok(manifest.linux.python_configurations),
    other => Err(ManifestError::UnknownOs(other.to_string())),
  }
}

/// Return all configurations whose architecture is in `architectures` and
/// which match the build selector.
pub fn matching_configurations(
  selector: &Selector,
  architectures: &BTreeSet<Arch>,
) -> Result<Vec<PythonConfiguration>, ManifestError> {
  let configs = read_python_configs("linux")?;
  Ok(
    configs
      .into_iter()
      .filter(|c| {
        architectures.iter().any(|arch| c.identifier.ends_with(arch.as_str()))
          && selector.matches(&c.identifier)
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ident::Identifier;

  #[test]
  fn manifest_parses_and_is_nonempty() {
    let configs = read_python_configs("linux").unwrap();
    assert!(!configs.is_empty());
  }

  #[test]
  fn every_declared_identifier_is_well_formed() {
    for config in read_python_configs("linux").unwrap() {
      Identifier::parse(&config.identifier)
        .unwrap_or_else(|e| panic!("bad identifier {}: {}", config.identifier, e));
    }
  }

  #[test]
  fn unknown_os_family_is_rejected() {
    assert!(matches!(
      read_python_configs("plan9"),
      Err(ManifestError::UnknownOs(_))
    ));
  }

  #[test]
  fn matching_filters_by_architecture() {
    let archs = BTreeSet::from([Arch::Aarch64]);
    let configs = matching_configurations(&Selector::all(), &archs).unwrap();
    assert!(!configs.is_empty());
    assert!(configs.iter().all(|c| c.identifier.ends_with("aarch64")));
  }

  #[test]
  fn matching_filters_by_selector() {
    let archs = BTreeSet::from([Arch::X86_64]);
    let selector = Selector::new("cp39-*", "");
    let configs = matching_configurations(&selector, &archs).unwrap();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].identifier, "cp39-manylinux_x86_64");
  }

  #[test]
  fn cross_configuration_is_declared_for_aarch64() {
    let configs = read_python_configs("linux").unwrap();
    let xc = configs.iter().find(|c| c.identifier == "xc39-manylinux_aarch64").unwrap();
    // The cross interpreter lives one level below the build interpreter root.
    assert!(xc.path.parent().is_some());
  }
}
