//! Types and errors for the build pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::container::ContainerError;
use crate::cross::CrossError;
use crate::ident::{IdentError, PlatformTag};
use crate::manifest::ManifestError;

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Container(#[from] ContainerError),

  #[error(transparent)]
  Cross(#[from] CrossError),

  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Ident(#[from] IdentError),

  /// The package directory must be the working directory or inside it, so
  /// it has a path relative to the project mount.
  #[error("package directory must be inside the working directory: {}", package_dir.display())]
  PackageDirOutsideProject { package_dir: PathBuf },

  /// A declared target references an image key the options don't provide.
  #[error("no container image configured for key '{0}'")]
  MissingImage(String),

  /// The resolved tool on PATH is not the configured one. Usually caused by
  /// a user environment override inserting another interpreter first.
  #[error(
    "{tool} available on PATH doesn't match the configured instance (expected {}, got {found}); \
     if you have modified PATH, ensure that you don't overwrite the configured entry or insert \
     another {tool} above it",
    expected.display()
  )]
  PathPrecedence {
    tool: String,
    expected: PathBuf,
    found: String,
  },

  /// The build phase must produce exactly one wheel.
  #[error("expected exactly one wheel in {}, found {count}", dir.display())]
  WheelCount { dir: PathBuf, count: usize },

  /// The build produced a platform-independent wheel where a platform
  /// wheel was required; the project is misconfigured.
  #[error(
    "the produced wheel '{wheel}' is platform-independent (none-any); check that the package \
     actually builds a native extension"
  )]
  NonPlatformWheel { wheel: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// One declared (interpreter prefix, platform, image) combination.
#[derive(Debug, Clone, Serialize)]
pub struct BuildTarget {
  /// Identifier prefix configurations must carry to build on this target.
  pub prefix: String,
  pub platform_tag: PlatformTag,
  pub image: String,
  pub is_cross: bool,
}

/// The fixed declared target list, crossed with the configured images.
pub fn declared_targets(
  images: &BTreeMap<String, String>,
) -> Result<Vec<BuildTarget>, PipelineError> {
  const ROWS: [(&str, PlatformTag, &str); 9] = [
    ("cp", PlatformTag::ManylinuxX86_64, "x86_64"),
    ("cp", PlatformTag::ManylinuxI686, "i686"),
    ("cp", PlatformTag::ManylinuxAarch64, "aarch64"),
    ("xc", PlatformTag::ManylinuxAarch64, "xc_aarch64"),
    ("cp", PlatformTag::ManylinuxPpc64le, "ppc64le"),
    ("cp", PlatformTag::ManylinuxS390x, "s390x"),
    ("pp", PlatformTag::ManylinuxX86_64, "pypy_x86_64"),
    ("pp", PlatformTag::ManylinuxAarch64, "pypy_aarch64"),
    ("pp", PlatformTag::ManylinuxI686, "pypy_i686"),
  ];

  ROWS
    .into_iter()
    .map(|(prefix, platform_tag, image_key)| {
      let image = images
        .get(image_key)
        .ok_or_else(|| PipelineError::MissingImage(image_key.to_string()))?;
      Ok(BuildTarget {
        prefix: prefix.to_string(),
        platform_tag,
        image: image.clone(),
        is_cross: prefix == "xc",
      })
    })
    .collect()
}

/// A single build output, carried through repair and test.
#[derive(Debug, Clone)]
pub struct Artifact {
  pub path: PathBuf,
  pub file_name: String,
}

impl Artifact {
  /// The single artifact among glob matches.
  ///
  /// Matches are sorted before picking so the choice is deterministic even
  /// though the underlying listing order is not.
  pub fn sole_match(dir: &Path, mut matches: Vec<PathBuf>) -> Result<Self, PipelineError> {
    matches.sort();
    if matches.len() != 1 {
      return Err(PipelineError::WheelCount {
        dir: dir.to_path_buf(),
        count: matches.len(),
      });
    }
    let path = matches.remove(0);
    let file_name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    Ok(Self { path, file_name })
  }

  /// Reject wheels whose platform component signals "works everywhere".
  pub fn ensure_platform_specific(&self) -> Result<(), PipelineError> {
    if self.file_name.ends_with("none-any.whl") {
      return Err(PipelineError::NonPlatformWheel {
        wheel: self.file_name.clone(),
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::options::default_images;

  #[test]
  fn declared_targets_cover_all_rows() {
    let targets = declared_targets(&default_images()).unwrap();
    assert_eq!(targets.len(), 9);
    assert_eq!(targets.iter().filter(|t| t.is_cross).count(), 1);
    let cross = targets.iter().find(|t| t.is_cross).unwrap();
    assert_eq!(cross.prefix, "xc");
    assert_eq!(cross.platform_tag, PlatformTag::ManylinuxAarch64);
  }

  #[test]
  fn missing_image_key_is_an_error() {
    let mut images = default_images();
    images.remove("s390x");
    assert!(matches!(
      declared_targets(&images),
      Err(PipelineError::MissingImage(key)) if key == "s390x"
    ));
  }

  #[test]
  fn sole_match_sorts_before_picking() {
    let dir = PathBuf::from("/tmp/built");
    let err = Artifact::sole_match(
      &dir,
      vec![PathBuf::from("/tmp/built/b.whl"), PathBuf::from("/tmp/built/a.whl")],
    );
    assert!(matches!(err, Err(PipelineError::WheelCount { count: 2, .. })));

    let artifact =
      Artifact::sole_match(&dir, vec![PathBuf::from("/tmp/built/demo-1.0-cp39-cp39-manylinux_x86_64.whl")])
        .unwrap();
    assert_eq!(artifact.file_name, "demo-1.0-cp39-cp39-manylinux_x86_64.whl");
  }

  #[test]
  fn zero_matches_is_an_error() {
    let dir = PathBuf::from("/tmp/built");
    assert!(matches!(
      Artifact::sole_match(&dir, vec![]),
      Err(PipelineError::WheelCount { count: 0, .. })
    ));
  }

  #[test]
  fn none_any_wheel_is_rejected() {
    let artifact = Artifact {
      path: PathBuf::from("/tmp/built/demo-1.0-py3-none-any.whl"),
      file_name: "demo-1.0-py3-none-any.whl".to_string(),
    };
    assert!(matches!(
      artifact.ensure_platform_specific(),
      Err(PipelineError::NonPlatformWheel { .. })
    ));
  }

  #[test]
  fn platform_wheel_is_accepted() {
    let artifact = Artifact {
      path: PathBuf::from("/tmp/built/demo-1.0-cp39-cp39-manylinux_x86_64.whl"),
      file_name: "demo-1.0-cp39-cp39-manylinux_x86_64.whl".to_string(),
    };
    assert!(artifact.ensure_platform_specific().is_ok());
  }
}
