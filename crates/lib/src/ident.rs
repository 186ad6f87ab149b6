//! Build identifier parsing.
//!
//! Identifiers name one (interpreter, platform) combination, e.g.
//! `cp39-manylinux_x86_64`. The leading two characters encode the
//! interpreter family (`cp` for CPython, `pp` for PyPy, `xc` for a
//! cross-compiled CPython), followed by the version digits; the identifier
//! ends with the platform tag.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::platform::Arch;

#[derive(Debug, Error)]
pub enum IdentError {
  /// The two-character interpreter prefix is not a recognized family.
  #[error("unknown interpreter in identifier '{identifier}'")]
  UnknownInterpreter { identifier: String },

  /// The identifier does not end in a recognized platform tag.
  #[error("unknown platform in identifier '{identifier}'")]
  UnknownPlatform { identifier: String },

  /// The version digits between prefix and platform tag are malformed.
  #[error("malformed version in identifier '{identifier}'")]
  MalformedVersion { identifier: String },
}

/// Interpreter families that can be named by an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterKind {
  CPython,
  PyPy,
}

impl InterpreterKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::CPython => "CPython",
      Self::PyPy => "PyPy",
    }
  }
}

/// Platform tags a wheel can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformTag {
  ManylinuxX86_64,
  ManylinuxI686,
  ManylinuxAarch64,
  ManylinuxPpc64le,
  ManylinuxS390x,
}

impl PlatformTag {
  pub const ALL: [PlatformTag; 5] = [
    Self::ManylinuxX86_64,
    Self::ManylinuxI686,
    Self::ManylinuxAarch64,
    Self::ManylinuxPpc64le,
    Self::ManylinuxS390x,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ManylinuxX86_64 => "manylinux_x86_64",
      Self::ManylinuxI686 => "manylinux_i686",
      Self::ManylinuxAarch64 => "manylinux_aarch64",
      Self::ManylinuxPpc64le => "manylinux_ppc64le",
      Self::ManylinuxS390x => "manylinux_s390x",
    }
  }

  /// Human-readable description, used when announcing a build.
  pub fn description(&self) -> &'static str {
    match self {
      Self::ManylinuxX86_64 => "Manylinux x86_64",
      Self::ManylinuxI686 => "Manylinux i686",
      Self::ManylinuxAarch64 => "Manylinux aarch64",
      Self::ManylinuxPpc64le => "Manylinux ppc64le",
      Self::ManylinuxS390x => "Manylinux s390x",
    }
  }

  /// The CPU architecture this tag targets.
  pub fn arch(&self) -> Arch {
    match self {
      Self::ManylinuxX86_64 => Arch::X86_64,
      Self::ManylinuxI686 => Arch::I686,
      Self::ManylinuxAarch64 => Arch::Aarch64,
      Self::ManylinuxPpc64le => Arch::Ppc64le,
      Self::ManylinuxS390x => Arch::S390x,
    }
  }
}

impl fmt::Display for PlatformTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A parsed build identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
  pub kind: InterpreterKind,
  /// True when the identifier uses the cross-compiled spelling (`xc`).
  pub cross: bool,
  pub major: u32,
  pub minor: u32,
  pub platform_tag: PlatformTag,
}

impl Identifier {
  /// Parse an identifier such as `cp39-manylinux_x86_64`.
  pub fn parse(identifier: &str) -> Result<Self, IdentError> {
    let (kind, cross) = match identifier.get(..2) {
      Some("cp") => (InterpreterKind::CPython, false),
      Some("pp") => (InterpreterKind::PyPy, false),
      Some("xc") => (InterpreterKind::CPython, true),
      _ => {
        return Err(IdentError::UnknownInterpreter {
          identifier: identifier.to_string(),
        });
      }
    };

    let platform_tag = PlatformTag::ALL
      .into_iter()
      .find(|tag| identifier.ends_with(tag.as_str()))
      .ok_or_else(|| IdentError::UnknownPlatform {
        identifier: identifier.to_string(),
      })?;

    // Version digits follow the prefix, up to the first '-'.
    let digits: String = identifier[2..].chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 2 {
      return Err(IdentError::MalformedVersion {
        identifier: identifier.to_string(),
      });
    }
    let major = digits[..1]
      .parse()
      .map_err(|_| IdentError::MalformedVersion {
        identifier: identifier.to_string(),
      })?;
    let minor = digits[1..]
      .parse()
      .map_err(|_| IdentError::MalformedVersion {
        identifier: identifier.to_string(),
      })?;

    Ok(Self {
      kind,
      cross,
      major,
      minor,
      platform_tag,
    })
  }
}

/// Build a human-readable description from an identifier,
/// e.g. "CPython 3.9 Manylinux x86_64".
pub fn describe(identifier: &str) -> Result<String, IdentError> {
  let parsed = Identifier::parse(identifier)?;
  Ok(format!(
    "{} {}.{} {}",
    parsed.kind.as_str(),
    parsed.major,
    parsed.minor,
    parsed.platform_tag.description()
  ))
}
