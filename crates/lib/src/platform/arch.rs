use std::fmt;

use serde::Serialize;

/// CPU architectures a wheel can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
  X86_64,
  I686,
  Aarch64,
  Ppc64le,
  S390x,
}

impl Arch {
  /// Detect the current CPU architecture at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::X86_64),
      "x86" => Some(Self::I686),
      "aarch64" => Some(Self::Aarch64),
      "powerpc64" => Some(Self::Ppc64le),
      "s390x" => Some(Self::S390x),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this architecture
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::I686 => "i686",
      Self::Aarch64 => "aarch64",
      Self::Ppc64le => "ppc64le",
      Self::S390x => "s390x",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl std::str::FromStr for Arch {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "x86_64" => Ok(Self::X86_64),
      "i686" => Ok(Self::I686),
      "aarch64" => Ok(Self::Aarch64),
      "ppc64le" => Ok(Self::Ppc64le),
      "s390x" => Ok(Self::S390x),
      other => Err(format!(
        "unknown architecture '{}' (expected one of x86_64, i686, aarch64, ppc64le, s390x)",
        other
      )),
    }
  }
}
