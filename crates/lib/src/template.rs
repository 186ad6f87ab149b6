//! Command templating.
//!
//! User-supplied hook commands may reference well-known paths through
//! `{name}` placeholders (`{project}`, `{package}`, `{wheel}`, `{dest_dir}`).
//! `prepare` substitutes them and returns a ready-to-execute shell string.

use std::path::Path;

/// Substitute `{name}` placeholders in a raw command template.
///
/// Unknown placeholders are left untouched.
pub fn prepare(template: &str, substitutions: &[(&str, &Path)]) -> String {
  let mut prepared = template.to_string();
  for (name, path) in substitutions {
    prepared = prepared.replace(&format!("{{{}}}", name), &path.display().to_string());
  }
  prepared
}
