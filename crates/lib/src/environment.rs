//! User environment overrides.
//!
//! Overrides are an ordered list of `NAME=value` assignments layered onto a
//! container's environment snapshot. Values may reference variables already
//! present in the map (`$NAME` or `${NAME}`), so `PATH=/extra/bin:$PATH`
//! composes with whatever the pipeline has set up so far. Overrides that
//! insert another interpreter ahead of the configured one are exactly what
//! the pipeline's PATH-precedence check catches.

use std::collections::BTreeMap;

/// Ordered `NAME=value` assignments applied onto an environment map.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentAssignments {
  assignments: Vec<(String, String)>,
}

impl EnvironmentAssignments {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, name: impl Into<String>, value_template: impl Into<String>) {
    self.assignments.push((name.into(), value_template.into()));
  }

  pub fn is_empty(&self) -> bool {
    self.assignments.is_empty()
  }

  /// Apply every assignment in order, expanding variable references against
  /// the map as built so far.
  pub fn apply(&self, env: &mut BTreeMap<String, String>) {
    for (name, template) in &self.assignments {
      let value = expand(template, env);
      env.insert(name.clone(), value);
    }
  }
}

/// Expand `$NAME` and `${NAME}` references. Unset variables expand to the
/// empty string, as a shell would.
fn expand(template: &str, env: &BTreeMap<String, String>) -> String {
  let mut out = String::with_capacity(template.len());
  let mut chars = template.char_indices().peekable();

  while let Some((_, c)) = chars.next() {
    if c != '$' {
      out.push(c);
      continue;
    }
    match chars.peek() {
      Some(&(_, '{')) => {
        chars.next();
        let mut name = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            closed = true;
            break;
          }
          name.push(c);
        }
        if closed {
          out.push_str(env.get(&name).map(String::as_str).unwrap_or(""));
        } else {
          // Unterminated brace: keep the literal text.
          out.push_str("${");
          out.push_str(&name);
        }
      }
      Some(&(_, c)) if c.is_ascii_alphanumeric() || c == '_' => {
        let mut name = String::new();
        while let Some(&(_, c)) = chars.peek() {
          if c.is_ascii_alphanumeric() || c == '_' {
            name.push(c);
            chars.next();
          } else {
            break;
          }
        }
        out.push_str(env.get(&name).map(String::as_str).unwrap_or(""));
      }
      _ => out.push('$'),
    }
  }

  out
}
