//! Build/test selection over identifiers.
//!
//! A `Selector` decides whether a given build identifier participates in a
//! phase. Patterns are whitespace-separated shell-style globs (`*` and `?`);
//! an identifier is selected when it matches any build pattern and no skip
//! pattern.

/// Predicate over build identifiers.
#[derive(Debug, Clone)]
pub struct Selector {
  build_patterns: Vec<String>,
  skip_patterns: Vec<String>,
}

impl Selector {
  /// Selects every identifier.
  pub fn all() -> Self {
    Self {
      build_patterns: vec!["*".to_string()],
      skip_patterns: vec![],
    }
  }

  /// Build a selector from whitespace-separated pattern lists.
  ///
  /// An empty `build` string means "everything".
  pub fn new(build: &str, skip: &str) -> Self {
    let mut build_patterns: Vec<String> = build.split_whitespace().map(str::to_string).collect();
    if build_patterns.is_empty() {
      build_patterns.push("*".to_string());
    }
    let skip_patterns = skip.split_whitespace().map(str::to_string).collect();
    Self {
      build_patterns,
      skip_patterns,
    }
  }

  pub fn matches(&self, identifier: &str) -> bool {
    self.build_patterns.iter().any(|p| glob_match(p, identifier))
      && !self.skip_patterns.iter().any(|p| glob_match(p, identifier))
  }
}

impl Default for Selector {
  fn default() -> Self {
    Self::all()
  }
}

/// Match `text` against a glob `pattern` supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
  let pattern: Vec<char> = pattern.chars().collect();
  let text: Vec<char> = text.chars().collect();

  // Iterative wildcard matching with backtracking over the last `*`.
  let (mut p, mut t) = (0usize, 0usize);
  let mut star: Option<(usize, usize)> = None;

  while t < text.len() {
    if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
      p += 1;
      t += 1;
    } else if p < pattern.len() && pattern[p] == '*' {
      star = Some((p, t));
      p += 1;
    } else if let Some((sp, st)) = star {
      p = sp + 1;
      t = st + 1;
      star = Some((sp, st + 1));
    } else {
      return false;
    }
  }

  while p < pattern.len() && pattern[p] == '*' {
    p += 1;
  }
  p == pattern.len()
}
