//! CLI output formatting and the console step display.
//!
//! Implements the pipeline's step/build notifications with timing and
//! colored status symbols.

use std::time::{Duration, Instant};

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use wheelsmith_lib::ident;
use wheelsmith_lib::log::StepLogger;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Console implementation of the pipeline's step display.
#[derive(Debug, Default)]
pub struct ConsoleLogger {
  step_started: Option<Instant>,
  build_started: Option<(String, Instant)>,
}

impl ConsoleLogger {
  pub fn new() -> Self {
    Self::default()
  }
}

impl StepLogger for ConsoleLogger {
  fn step(&mut self, description: &str) {
    self.step_end(true);
    println!(
      "{} {}",
      symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
      description
    );
    self.step_started = Some(Instant::now());
  }

  fn step_end(&mut self, success: bool) {
    if let Some(started) = self.step_started.take() {
      let duration = format_duration(started.elapsed());
      if success {
        println!(
          "  {} {}",
          symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
          duration
        );
      } else {
        eprintln!(
          "  {} {}",
          symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
          duration
        );
      }
    }
  }

  fn build_start(&mut self, identifier: &str) {
    // Best-effort description; the pipeline validated the identifier.
    let description = ident::describe(identifier).unwrap_or_else(|_| identifier.to_string());
    println!();
    println!(
      "{}",
      format!("Building {} wheel", identifier).if_supports_color(Stream::Stdout, |s| s.bold())
    );
    println!("{}", description);
    self.build_started = Some((identifier.to_string(), Instant::now()));
  }

  fn build_end(&mut self) {
    self.step_end(true);
    if let Some((identifier, started)) = self.build_started.take() {
      println!(
        "{} {} finished in {}",
        symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
        identifier,
        format_duration(started.elapsed())
      );
    }
  }
}
