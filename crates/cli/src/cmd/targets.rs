//! Implementation of the `wheelsmith targets` command.

use anyhow::Result;

use wheelsmith_lib::options::default_images;
use wheelsmith_lib::pipeline::declared_targets;

use crate::output::{self, OutputFormat};

/// List the declared build targets with their configured images.
pub fn cmd_targets(format: OutputFormat) -> Result<()> {
  let targets = declared_targets(&default_images()).map_err(|e| anyhow::anyhow!("{}", e))?;

  if format.is_json() {
    output::print_json(&targets)?;
    return Ok(());
  }

  for target in &targets {
    println!(
      "{:<4} {:<20} {}{}",
      target.prefix,
      target.platform_tag,
      target.image,
      if target.is_cross { "  (cross)" } else { "" }
    );
  }
  Ok(())
}
