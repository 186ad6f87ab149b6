use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

/// wheelsmith - build manylinux wheels in isolated containers
#[derive(Parser)]
#[command(name = "wheelsmith")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build wheels for every declared target with matching interpreters
  Build(cmd::build::BuildArgs),

  /// List the declared build targets and their images
  Targets {
    #[arg(long, value_enum, default_value_t)]
    format: output::OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::from_default_env()
  };
  tracing_subscriber::fmt().with_env_filter(filter).without_time().init();

  match cli.command {
    Commands::Build(args) => cmd::build::cmd_build(args),
    Commands::Targets { format } => cmd::targets::cmd_targets(format),
  }
}
