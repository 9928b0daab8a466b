mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::{OutputFormat, print_error};

/// jsh - run commands across the host and its chroot environments
#[derive(Parser)]
#[command(name = "jsh")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to the config file (default: $JAILSH_CONFIG, then the user config dir)
  #[arg(long, global = true, value_name = "PATH")]
  config: Option<PathBuf>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Run a single line and exit with its status
  #[arg(short = 'c', value_name = "LINE")]
  line: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// List the registered environments
  Envs {
    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
  },

  /// Show every environment that provides a command
  Which {
    /// Command name to look up
    name: String,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::from_default_env()
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli) {
    Ok(code) => code,
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<ExitCode> {
  let config = cmd::load_config(cli.config.as_deref())?;

  match (cli.command, cli.line) {
    (Some(_), Some(_)) => anyhow::bail!("-c cannot be combined with a subcommand"),
    (Some(Commands::Envs { format }), None) => cmd::cmd_envs(&config, format),
    (Some(Commands::Which { name, format }), None) => cmd::cmd_which(&config, &name, format),
    (None, Some(line)) => cmd::cmd_line(&config, &line),
    (None, None) => cmd::cmd_shell(&config),
  }
}
