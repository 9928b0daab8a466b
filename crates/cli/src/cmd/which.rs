//! Which command implementation.
//!
//! Runs the locator alone: every environment that has the command is
//! printed, nothing is executed or mounted.

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};

use jailsh_lib::config::Config;
use jailsh_lib::locate::Locator;
use jailsh_lib::process::SystemRunner;

use crate::output::{OutputFormat, pad, print_error, print_json};

pub fn cmd_which(config: &Config, name: &str, format: OutputFormat) -> Result<ExitCode> {
  let cwd = env::current_dir().context("Failed to read current directory")?;
  let locations = Locator::new(config, SystemRunner).locate(name, &cwd);

  if format.is_json() {
    print_json(&locations)?;
  } else if locations.is_empty() {
    print_error(&format!("{}: command not found", name));
  } else {
    let width = locations
      .iter()
      .map(|l| l.environment.name().len())
      .max()
      .unwrap_or(0);
    for location in &locations {
      println!("{}  {}", pad(location.environment.name(), width), location.resolved_path);
    }
  }

  if locations.is_empty() {
    Ok(ExitCode::FAILURE)
  } else {
    Ok(ExitCode::SUCCESS)
  }
}
