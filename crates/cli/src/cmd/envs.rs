//! Envs command implementation.
//!
//! Lists the environment registry in order, followed by the package managers
//! reachable through the install verb.

use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;

use jailsh_lib::config::Config;
use jailsh_lib::dispatch::PackageManager;
use jailsh_lib::registry::Environment;

use crate::output::{OutputFormat, pad, print_info, print_json, print_stat, symbols};

#[derive(Serialize)]
struct EnvsReport<'a> {
  environments: &'a [Environment],
  install_verb: &'a str,
  managers: &'a [PackageManager],
}

pub fn cmd_envs(config: &Config, format: OutputFormat) -> Result<ExitCode> {
  let environments = config.registry.list_environments();

  if format.is_json() {
    print_json(&EnvsReport {
      environments,
      install_verb: &config.install_verb,
      managers: &config.managers,
    })?;
    return Ok(ExitCode::SUCCESS);
  }

  let width = environments.iter().map(|e| e.name().len()).max().unwrap_or(0);
  for env in environments {
    let root = env
      .root()
      .map(|r| r.display().to_string())
      .unwrap_or_else(|| "-".to_string());
    println!(
      "{}  {}  {}",
      pad(env.name(), width),
      pad(env.isolation().as_str(), "layered-chroot".len()),
      root
    );
  }

  if !config.managers.is_empty() {
    println!();
    print_info(&format!("Package managers ({} <manager> ...):", config.install_verb));
    for manager in &config.managers {
      print_stat(
        &manager.name,
        &format!("{} {} {}", manager.program, symbols::ARROW, manager.environment),
      );
    }
  }

  Ok(ExitCode::SUCCESS)
}
