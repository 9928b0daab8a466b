//! Command locator.
//!
//! Finds every environment that can run a command by asking each one,
//! through its own filesystem and its own `PATH`, where the command lives.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Output};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::execute::enter;
use crate::process::{Invocation, ProcessRunner};
use crate::registry::Environment;

/// PATH search run by `sh -c`. The command name arrives as `$1`, so it is
/// never part of the script text. Names containing a slash are checked as
/// paths; everything else is looked up in the absolute entries of `PATH`.
/// Shell built-ins and aliases are deliberately invisible.
pub const PROBE_SCRIPT: &str = r#"set -f
case $1 in
  */*)
    if [ -f "$1" ] && [ -x "$1" ]; then printf '%s\n' "$1"; exit 0; fi
    exit 1 ;;
esac
IFS=:
for dir in $PATH; do
  case $dir in /*) ;; *) continue ;; esac
  if [ -f "$dir/$1" ] && [ -x "$dir/$1" ]; then printf '%s\n' "$dir/$1"; exit 0; fi
done
exit 1"#;

/// `$0` for the probe and wrapper scripts.
pub(crate) const SCRIPT_NAME: &str = "jailsh";

/// Where a command was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLocation {
  pub environment: Environment,
  pub resolved_path: String,
}

/// Why one environment's probe came back empty. Never leaves this module
/// except in logs: a failed probe is the same as "not here".
#[derive(Debug, Error)]
pub enum ProbeError {
  #[error("failed to start probe: {0}")]
  Spawn(#[from] io::Error),

  #[error("probe exited with {0}")]
  Exit(ExitStatus),

  #[error("probe printed no path")]
  NoOutput,
}

pub struct Locator<'a, R> {
  config: &'a Config,
  runner: R,
}

impl<'a, R: ProcessRunner> Locator<'a, R> {
  pub fn new(config: &'a Config, runner: R) -> Self {
    Self { config, runner }
  }

  /// Probe every environment, in registry order, for `command_name`.
  ///
  /// The result is ordered like the registry and holds one entry per
  /// environment that has the command. It is empty when none does. Probes
  /// never touch the mount table.
  ///
  /// Names containing a slash are host paths: only the host is probed, from
  /// `working_directory`, and a relative match is returned joined onto it.
  pub fn locate(&self, command_name: &str, working_directory: &Path) -> Vec<CommandLocation> {
    let is_path = command_name.contains('/');

    self
      .config
      .registry
      .list_environments()
      .iter()
      .filter(|env| !is_path || env.is_host())
      .filter_map(|env| match self.probe_from(env, command_name, working_directory) {
        Ok(resolved_path) => {
          debug!(env = %env, command = command_name, path = %resolved_path, "command found");
          Some(CommandLocation {
            environment: env.clone(),
            resolved_path,
          })
        }
        Err(err) => {
          debug!(env = %env, command = command_name, error = %err, "command not found in environment");
          None
        }
      })
      .collect()
  }

  /// Run the PATH search inside one environment.
  pub fn probe(&self, env: &Environment, command_name: &str) -> Result<String, ProbeError> {
    let output = self.runner.capture(&self.probe_invocation(env, command_name))?;
    Self::first_line(output)
  }

  fn probe_from(
    &self,
    env: &Environment,
    command_name: &str,
    working_directory: &Path,
  ) -> Result<String, ProbeError> {
    if !env.is_host() {
      return self.probe(env, command_name);
    }

    let invocation = self
      .probe_invocation(env, command_name)
      .current_dir(working_directory);
    let resolved = Self::first_line(self.runner.capture(&invocation)?)?;
    if Path::new(&resolved).is_absolute() {
      return Ok(resolved);
    }
    Ok(working_directory.join(resolved).to_string_lossy().into_owned())
  }

  fn first_line(output: Output) -> Result<String, ProbeError> {
    if !output.status.success() {
      return Err(ProbeError::Exit(output.status));
    }

    String::from_utf8_lossy(&output.stdout)
      .lines()
      .map(str::trim)
      .find(|line| !line.is_empty())
      .map(str::to_string)
      .ok_or(ProbeError::NoOutput)
  }

  fn probe_invocation(&self, env: &Environment, command_name: &str) -> Invocation {
    let tools = &self.config.tools;
    let invocation = match enter(env, tools) {
      Some(jail) => jail.arg(&tools.shell),
      None => Invocation::new(&tools.shell),
    };

    invocation.args(["-c", PROBE_SCRIPT, SCRIPT_NAME, command_name])
  }
}
