mod envs;
mod shell;
mod which;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use jailsh_lib::config::Config;

pub use envs::cmd_envs;
pub use shell::{cmd_line, cmd_shell};
pub use which::cmd_which;

/// Load `path` if given, otherwise the discovered or built-in config.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
  match path {
    Some(path) => Config::load(path).with_context(|| format!("Failed to load config {}", path.display())),
    None => Config::discover().context("Failed to load config"),
  }
}

/// Process exit code for a shell-style status.
fn exit_code(code: i32) -> ExitCode {
  ExitCode::from(status_byte(code))
}

/// Out-of-range statuses become 1.
fn status_byte(code: i32) -> u8 {
  u8::try_from(code).unwrap_or(1)
}
