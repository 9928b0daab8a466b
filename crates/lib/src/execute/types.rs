//! Types for command execution.

use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::mount::MountError;

/// A command that could not be started or did not exit cleanly.
#[derive(Debug, Error)]
pub enum ExecError {
  /// The process (or the jail tool wrapping it) could not be spawned.
  #[error("failed to start `{command}` in `{environment}`: {source}")]
  Spawn {
    command: String,
    environment: String,
    #[source]
    source: io::Error,
  },

  /// The command ran and exited with a non-zero code.
  #[error("`{command}` in `{environment}` exited with code {code}")]
  NonZero {
    command: String,
    environment: String,
    code: i32,
  },

  /// The command was terminated by a signal.
  #[error("`{command}` in `{environment}` was killed by signal {signal}")]
  Signaled {
    command: String,
    environment: String,
    signal: i32,
  },
}

impl ExecError {
  /// Exit code a shell would report for this failure.
  pub fn exit_code(&self) -> i32 {
    match self {
      ExecError::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound => 127,
      ExecError::Spawn { .. } => 126,
      ExecError::NonZero { code, .. } => *code,
      ExecError::Signaled { signal, .. } => 128 + signal,
    }
  }
}

/// Outcome of one execution that got as far as running something.
///
/// The command's own result and the teardown of its binding are kept apart
/// so a failed unmount never hides, or is hidden by, a failed command.
#[derive(Debug)]
pub struct RunOutcome {
  pub status: Result<ExitStatus, ExecError>,
  /// Always `Ok` for host execution, which binds nothing.
  pub release: Result<(), MountError>,
}
