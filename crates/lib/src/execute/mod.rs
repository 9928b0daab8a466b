//! Chroot executor.
//!
//! Runs a resolved command either directly on the host or inside a jailed
//! root. Jailed runs are wrapped in a binding from the
//! [`BindMountManager`], so the caller's working directory is visible at the
//! configured mount point and the command starts there.
//!
//! Inside the jail the command is launched by a fixed wrapper script that
//! receives the mount point, program and arguments as positional
//! parameters. No value the user typed is ever part of script text.

pub mod types;

use std::path::Path;
use std::process::ExitStatus;

use tracing::{debug, info};

use crate::config::{Config, Tools};
use crate::locate::SCRIPT_NAME;
use crate::mount::{BindMountManager, MountError, Mounter};
use crate::process::{Invocation, ProcessRunner, path_arg};
use crate::registry::Environment;

pub use types::{ExecError, RunOutcome};

/// `cd` to `$1`, drop it, and exec the rest of the argument vector.
pub const WRAPPER_SCRIPT: &str = r#"cd -- "$1" && shift && exec "$@""#;

/// The jail tool invocation that enters `env`, or `None` for the host.
///
/// The jail tool gets the configured in-jail `PATH`, so both the wrapper and
/// the probe search the root's own directories.
pub fn enter(env: &Environment, tools: &Tools) -> Option<Invocation> {
  let program = tools.jail_program(env.isolation())?;
  let root = env.root()?;
  Some(
    Invocation::new(program)
      .arg(path_arg(root))
      .env("PATH", &tools.jail_path),
  )
}

pub struct Executor<'a, R, M> {
  config: &'a Config,
  runner: R,
  mounts: BindMountManager<M>,
}

impl<'a, R: ProcessRunner, M: Mounter> Executor<'a, R, M> {
  pub fn new(config: &'a Config, runner: R, mounter: M) -> Self {
    Self {
      config,
      runner,
      mounts: BindMountManager::new(&config.mount_point, mounter),
    }
  }

  pub fn mounts(&self) -> &BindMountManager<M> {
    &self.mounts
  }

  /// Run `program` with `args` in `env`, starting in `working_directory`.
  ///
  /// For a jailed environment, `Err` means the binding could not be
  /// established and nothing ran.
  pub fn run(
    &self,
    env: &Environment,
    program: &str,
    args: &[String],
    working_directory: &Path,
  ) -> Result<RunOutcome, MountError> {
    if env.is_host() {
      return Ok(RunOutcome {
        status: self.run_on_host(env, program, args, working_directory),
        release: Ok(()),
      });
    }
    self.run_in_environment(env, program, args, working_directory)
  }

  /// Run on the host with `working_directory` as cwd. No mounts involved.
  pub fn run_on_host(
    &self,
    env: &Environment,
    program: &str,
    args: &[String],
    working_directory: &Path,
  ) -> Result<ExitStatus, ExecError> {
    let invocation = Invocation::new(program).args(args).current_dir(working_directory);
    info!(env = %env, cmd = %invocation.display(), "running on host");
    self.spawn(env, program, &invocation)
  }

  /// Bind `working_directory` into `env`, run there, unbind.
  ///
  /// The host has no root to enter and is refused before any mount.
  pub fn run_in_environment(
    &self,
    env: &Environment,
    program: &str,
    args: &[String],
    working_directory: &Path,
  ) -> Result<RunOutcome, MountError> {
    let Some(jail) = enter(env, &self.config.tools) else {
      return Err(MountError::HostEnvironment(env.name().to_string()));
    };

    let scoped = self.mounts.with_binding(env, working_directory, |binding| {
      let invocation = self.jailed_invocation(jail, &binding.mount_point, program, args);
      info!(env = %env, cmd = %invocation.display(), "running in jail");
      self.spawn(env, program, &invocation)
    })?;

    Ok(RunOutcome {
      status: scoped.value,
      release: scoped.release,
    })
  }

  /// `<jail tool> <root> <shell> -c <wrapper> jailsh <mount point> <program> <args...>`
  pub(crate) fn jailed_invocation(
    &self,
    jail: Invocation,
    mount_point: &Path,
    program: &str,
    args: &[String],
  ) -> Invocation {
    jail
      .arg(&self.config.tools.shell)
      .args(["-c", WRAPPER_SCRIPT, SCRIPT_NAME])
      .arg(path_arg(mount_point))
      .arg(program)
      .args(args)
  }

  fn spawn(&self, env: &Environment, program: &str, invocation: &Invocation) -> Result<ExitStatus, ExecError> {
    let status = self.runner.run(invocation).map_err(|source| ExecError::Spawn {
      command: program.to_string(),
      environment: env.name().to_string(),
      source,
    })?;
    debug!(env = %env, status = %status, "process exited");
    check_status(env, program, status)
  }
}

fn check_status(env: &Environment, program: &str, status: ExitStatus) -> Result<ExitStatus, ExecError> {
  if status.success() {
    return Ok(status);
  }

  if let Some(code) = status.code() {
    return Err(ExecError::NonZero {
      command: program.to_string(),
      environment: env.name().to_string(),
      code,
    });
  }

  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    Err(ExecError::Signaled {
      command: program.to_string(),
      environment: env.name().to_string(),
      signal: status.signal().unwrap_or_default(),
    })
  }

  #[cfg(not(unix))]
  {
    Err(ExecError::NonZero {
      command: program.to_string(),
      environment: env.name().to_string(),
      code: -1,
    })
  }
}
