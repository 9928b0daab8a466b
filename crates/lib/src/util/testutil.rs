//! Test utilities for jailsh-lib.
//!
//! Fakes for the two privileged seams of the engine: starting processes and
//! touching the mount table. Both record what they were asked to do so tests
//! can assert on argument vectors and on mount/unmount symmetry without root.
//!
//! Environments are recognised by their root: a jail rooted at `/srv/<name>`
//! is `<name>`, and an invocation whose program is the shell is the host.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};

use crate::config::Config;
use crate::mount::Mounter;
use crate::process::{Invocation, ProcessRunner};

/// Registry with `host`, `jailA` (chroot) and `jailB` (layered chroot), and
/// one package manager pinned to each.
pub fn jail_config() -> Config {
  Config::from_toml_str(
    r#"
      [[environment]]
      name = "host"
      isolation = "host"

      [[environment]]
      name = "jailA"
      isolation = "chroot"
      root = "/srv/jailA"

      [[environment]]
      name = "jailB"
      isolation = "layered-chroot"
      root = "/srv/jailB"

      [[manager]]
      name = "jailA-manager"
      environment = "jailA"
      program = "apt"

      [[manager]]
      name = "jailB-manager"
      environment = "jailB"
      program = "pacman"

      [[manager]]
      name = "host-manager"
      environment = "host"
      program = "dnf"
    "#,
  )
  .unwrap()
}

/// Same registry as [`jail_config`] but with every jail rooted under `root`,
/// for tests that need the mount point directory to really be created.
pub fn jail_config_in(root: &Path) -> Config {
  Config::from_toml_str(&format!(
    r#"
      [[environment]]
      name = "host"
      isolation = "host"

      [[environment]]
      name = "jailA"
      isolation = "chroot"
      root = "{root}/jailA"

      [[environment]]
      name = "jailB"
      isolation = "layered-chroot"
      root = "{root}/jailB"

      [[manager]]
      name = "jailA-manager"
      environment = "jailA"
      program = "apt"
    "#,
    root = root.display()
  ))
  .unwrap()
}

/// Wait status for a normal exit with `code`.
pub fn exit_status(code: i32) -> ExitStatus {
  ExitStatus::from_raw(code << 8)
}

pub fn exit_output(code: i32, stdout: &str) -> Output {
  Output {
    status: exit_status(code),
    stdout: stdout.as_bytes().to_vec(),
    stderr: Vec::new(),
  }
}

pub fn ok_output(stdout: &str) -> Output {
  exit_output(0, stdout)
}

enum ProbeReply {
  Output(Output),
  Error,
}

/// Recording [`ProcessRunner`].
///
/// Probes (`capture`) answer from a per-environment table and default to
/// "not found". Runs (`run`) return the configured status, success by
/// default.
pub struct FakeRunner {
  commands: HashMap<(String, String), String>,
  probes: HashMap<String, ProbeReply>,
  run_status: Option<ExitStatus>,
  captured: RefCell<Vec<Invocation>>,
  ran: RefCell<Vec<Invocation>>,
}

impl FakeRunner {
  pub fn new() -> Self {
    Self {
      commands: HashMap::new(),
      probes: HashMap::new(),
      run_status: Some(exit_status(0)),
      captured: RefCell::new(Vec::new()),
      ran: RefCell::new(Vec::new()),
    }
  }

  /// `command` resolves to `path` in environment `env`.
  pub fn with_command(mut self, env: &str, command: &str, path: &str) -> Self {
    self
      .commands
      .insert((env.to_string(), command.to_string()), path.to_string());
    self
  }

  /// Every probe in `env` returns `output`.
  pub fn with_probe_output(mut self, env: &str, output: Output) -> Self {
    self.probes.insert(env.to_string(), ProbeReply::Output(output));
    self
  }

  /// Every probe in `env` fails to start.
  pub fn with_probe_error(mut self, env: &str) -> Self {
    self.probes.insert(env.to_string(), ProbeReply::Error);
    self
  }

  pub fn with_run_status(mut self, code: i32) -> Self {
    self.run_status = Some(exit_status(code));
    self
  }

  /// Runs fail to spawn.
  pub fn with_spawn_failure(mut self) -> Self {
    self.run_status = None;
    self
  }

  pub fn captured(&self) -> Vec<Invocation> {
    self.captured.borrow().clone()
  }

  pub fn ran(&self) -> Vec<Invocation> {
    self.ran.borrow().clone()
  }

  fn environment_of(invocation: &Invocation) -> String {
    if invocation.args.first().map(OsString::as_os_str) == Some(OsStr::new("-c")) {
      return "host".to_string();
    }
    invocation
      .args
      .first()
      .and_then(|root| Path::new(root).file_name())
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default()
  }
}

impl ProcessRunner for FakeRunner {
  fn run(&self, invocation: &Invocation) -> io::Result<ExitStatus> {
    self.ran.borrow_mut().push(invocation.clone());
    self
      .run_status
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file or directory"))
  }

  fn capture(&self, invocation: &Invocation) -> io::Result<Output> {
    self.captured.borrow_mut().push(invocation.clone());

    let env = Self::environment_of(invocation);
    match self.probes.get(&env) {
      Some(ProbeReply::Output(output)) => return Ok(output.clone()),
      Some(ProbeReply::Error) => {
        return Err(io::Error::new(io::ErrorKind::NotFound, "jail tool missing"));
      }
      None => {}
    }

    let command = invocation
      .args
      .last()
      .map(|c| c.to_string_lossy().into_owned())
      .unwrap_or_default();
    match self.commands.get(&(env, command)) {
      Some(path) => Ok(ok_output(&format!("{}\n", path))),
      None => Ok(exit_output(1, "")),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountEvent {
  Bind { source: PathBuf, target: PathBuf },
  Unmount { target: PathBuf },
}

/// Recording [`Mounter`] that keeps a simulated mount table.
#[derive(Default)]
pub struct RecordingMounter {
  fail_bind: bool,
  fail_unmount: Cell<bool>,
  events: RefCell<Vec<MountEvent>>,
  table: RefCell<Vec<PathBuf>>,
}

impl RecordingMounter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing_bind() -> Self {
    Self {
      fail_bind: true,
      ..Self::default()
    }
  }

  pub fn failing_unmount() -> Self {
    Self {
      fail_unmount: Cell::new(true),
      ..Self::default()
    }
  }

  /// Make later unmounts fail or succeed.
  pub fn set_unmount_failure(&self, fail: bool) {
    self.fail_unmount.set(fail);
  }

  pub fn events(&self) -> Vec<MountEvent> {
    self.events.borrow().clone()
  }

  /// Targets currently mounted.
  pub fn mounted(&self) -> Vec<PathBuf> {
    self.table.borrow().clone()
  }

  pub fn bind_count(&self) -> usize {
    self
      .events
      .borrow()
      .iter()
      .filter(|e| matches!(e, MountEvent::Bind { .. }))
      .count()
  }

  pub fn unmount_count(&self) -> usize {
    self
      .events
      .borrow()
      .iter()
      .filter(|e| matches!(e, MountEvent::Unmount { .. }))
      .count()
  }
}

impl Mounter for RecordingMounter {
  fn bind(&self, source: &Path, target: &Path) -> io::Result<()> {
    if self.fail_bind {
      return Err(io::Error::from_raw_os_error(1));
    }
    self.events.borrow_mut().push(MountEvent::Bind {
      source: source.to_path_buf(),
      target: target.to_path_buf(),
    });
    self.table.borrow_mut().push(target.to_path_buf());
    Ok(())
  }

  fn unmount(&self, target: &Path) -> io::Result<()> {
    self.events.borrow_mut().push(MountEvent::Unmount {
      target: target.to_path_buf(),
    });
    if self.fail_unmount.get() {
      return Err(io::Error::from_raw_os_error(16));
    }
    let mut table = self.table.borrow_mut();
    if let Some(pos) = table.iter().rposition(|t| t == target) {
      table.remove(pos);
    }
    Ok(())
  }
}
