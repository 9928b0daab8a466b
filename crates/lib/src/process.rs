//! Process invocations.
//!
//! Every process the engine starts is described by an [`Invocation`]: a
//! program plus an explicit argument vector. Nothing is ever joined into a
//! single string for a shell to re-split, so argument values reach the child
//! exactly as typed.
//!
//! Spawning goes through the [`ProcessRunner`] trait. [`SystemRunner`] is
//! the real implementation; tests substitute a recording fake.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: OsString,
  pub args: Vec<OsString>,
  pub cwd: Option<PathBuf>,
  pub env: Vec<(OsString, OsString)>,
}

impl Invocation {
  pub fn new(program: impl Into<OsString>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
      env: Vec::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
    self.env.push((key.into(), value.into()));
    self
  }

  /// Program followed by its arguments.
  pub fn argv(&self) -> impl Iterator<Item = &OsStr> {
    std::iter::once(self.program.as_os_str()).chain(self.args.iter().map(OsString::as_os_str))
  }

  /// Shell-quoted rendering, for logs only.
  pub fn display(&self) -> String {
    self
      .argv()
      .map(|arg| {
        let arg = arg.to_string_lossy();
        match shlex::try_quote(&arg) {
          Ok(quoted) => quoted.into_owned(),
          Err(_) => format!("{:?}", arg),
        }
      })
      .collect::<Vec<_>>()
      .join(" ")
  }

  fn command(&self) -> Command {
    let mut command = Command::new(&self.program);
    command.args(&self.args);
    if let Some(cwd) = &self.cwd {
      command.current_dir(cwd);
    }
    for (key, value) in &self.env {
      command.env(key, value);
    }
    command
  }
}

/// Starts processes on behalf of the engine.
pub trait ProcessRunner {
  /// Run with the terminal's stdio attached and block until exit.
  fn run(&self, invocation: &Invocation) -> io::Result<ExitStatus>;

  /// Run with stdin closed and stdout/stderr captured.
  fn capture(&self, invocation: &Invocation) -> io::Result<Output>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
  fn run(&self, invocation: &Invocation) -> io::Result<ExitStatus> {
    (**self).run(invocation)
  }

  fn capture(&self, invocation: &Invocation) -> io::Result<Output> {
    (**self).capture(invocation)
  }
}

/// Runs invocations with `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
  fn run(&self, invocation: &Invocation) -> io::Result<ExitStatus> {
    debug!(cmd = %invocation.display(), "spawning process");
    invocation.command().status()
  }

  fn capture(&self, invocation: &Invocation) -> io::Result<Output> {
    debug!(cmd = %invocation.display(), "spawning probe");
    invocation
      .command()
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .output()
  }
}

/// Convert a path to an argument without assuming UTF-8.
pub(crate) fn path_arg(path: &Path) -> OsString {
  path.as_os_str().to_os_string()
}
