//! One turn of the shell: a single input line, from parsing to exit.
//!
//! ```text
//! Received -> Dispatched                              -> Idle
//! Received -> Located -> Disambiguated -> Executed    -> Idle
//! ```
//!
//! The reserved install verb is checked first and wins over any command of
//! the same name. Everything else is located across all environments,
//! narrowed to one by the [`Disambiguator`], and run there.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::execute::{ExecError, Executor, RunOutcome};
use crate::locate::{CommandLocation, Locator};
use crate::mount::{MountError, Mounter};
use crate::process::ProcessRunner;
use crate::select::{Disambiguator, SelectError};

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
  pub command_name: String,
  pub arguments: Vec<String>,
  pub working_directory: PathBuf,
}

impl ExecutionRequest {
  /// Split `line` with POSIX-style quoting. A blank line yields `None`.
  pub fn parse(line: &str, working_directory: &Path) -> Result<Option<Self>, TurnError> {
    let mut words = shlex::split(line).ok_or_else(|| TurnError::Parse(line.to_string()))?;
    if words.is_empty() {
      return Ok(None);
    }
    let command_name = words.remove(0);
    Ok(Some(Self {
      command_name,
      arguments: words,
      working_directory: working_directory.to_path_buf(),
    }))
  }
}

#[derive(Debug, Error)]
pub enum TurnError {
  #[error("{0}: command not found")]
  CommandNotFound(String),

  #[error("invalid choice {input:?}: expected a number from 1 to {count}")]
  InvalidDisambiguationChoice { input: String, count: usize },

  #[error("failed to read choice: {0}")]
  Prompt(#[source] io::Error),

  #[error(transparent)]
  MountAcquire(MountError),

  #[error(transparent)]
  MountRelease(MountError),

  #[error(transparent)]
  Execution(#[from] ExecError),

  #[error(transparent)]
  Dispatch(#[from] DispatchError),

  #[error("unbalanced quotes in {0:?}")]
  Parse(String),
}

impl TurnError {
  /// Exit code for a one-shot run that ended with this error.
  pub fn exit_code(&self) -> i32 {
    match self {
      TurnError::CommandNotFound(_) => 127,
      TurnError::Execution(err) => err.exit_code(),
      _ => 1,
    }
  }
}

impl From<MountError> for TurnError {
  fn from(err: MountError) -> Self {
    match err {
      MountError::Release { .. } => TurnError::MountRelease(err),
      _ => TurnError::MountAcquire(err),
    }
  }
}

impl From<SelectError> for TurnError {
  fn from(err: SelectError) -> Self {
    match err {
      SelectError::NotFound(command) => TurnError::CommandNotFound(command),
      SelectError::InvalidChoice { input, count } => TurnError::InvalidDisambiguationChoice { input, count },
      SelectError::Io(source) => TurnError::Prompt(source),
    }
  }
}

/// Every error one turn produced, in the order they happened. The command's
/// own failure, if any, comes before the failure to release its binding.
#[derive(Debug)]
pub struct TurnFailure {
  pub errors: Vec<TurnError>,
}

impl TurnFailure {
  pub fn exit_code(&self) -> i32 {
    self.errors.first().map_or(1, TurnError::exit_code)
  }
}

impl From<TurnError> for TurnFailure {
  fn from(err: TurnError) -> Self {
    Self { errors: vec![err] }
  }
}

impl fmt::Display for TurnFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, err) in self.errors.iter().enumerate() {
      if i > 0 {
        writeln!(f)?;
      }
      write!(f, "{}", err)?;
    }
    Ok(())
  }
}

impl std::error::Error for TurnFailure {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
  /// Blank line. Nothing ran.
  Idle,
  Executed {
    environment: String,
    resolved_path: String,
    status: ExitStatus,
  },
  Dispatched {
    manager: String,
    environment: String,
    status: ExitStatus,
  },
}

impl TurnOutcome {
  pub fn exit_code(&self) -> i32 {
    match self {
      TurnOutcome::Idle => 0,
      TurnOutcome::Executed { status, .. } | TurnOutcome::Dispatched { status, .. } => {
        status.code().unwrap_or_default()
      }
    }
  }
}

pub struct Engine<'a, R, M> {
  locator: Locator<'a, R>,
  executor: Executor<'a, R, M>,
  dispatcher: Dispatcher<'a>,
}

impl<'a, R: ProcessRunner + Clone, M: Mounter> Engine<'a, R, M> {
  pub fn new(config: &'a Config, runner: R, mounter: M) -> Self {
    Self {
      locator: Locator::new(config, runner.clone()),
      executor: Executor::new(config, runner, mounter),
      dispatcher: Dispatcher::new(config),
    }
  }

  pub fn locator(&self) -> &Locator<'a, R> {
    &self.locator
  }

  pub fn executor(&self) -> &Executor<'a, R, M> {
    &self.executor
  }

  /// Run one input line to completion.
  ///
  /// `disambiguator` is only consulted when a command exists in more than
  /// one environment.
  pub fn handle_line<I: BufRead, O: Write>(
    &self,
    line: &str,
    working_directory: &Path,
    disambiguator: &mut Disambiguator<I, O>,
  ) -> Result<TurnOutcome, TurnFailure> {
    let Some(request) = ExecutionRequest::parse(line, working_directory)? else {
      return Ok(TurnOutcome::Idle);
    };
    debug!(command = %request.command_name, args = ?request.arguments, "received");

    if self.dispatcher.claims(&request.command_name) {
      return self.dispatch(&request);
    }

    let locations = self.locator.locate(&request.command_name, &request.working_directory);
    let location = disambiguator
      .select(&request.command_name, &locations)
      .map_err(TurnError::from)?;
    self.execute(location, &request)
  }

  fn dispatch(&self, request: &ExecutionRequest) -> Result<TurnOutcome, TurnFailure> {
    let dispatched = self
      .dispatcher
      .dispatch(&self.executor, &request.arguments, &request.working_directory)
      .map_err(TurnError::from)?;
    let status = settle(dispatched.outcome)?;
    Ok(TurnOutcome::Dispatched {
      manager: dispatched.route.manager.name.clone(),
      environment: dispatched.route.environment.name().to_string(),
      status,
    })
  }

  fn execute(&self, location: &CommandLocation, request: &ExecutionRequest) -> Result<TurnOutcome, TurnFailure> {
    info!(
      env = %location.environment,
      path = %location.resolved_path,
      "executing"
    );
    let outcome = self.executor.run(
      &location.environment,
      &location.resolved_path,
      &request.arguments,
      &request.working_directory,
    );
    let status = settle(outcome)?;
    Ok(TurnOutcome::Executed {
      environment: location.environment.name().to_string(),
      resolved_path: location.resolved_path.clone(),
      status,
    })
  }
}

/// Fold a run's command result and release result into one turn result.
fn settle(outcome: Result<RunOutcome, MountError>) -> Result<ExitStatus, TurnFailure> {
  let RunOutcome { status, release } = outcome.map_err(TurnError::from)?;

  let mut errors = Vec::new();
  let status = status.map_err(|err| errors.push(TurnError::Execution(err))).ok();
  if let Err(err) = release {
    warn!(error = %err, "failed to release binding");
    errors.push(TurnError::MountRelease(err));
  }

  match status {
    Some(status) if errors.is_empty() => Ok(status),
    _ => Err(TurnFailure { errors }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{FakeRunner, MountEvent, RecordingMounter, jail_config_in};
  use std::ffi::OsString;
  use std::io::Cursor;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  struct Turn {
    result: Result<TurnOutcome, TurnFailure>,
    prompt: String,
  }

  fn turn(engine: &Engine<'_, &FakeRunner, &RecordingMounter>, line: &str, cwd: &Path, input: &str) -> Turn {
    let mut prompt = Vec::new();
    let result = {
      let mut disambiguator = Disambiguator::new(Cursor::new(input.as_bytes()), &mut prompt);
      engine.handle_line(line, cwd, &mut disambiguator)
    };
    Turn {
      result,
      prompt: String::from_utf8(prompt).unwrap(),
    }
  }

  fn echo_everywhere() -> FakeRunner {
    FakeRunner::new()
      .with_command("host", "echo", "/usr/bin/echo")
      .with_command("jailA", "echo", "/bin/echo")
  }

  #[test]
  fn parse_splits_quoted_words() {
    let request = ExecutionRequest::parse(r#"grep -n "two words" 'a b'"#, Path::new("/w"))
      .unwrap()
      .unwrap();
    assert_eq!(request.command_name, "grep");
    assert_eq!(request.arguments, vec!["-n", "two words", "a b"]);
    assert_eq!(request.working_directory, PathBuf::from("/w"));
  }

  #[test]
  fn parse_blank_and_unbalanced() {
    assert_eq!(ExecutionRequest::parse("   ", Path::new("/")).unwrap(), None);
    assert!(matches!(
      ExecutionRequest::parse("echo 'oops", Path::new("/")),
      Err(TurnError::Parse(_))
    ));
  }

  #[test]
  fn blank_line_is_idle() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = FakeRunner::new();
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, &runner, &mounter);

    let t = turn(&engine, "", temp.path(), "");

    assert_eq!(t.result.unwrap(), TurnOutcome::Idle);
    assert!(runner.captured().is_empty());
  }

  #[test]
  fn ambiguous_command_choosing_host_never_mounts() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = echo_everywhere();
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, &runner, &mounter);

    let t = turn(&engine, "echo hi", temp.path(), "1\n");

    assert!(t.prompt.contains("1. host"));
    assert!(t.prompt.contains("2. jailA"));
    assert!(!t.prompt.contains("3."));
    match t.result.unwrap() {
      TurnOutcome::Executed { environment, .. } => assert_eq!(environment, "host"),
      other => panic!("unexpected outcome {:?}", other),
    }
    assert!(mounter.events().is_empty());
    let ran = runner.ran();
    assert_eq!(ran.len(), 1);
    assert_eq!(ran[0].program, OsString::from("/usr/bin/echo"));
    assert_eq!(ran[0].args, vec![OsString::from("hi")]);
  }

  #[test]
  fn ambiguous_command_choosing_jail_mounts_runs_unmounts() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = echo_everywhere();
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, &runner, &mounter);
    let before = mounter.mounted();

    let t = turn(&engine, "echo hi", temp.path(), "2\n");

    match t.result.unwrap() {
      TurnOutcome::Executed { environment, resolved_path, .. } => {
        assert_eq!(environment, "jailA");
        assert_eq!(resolved_path, "/bin/echo");
      }
      other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(mounter.bind_count(), 1);
    assert_eq!(mounter.unmount_count(), 1);
    assert_eq!(mounter.mounted(), before);
    let ran = runner.ran();
    assert_eq!(ran[0].program, OsString::from("chroot"));
    assert_eq!(ran[0].args.last(), Some(&OsString::from("hi")));
  }

  #[test]
  fn single_match_runs_without_prompt() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = FakeRunner::new().with_command("jailB", "foo", "/usr/bin/foo");
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, &runner, &mounter);

    let t = turn(&engine, "foo --bar baz", temp.path(), "");

    assert!(t.prompt.is_empty());
    match t.result.unwrap() {
      TurnOutcome::Executed { environment, .. } => assert_eq!(environment, "jailB"),
      other => panic!("unexpected outcome {:?}", other),
    }
    let events = mounter.events();
    assert!(matches!(&events[..], [MountEvent::Bind { .. }, MountEvent::Unmount { .. }]));
    let ran = runner.ran();
    assert_eq!(ran[0].program, OsString::from("arch-chroot"));
    let args = &ran[0].args;
    assert_eq!(
      args[args.len() - 3..],
      [
        OsString::from("/usr/bin/foo"),
        OsString::from("--bar"),
        OsString::from("baz")
      ]
    );
  }

  #[test]
  fn install_verb_bypasses_location() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    // A host command with the manager's name must not matter.
    let runner = FakeRunner::new().with_command("host", "jailA-manager", "/usr/bin/jailA-manager");
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, &runner, &mounter);

    let t = turn(&engine, "pkg jailA-manager update", temp.path(), "");

    assert_eq!(
      t.result.unwrap(),
      TurnOutcome::Dispatched {
        manager: "jailA-manager".to_string(),
        environment: "jailA".to_string(),
        status: crate::util::testutil::exit_status(0),
      }
    );
    assert!(runner.captured().is_empty());
    assert!(t.prompt.is_empty());
    assert_eq!(mounter.bind_count(), 1);
    assert_eq!(mounter.unmount_count(), 1);
  }

  #[test]
  fn install_verb_wins_over_command_of_same_name() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = FakeRunner::new().with_command("host", "pkg", "/usr/bin/pkg");
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, &runner, &mounter);

    let t = turn(&engine, "pkg brew install", temp.path(), "");

    let failure = t.result.unwrap_err();
    assert!(matches!(
      &failure.errors[..],
      [TurnError::Dispatch(DispatchError::UnknownPackageManager(name))] if name == "brew"
    ));
    assert!(runner.captured().is_empty());
    assert!(runner.ran().is_empty());
  }

  #[test]
  fn unknown_command_is_not_found_without_mounts() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = FakeRunner::new();
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, &runner, &mounter);

    let t = turn(&engine, "zzz", temp.path(), "");

    let failure = t.result.unwrap_err();
    assert!(matches!(&failure.errors[..], [TurnError::CommandNotFound(name)] if name == "zzz"));
    assert_eq!(failure.exit_code(), 127);
    assert_eq!(failure.to_string(), "zzz: command not found");
    assert_eq!(runner.captured().len(), 3);
    assert!(mounter.events().is_empty());

    // The engine is still usable afterwards.
    let t = turn(&engine, "", temp.path(), "");
    assert!(t.result.is_ok());
  }

  #[test]
  fn invalid_choice_aborts_without_mounts() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = echo_everywhere();
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, &runner, &mounter);

    let t = turn(&engine, "echo hi", temp.path(), "7\n");

    let failure = t.result.unwrap_err();
    assert!(matches!(
      &failure.errors[..],
      [TurnError::InvalidDisambiguationChoice { count: 2, .. }]
    ));
    assert!(runner.ran().is_empty());
    assert!(mounter.events().is_empty());
  }

  #[test]
  fn metacharacters_reach_the_jail_as_literal_arguments() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = FakeRunner::new().with_command("jailA", "echo", "/bin/echo");
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, &runner, &mounter);

    let t = turn(&engine, r#"echo '; rm -rf /' '$(whoami)' "it's""#, temp.path(), "");

    assert!(t.result.is_ok());
    let ran = runner.ran();
    let args = &ran[0].args;
    assert_eq!(
      args[args.len() - 3..],
      [
        OsString::from("; rm -rf /"),
        OsString::from("$(whoami)"),
        OsString::from("it's")
      ]
    );
  }

  #[traced_test]
  #[test]
  fn release_failure_is_reported_after_command_failure() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = FakeRunner::new()
      .with_command("jailB", "foo", "/usr/bin/foo")
      .with_run_status(2);
    let mounter = RecordingMounter::failing_unmount();
    let engine = Engine::new(&config, &runner, &mounter);

    let t = turn(&engine, "foo", temp.path(), "");

    let failure = t.result.unwrap_err();
    assert!(matches!(
      &failure.errors[..],
      [
        TurnError::Execution(ExecError::NonZero { code: 2, .. }),
        TurnError::MountRelease(MountError::Release { .. })
      ]
    ));
    assert_eq!(failure.exit_code(), 2);
    assert!(logs_contain("failed to release binding"));
    assert!(engine.executor().mounts().is_active("jailB"));
  }

  #[test]
  fn stuck_binding_blocks_next_turn_in_that_environment() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = FakeRunner::new().with_command("jailB", "foo", "/usr/bin/foo");
    let mounter = RecordingMounter::failing_unmount();
    let engine = Engine::new(&config, &runner, &mounter);
    let other = temp.path().join("other");
    std::fs::create_dir(&other).unwrap();

    assert!(turn(&engine, "foo", temp.path(), "").result.is_err());
    let failure = turn(&engine, "foo", &other, "").result.unwrap_err();

    assert!(matches!(
      &failure.errors[..],
      [TurnError::MountAcquire(MountError::Stuck { .. })]
    ));
    assert_eq!(runner.ran().len(), 1);
    assert_eq!(mounter.bind_count(), 1);
    assert_eq!(mounter.mounted().len(), 1);
  }

  #[test]
  fn release_failure_alone_fails_the_turn() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = FakeRunner::new().with_command("jailB", "foo", "/usr/bin/foo");
    let mounter = RecordingMounter::failing_unmount();
    let engine = Engine::new(&config, &runner, &mounter);

    let failure = turn(&engine, "foo", temp.path(), "").result.unwrap_err();

    assert!(matches!(&failure.errors[..], [TurnError::MountRelease(_)]));
    assert_eq!(failure.exit_code(), 1);
  }

  #[test]
  #[cfg(unix)]
  fn relative_path_runs_from_the_working_directory() {
    use crate::process::SystemRunner;
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let script = temp.path().join("run.sh");
    std::fs::write(&script, "#!/bin/sh\ntouch ran\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let config = Config::from_toml_str("[[environment]]\nname = \"host\"\nisolation = \"host\"\n").unwrap();
    let mounter = RecordingMounter::new();
    let engine = Engine::new(&config, SystemRunner, &mounter);

    let mut prompt = Vec::new();
    let mut disambiguator = Disambiguator::new(Cursor::new(&b""[..]), &mut prompt);
    let outcome = engine.handle_line("./run.sh", temp.path(), &mut disambiguator).unwrap();

    match outcome {
      TurnOutcome::Executed { resolved_path, .. } => assert_eq!(Path::new(&resolved_path), script),
      other => panic!("unexpected outcome {:?}", other),
    }
    assert!(temp.path().join("ran").exists());
    assert!(mounter.events().is_empty());
  }

  #[test]
  fn acquire_failure_runs_nothing() {
    let temp = TempDir::new().unwrap();
    let config = jail_config_in(temp.path());
    let runner = FakeRunner::new().with_command("jailB", "foo", "/usr/bin/foo");
    let mounter = RecordingMounter::failing_bind();
    let engine = Engine::new(&config, &runner, &mounter);

    let failure = turn(&engine, "foo", temp.path(), "").result.unwrap_err();

    assert!(matches!(
      &failure.errors[..],
      [TurnError::MountAcquire(MountError::Acquire { .. })]
    ));
    assert!(runner.ran().is_empty());
    assert_eq!(mounter.unmount_count(), 0);
  }
}
