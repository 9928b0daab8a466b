//! Interactive loop and one-shot `-c` execution.
//!
//! Each line is one engine turn. `exit` and `cd` are handled here because
//! they change the session rather than run anything.

use std::env;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use tracing::debug;

use jailsh_lib::config::Config;
use jailsh_lib::engine::{Engine, TurnFailure};
use jailsh_lib::mount::SystemMounter;
use jailsh_lib::platform::{self, paths};
use jailsh_lib::process::SystemRunner;
use jailsh_lib::select::Disambiguator;

use super::exit_code;
use crate::output::{print_error, print_warning};
use crate::prompts;

#[derive(Debug, PartialEq, Eq)]
enum Builtin<'l> {
  Exit,
  Cd(Option<&'l str>),
}

fn builtin(line: &str) -> Option<Builtin<'_>> {
  let line = line.trim();
  let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
  let rest = rest.trim();
  match word {
    "exit" => Some(Builtin::Exit),
    "cd" => Some(Builtin::Cd((!rest.is_empty()).then_some(rest))),
    _ => None,
  }
}

pub fn cmd_shell(config: &Config) -> Result<ExitCode> {
  warn_if_unprivileged(config);

  let engine = Engine::new(config, SystemRunner, SystemMounter);
  let interactive = prompts::is_interactive();
  let mut cwd = env::current_dir().context("Failed to read current directory")?;
  let mut input = io::stdin().lock();

  loop {
    if interactive {
      prompts::shell_prompt(&cwd)?;
    }

    let mut line = String::new();
    if input.read_line(&mut line).context("Failed to read input")? == 0 {
      debug!("end of input");
      break;
    }

    match builtin(&line) {
      Some(Builtin::Exit) => break,
      Some(Builtin::Cd(dir)) => match change_directory(&cwd, dir) {
        Ok(dir) => cwd = dir,
        Err(err) => print_error(&format!("cd: {:#}", err)),
      },
      None => {
        let mut disambiguator = Disambiguator::new(&mut input, io::stderr());
        match engine.handle_line(&line, &cwd, &mut disambiguator) {
          Ok(outcome) => debug!(?outcome, "turn finished"),
          Err(failure) => report(&failure),
        }
      }
    }
  }

  Ok(ExitCode::SUCCESS)
}

/// Run one line and exit with its status.
pub fn cmd_line(config: &Config, line: &str) -> Result<ExitCode> {
  warn_if_unprivileged(config);

  let engine = Engine::new(config, SystemRunner, SystemMounter);
  let cwd = env::current_dir().context("Failed to read current directory")?;
  let mut disambiguator = Disambiguator::new(io::stdin().lock(), io::stderr());

  match engine.handle_line(line, &cwd, &mut disambiguator) {
    Ok(outcome) => Ok(exit_code(outcome.exit_code())),
    Err(failure) => {
      report(&failure);
      Ok(exit_code(failure.exit_code()))
    }
  }
}

fn report(failure: &TurnFailure) {
  for err in &failure.errors {
    print_error(&err.to_string());
  }
}

fn warn_if_unprivileged(config: &Config) {
  let jailed = config.registry.list_environments().iter().any(|env| !env.is_host());
  if jailed && !platform::is_elevated() {
    print_warning("not running as root; commands in chroot environments will fail to mount");
  }
}

/// Resolve `dir` against `cwd`. No argument means the home directory.
fn change_directory(cwd: &Path, dir: Option<&str>) -> Result<PathBuf> {
  let target = match dir {
    Some(dir) => cwd.join(dir),
    None => paths::home_dir().context("HOME is not set")?,
  };
  let target = target
    .canonicalize()
    .with_context(|| format!("{}", target.display()))?;
  if !target.is_dir() {
    bail!("{}: not a directory", target.display());
  }
  Ok(target)
}
