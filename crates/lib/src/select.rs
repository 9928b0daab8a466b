//! Disambiguation between environments that all have a command.

use std::io::{self, BufRead, Write};

use thiserror::Error;
use tracing::debug;

use crate::locate::CommandLocation;

#[derive(Debug, Error)]
pub enum SelectError {
  #[error("{0}: command not found")]
  NotFound(String),

  #[error("invalid choice {input:?}: expected a number from 1 to {count}")]
  InvalidChoice { input: String, count: usize },

  #[error("failed to read choice: {0}")]
  Io(#[from] io::Error),
}

/// Picks one [`CommandLocation`] out of the locator's result.
///
/// A single match is taken without asking. Two or more are listed, numbered
/// from 1 in registry order, and one line is read from `input`. This is the
/// only point where a turn waits on the operator.
pub struct Disambiguator<R, W> {
  input: R,
  output: W,
}

impl<R: BufRead, W: Write> Disambiguator<R, W> {
  pub fn new(input: R, output: W) -> Self {
    Self { input, output }
  }

  pub fn select<'l>(
    &mut self,
    command: &str,
    candidates: &'l [CommandLocation],
  ) -> Result<&'l CommandLocation, SelectError> {
    match candidates {
      [] => Err(SelectError::NotFound(command.to_string())),
      [only] => {
        debug!(command, env = %only.environment, "single match, no prompt");
        Ok(only)
      }
      _ => {
        self.prompt(command, candidates)?;
        let mut line = String::new();
        self.input.read_line(&mut line)?;
        let index = parse_choice(&line, candidates.len())?;
        Ok(&candidates[index])
      }
    }
  }

  fn prompt(&mut self, command: &str, candidates: &[CommandLocation]) -> io::Result<()> {
    writeln!(
      self.output,
      "`{}` is available in {} environments:",
      command,
      candidates.len()
    )?;
    for (number, candidate) in candidates.iter().enumerate() {
      writeln!(
        self.output,
        "  {}. {} ({})",
        number + 1,
        candidate.environment.name(),
        candidate.resolved_path
      )?;
    }
    write!(self.output, "Select an environment [1-{}]: ", candidates.len())?;
    self.output.flush()
  }
}

/// Turn one line of operator input into a zero-based index below `count`.
pub fn parse_choice(line: &str, count: usize) -> Result<usize, SelectError> {
  let input = line.trim();
  match input.parse::<usize>() {
    Ok(number) if (1..=count).contains(&number) => Ok(number - 1),
    _ => Err(SelectError::InvalidChoice {
      input: input.to_string(),
      count,
    }),
  }
}
