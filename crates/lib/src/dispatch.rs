//! Package-manager dispatcher.
//!
//! `<install verb> <manager> <args...>` names a package manager directly.
//! Each manager is pinned to one environment, so the line skips location
//! and disambiguation and goes straight to the executor.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::execute::{Executor, RunOutcome};
use crate::mount::{MountError, Mounter};
use crate::process::ProcessRunner;
use crate::registry::Environment;

/// A package manager and the environment it manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageManager {
  /// Name typed after the install verb.
  pub name: String,
  /// Registry name of the environment it runs in.
  pub environment: String,
  /// Program started inside that environment.
  pub program: String,
}

impl PackageManager {
  pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
    let name = name.into();
    Self {
      program: name.clone(),
      name,
      environment: environment.into(),
    }
  }

  pub fn with_program(mut self, program: impl Into<String>) -> Self {
    self.program = program.into();
    self
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
  #[error("unknown package manager `{0}`")]
  UnknownPackageManager(String),

  #[error("missing package manager name after `{0}`")]
  MissingPackageManager(String),

  /// Only reachable with a hand-built [`Config`]; loading validates this.
  #[error("package manager `{manager}` is pinned to unknown environment `{environment}`")]
  UnknownEnvironment { manager: String, environment: String },
}

/// Where a dispatched line goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<'a> {
  pub manager: &'a PackageManager,
  pub environment: &'a Environment,
  pub arguments: Vec<String>,
}

/// A route plus what running it did.
#[derive(Debug)]
pub struct Dispatched<'a> {
  pub route: Route<'a>,
  /// `Err` when the working directory could not be bound; nothing ran.
  pub outcome: Result<RunOutcome, MountError>,
}

pub struct Dispatcher<'a> {
  config: &'a Config,
}

impl<'a> Dispatcher<'a> {
  pub fn new(config: &'a Config) -> Self {
    Self { config }
  }

  /// True when `command_name` is the reserved verb.
  pub fn claims(&self, command_name: &str) -> bool {
    command_name == self.config.install_verb
  }

  /// Resolve the words following the install verb to a manager and its
  /// environment. Runs nothing.
  pub fn route(&self, arguments: &[String]) -> Result<Route<'a>, DispatchError> {
    let (name, rest) = arguments
      .split_first()
      .ok_or_else(|| DispatchError::MissingPackageManager(self.config.install_verb.clone()))?;

    let manager = self
      .config
      .manager(name)
      .ok_or_else(|| DispatchError::UnknownPackageManager(name.clone()))?;

    let environment =
      self
        .config
        .registry
        .get(&manager.environment)
        .ok_or_else(|| DispatchError::UnknownEnvironment {
          manager: manager.name.clone(),
          environment: manager.environment.clone(),
        })?;

    Ok(Route {
      manager,
      environment,
      arguments: rest.to_vec(),
    })
  }

  /// Route `arguments` and run the manager's program in its environment,
  /// starting in `working_directory`.
  pub fn dispatch<R: ProcessRunner, M: Mounter>(
    &self,
    executor: &Executor<'_, R, M>,
    arguments: &[String],
    working_directory: &Path,
  ) -> Result<Dispatched<'a>, DispatchError> {
    let route = self.route(arguments)?;
    info!(
      manager = %route.manager.name,
      env = %route.environment,
      "dispatching to package manager"
    );
    let outcome = executor.run(
      route.environment,
      &route.manager.program,
      &route.arguments,
      working_directory,
    );
    Ok(Dispatched { route, outcome })
  }
}
