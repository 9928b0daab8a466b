//! Environment registry.
//!
//! The registry is the fixed, ordered catalog of places a command can run:
//! the host itself plus any number of alternate roots. It is built once at
//! startup and never mutated. Its order is the order probes run in and the
//! order candidates are numbered in when a command is ambiguous.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How an environment is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
  /// No isolation: commands run directly on the host.
  Host,
  /// Plain `chroot(8)` into the root.
  Chroot,
  /// A chroot helper that sets up API filesystems first (`arch-chroot`).
  LayeredChroot,
}

impl Isolation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Host => "host",
      Self::Chroot => "chroot",
      Self::LayeredChroot => "layered-chroot",
    }
  }
}

impl fmt::Display for Isolation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A named execution environment.
///
/// `root` is `None` exactly when `isolation` is [`Isolation::Host`]; the
/// constructors are the only way to build one, so that holds everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Environment {
  name: String,
  root: Option<PathBuf>,
  isolation: Isolation,
}

impl Environment {
  pub fn host(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      root: None,
      isolation: Isolation::Host,
    }
  }

  pub fn chroot(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      root: Some(root.into()),
      isolation: Isolation::Chroot,
    }
  }

  pub fn layered_chroot(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      root: Some(root.into()),
      isolation: Isolation::LayeredChroot,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn root(&self) -> Option<&Path> {
    self.root.as_deref()
  }

  pub fn isolation(&self) -> Isolation {
    self.isolation
  }

  pub fn is_host(&self) -> bool {
    self.root.is_none()
  }
}

impl fmt::Display for Environment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name)
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
  #[error("no environments configured")]
  Empty,

  #[error("environment name must not be empty")]
  EmptyName,

  #[error("environment `{0}` is defined more than once")]
  DuplicateName(String),

  #[error("environment `{name}` has a relative root: {root}")]
  RelativeRoot { name: String, root: PathBuf },
}

/// Ordered, immutable set of environments.
#[derive(Debug, Clone)]
pub struct Registry {
  environments: Vec<Environment>,
}

impl Registry {
  pub fn new(environments: Vec<Environment>) -> Result<Self, RegistryError> {
    if environments.is_empty() {
      return Err(RegistryError::Empty);
    }

    let mut seen = HashSet::new();
    for env in &environments {
      if env.name.trim().is_empty() {
        return Err(RegistryError::EmptyName);
      }
      if !seen.insert(env.name.as_str()) {
        return Err(RegistryError::DuplicateName(env.name.clone()));
      }
      if let Some(root) = env.root()
        && !root.is_absolute()
      {
        return Err(RegistryError::RelativeRoot {
          name: env.name.clone(),
          root: root.to_path_buf(),
        });
      }
    }

    Ok(Self { environments })
  }

  /// All environments in registration order.
  pub fn list_environments(&self) -> &[Environment] {
    &self.environments
  }

  pub fn get(&self, name: &str) -> Option<&Environment> {
    self.environments.iter().find(|env| env.name == name)
  }

  pub fn len(&self) -> usize {
    self.environments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.environments.is_empty()
  }
}
