//! Engine configuration.
//!
//! Everything the engine needs to know about the machine lives in one
//! [`Config`] value: the environment registry, the in-environment mount
//! point, the dispatcher verb and its package managers, and the external
//! tools used to enter a root. It is read once at startup and passed by
//! reference to every component.
//!
//! The on-disk format is TOML:
//!
//! ```toml
//! mount_point = "/mnt/jailsh"
//! install_verb = "pkg"
//!
//! [tools]
//! layered_chroot = "arch-chroot"
//!
//! [[environment]]
//! name = "host"
//! isolation = "host"
//!
//! [[environment]]
//! name = "arch"
//! isolation = "layered-chroot"
//! root = "/var/lib/jailsh/arch"
//!
//! [[manager]]
//! name = "pacman"
//! environment = "arch"
//! ```

use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{
  DEFAULT_CHROOT_PROGRAM, DEFAULT_INSTALL_VERB, DEFAULT_JAIL_PATH, DEFAULT_LAYERED_CHROOT_PROGRAM,
  DEFAULT_MOUNT_POINT, DEFAULT_ROOTS_DIR, DEFAULT_SHELL,
};
use crate::dispatch::PackageManager;
use crate::platform::paths;
use crate::registry::{Environment, Isolation, Registry, RegistryError};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config: {0}")]
  Parse(#[from] toml::de::Error),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error("environment `{0}` is a host environment and must not set a root")]
  HostWithRoot(String),

  #[error("environment `{0}` needs a root path")]
  MissingRoot(String),

  #[error("mount point must be an absolute path below `/`: {0}")]
  InvalidMountPoint(PathBuf),

  #[error("install verb must be a single non-empty word: {0:?}")]
  InvalidInstallVerb(String),

  #[error("package manager `{manager}` is pinned to unknown environment `{environment}`")]
  UnknownManagerEnvironment { manager: String, environment: String },

  #[error("package manager `{0}` is defined more than once")]
  DuplicateManager(String),
}

/// External programs used to enter and run inside a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
  /// Jail tool for [`Isolation::Chroot`] environments.
  pub chroot: String,
  /// Jail tool for [`Isolation::LayeredChroot`] environments.
  pub layered_chroot: String,
  /// POSIX shell used for probes and the in-root `cd` wrapper.
  pub shell: String,
  /// `PATH` inside every jail.
  pub jail_path: String,
}

impl Default for Tools {
  fn default() -> Self {
    Self {
      chroot: DEFAULT_CHROOT_PROGRAM.to_string(),
      layered_chroot: DEFAULT_LAYERED_CHROOT_PROGRAM.to_string(),
      shell: DEFAULT_SHELL.to_string(),
      jail_path: DEFAULT_JAIL_PATH.to_string(),
    }
  }
}

impl Tools {
  /// The jail tool for an environment, or `None` for the host.
  pub fn jail_program(&self, isolation: Isolation) -> Option<&str> {
    match isolation {
      Isolation::Host => None,
      Isolation::Chroot => Some(&self.chroot),
      Isolation::LayeredChroot => Some(&self.layered_chroot),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
  #[serde(default = "default_mount_point")]
  mount_point: PathBuf,
  #[serde(default = "default_install_verb")]
  install_verb: String,
  #[serde(default)]
  tools: Tools,
  #[serde(default, rename = "environment")]
  environments: Option<Vec<RawEnvironment>>,
  #[serde(default, rename = "manager")]
  managers: Option<Vec<RawManager>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvironment {
  name: String,
  isolation: Isolation,
  root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManager {
  name: String,
  environment: String,
  program: Option<String>,
}

fn default_mount_point() -> PathBuf {
  PathBuf::from(DEFAULT_MOUNT_POINT)
}

fn default_install_verb() -> String {
  DEFAULT_INSTALL_VERB.to_string()
}

fn builtin_environments() -> Vec<Environment> {
  let roots = Path::new(DEFAULT_ROOTS_DIR);
  vec![
    Environment::host("host"),
    Environment::layered_chroot("arch", roots.join("arch")),
    Environment::chroot("debian", roots.join("debian")),
  ]
}

fn builtin_managers() -> Vec<PackageManager> {
  vec![
    PackageManager::new("pacman", "arch"),
    PackageManager::new("apt", "debian"),
    PackageManager::new("dnf", "host"),
  ]
}

/// Validated engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
  pub registry: Registry,
  /// Absolute path, inside every jailed environment, where the caller's
  /// working directory is exposed.
  pub mount_point: PathBuf,
  pub install_verb: String,
  pub managers: Vec<PackageManager>,
  pub tools: Tools,
}

impl Config {
  /// The built-in configuration used when no config file exists.
  pub fn builtin() -> Result<Self, ConfigError> {
    Self::from_toml_str("")
  }

  /// Parse and validate a TOML config.
  ///
  /// Omitting `[[environment]]` selects the built-in environments, and with
  /// them the built-in package managers. A config that declares its own
  /// environments gets no managers unless it declares those too.
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let raw: RawConfig = toml::from_str(content)?;
    Self::from_raw(raw)
  }

  /// Read a config file from disk.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml_str(&content)
  }

  /// Load the config from `$JAILSH_CONFIG` or the user config directory,
  /// falling back to [`Config::builtin`].
  pub fn discover() -> Result<Self, ConfigError> {
    match paths::config_file() {
      Some(path) => Self::load(&path),
      None => {
        debug!("no config file found, using built-in environments");
        Self::builtin()
      }
    }
  }

  /// Look up a package manager by the name typed after the install verb.
  pub fn manager(&self, name: &str) -> Option<&PackageManager> {
    self.managers.iter().find(|m| m.name == name)
  }

  fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
    let escapes = raw
      .mount_point
      .components()
      .any(|c| matches!(c, Component::ParentDir));
    if !raw.mount_point.is_absolute() || raw.mount_point.parent().is_none() || escapes {
      return Err(ConfigError::InvalidMountPoint(raw.mount_point));
    }

    if raw.install_verb.is_empty() || raw.install_verb.chars().any(char::is_whitespace) {
      return Err(ConfigError::InvalidInstallVerb(raw.install_verb));
    }

    let (environments, managers) = match raw.environments {
      Some(envs) => {
        let envs = envs
          .into_iter()
          .map(RawEnvironment::into_environment)
          .collect::<Result<Vec<_>, _>>()?;
        let managers = raw
          .managers
          .unwrap_or_default()
          .into_iter()
          .map(RawManager::into_manager)
          .collect();
        (envs, managers)
      }
      None => {
        let managers = match raw.managers {
          Some(managers) => managers.into_iter().map(RawManager::into_manager).collect(),
          None => builtin_managers(),
        };
        (builtin_environments(), managers)
      }
    };

    let registry = Registry::new(environments)?;
    validate_managers(&registry, &managers)?;

    Ok(Self {
      registry,
      mount_point: raw.mount_point,
      install_verb: raw.install_verb,
      managers,
      tools: raw.tools,
    })
  }
}

impl RawEnvironment {
  fn into_environment(self) -> Result<Environment, ConfigError> {
    match (self.isolation, self.root) {
      (Isolation::Host, None) => Ok(Environment::host(self.name)),
      (Isolation::Host, Some(_)) => Err(ConfigError::HostWithRoot(self.name)),
      (Isolation::Chroot, Some(root)) => Ok(Environment::chroot(self.name, root)),
      (Isolation::LayeredChroot, Some(root)) => Ok(Environment::layered_chroot(self.name, root)),
      (_, None) => Err(ConfigError::MissingRoot(self.name)),
    }
  }
}

impl RawManager {
  fn into_manager(self) -> PackageManager {
    let manager = PackageManager::new(self.name, self.environment);
    match self.program {
      Some(program) => manager.with_program(program),
      None => manager,
    }
  }
}

fn validate_managers(registry: &Registry, managers: &[PackageManager]) -> Result<(), ConfigError> {
  let mut seen = HashSet::new();
  for manager in managers {
    if !seen.insert(manager.name.as_str()) {
      return Err(ConfigError::DuplicateManager(manager.name.clone()));
    }
    if registry.get(&manager.environment).is_none() {
      return Err(ConfigError::UnknownManagerEnvironment {
        manager: manager.name.clone(),
        environment: manager.environment.clone(),
      });
    }
  }
  Ok(())
}
