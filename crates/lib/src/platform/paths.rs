use crate::consts::{APP_NAME, CONFIG_ENV_VAR, CONFIG_FILENAME};
use std::path::PathBuf;

/// Returns the user's home directory
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").filter(|h| !h.is_empty()).map(PathBuf::from)
}

/// Returns the directory for configuration files for the application
pub fn config_dir() -> Option<PathBuf> {
  let config_home = std::env::var_os("XDG_CONFIG_HOME")
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".config")))?;
  Some(config_home.join(APP_NAME))
}

/// Returns the config file the engine should read, if any.
///
/// `$JAILSH_CONFIG` wins when set. Otherwise the file in the config
/// directory is used, but only if it exists: a missing default config means
/// the built-in environments apply.
pub fn config_file() -> Option<PathBuf> {
  if let Some(explicit) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
    return Some(PathBuf::from(explicit));
  }

  config_dir()
    .map(|dir| dir.join(CONFIG_FILENAME))
    .filter(|path| path.is_file())
}
