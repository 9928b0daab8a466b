/// Application name used for config directories and the config env var prefix.
pub const APP_NAME: &str = "jailsh";

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "JAILSH_CONFIG";

/// File name looked up inside the config directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// In-environment directory the caller's working directory is bound onto.
pub const DEFAULT_MOUNT_POINT: &str = "/mnt/jailsh";

/// Reserved first token that routes a line to the package-manager dispatcher.
pub const DEFAULT_INSTALL_VERB: &str = "pkg";

/// Directory holding the default alternate roots.
pub const DEFAULT_ROOTS_DIR: &str = "/var/lib/jailsh";

pub const DEFAULT_CHROOT_PROGRAM: &str = "chroot";
pub const DEFAULT_LAYERED_CHROOT_PROGRAM: &str = "arch-chroot";
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// `PATH` handed to probes and commands inside a jail. The host's `PATH`
/// describes the host filesystem and means nothing inside another root.
pub const DEFAULT_JAIL_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
