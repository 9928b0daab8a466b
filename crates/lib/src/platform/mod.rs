//! Host platform queries.

pub mod paths;

/// Returns true when the process runs with an effective uid of 0.
///
/// Bind mounts and chroot both need this; the CLI warns early instead of
/// letting every jailed turn fail on `EPERM`.
#[cfg(unix)]
pub fn is_elevated() -> bool {
  rustix::process::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
  false
}
