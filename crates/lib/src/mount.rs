//! Bind mount manager.
//!
//! Exposes a host directory at the fixed mount point inside a jailed
//! environment for exactly as long as one operation runs. Every successful
//! acquisition is paired with exactly one release, on every exit path:
//! normal return, error, or unwinding panic.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::Environment;

/// The two mount-table operations the engine needs.
pub trait Mounter {
  fn bind(&self, source: &Path, target: &Path) -> io::Result<()>;
  fn unmount(&self, target: &Path) -> io::Result<()>;
}

impl<M: Mounter + ?Sized> Mounter for &M {
  fn bind(&self, source: &Path, target: &Path) -> io::Result<()> {
    (**self).bind(source, target)
  }

  fn unmount(&self, target: &Path) -> io::Result<()> {
    (**self).unmount(target)
  }
}

/// Real bind mounts through `mount(2)` / `umount2(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMounter;

#[cfg(target_os = "linux")]
impl Mounter for SystemMounter {
  fn bind(&self, source: &Path, target: &Path) -> io::Result<()> {
    rustix::mount::mount_bind(source, target).map_err(io::Error::from)
  }

  fn unmount(&self, target: &Path) -> io::Result<()> {
    rustix::mount::unmount(target, rustix::mount::UnmountFlags::empty()).map_err(io::Error::from)
  }
}

#[cfg(not(target_os = "linux"))]
impl Mounter for SystemMounter {
  fn bind(&self, _source: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "bind mounts need Linux"))
  }

  fn unmount(&self, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "bind mounts need Linux"))
  }
}

#[derive(Debug, Error)]
pub enum MountError {
  #[error("environment `{0}` is the host and has no root to mount into")]
  HostEnvironment(String),

  #[error("a binding for environment `{0}` is already active")]
  Busy(String),

  #[error("binding for `{environment}` at {target} is still mounted: {source}")]
  Stuck {
    environment: String,
    target: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("mount point {path} in `{environment}` is a symbolic link")]
  SymlinkInRoot { environment: String, path: PathBuf },

  #[error("failed to create mount point {path}: {source}")]
  CreateMountPoint {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to bind {host_directory} onto {target}: {source}")]
  Acquire {
    host_directory: PathBuf,
    target: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to unmount {target} after running in `{environment}`: {source}")]
  Release {
    environment: String,
    target: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// One active bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountBinding {
  pub environment: String,
  pub host_directory: PathBuf,
  /// Mount point as seen from inside the environment.
  pub mount_point: PathBuf,
  /// Same mount point as seen from the host.
  pub target: PathBuf,
}

/// Result of [`BindMountManager::with_binding`]: the inner operation's value
/// and, separately, whether tearing the binding down worked.
#[derive(Debug)]
pub struct Scoped<T> {
  pub value: T,
  pub release: Result<(), MountError>,
}

pub struct BindMountManager<M> {
  mount_point: PathBuf,
  mounter: M,
  active: RefCell<HashSet<String>>,
  /// Bindings whose unmount failed, by environment. They stay active until
  /// a later unmount of the same target succeeds.
  stale: RefCell<HashMap<String, PathBuf>>,
}

impl<M: Mounter> BindMountManager<M> {
  pub fn new(mount_point: impl Into<PathBuf>, mounter: M) -> Self {
    Self {
      mount_point: mount_point.into(),
      mounter,
      active: RefCell::new(HashSet::new()),
      stale: RefCell::new(HashMap::new()),
    }
  }

  pub fn mount_point(&self) -> &Path {
    &self.mount_point
  }

  /// True while a binding for `environment` is held.
  pub fn is_active(&self, environment: &str) -> bool {
    self.active.borrow().contains(environment)
  }

  /// True when the last release for `environment` failed to unmount.
  pub fn is_stale(&self, environment: &str) -> bool {
    self.stale.borrow().contains_key(environment)
  }

  /// Run `inner` with `host_directory` bound at the mount point of `env`.
  ///
  /// If acquisition fails, `inner` never runs and nothing is released. Once
  /// acquired, the binding is released after `inner` returns, and also if it
  /// panics.
  pub fn with_binding<T>(
    &self,
    env: &Environment,
    host_directory: &Path,
    inner: impl FnOnce(&MountBinding) -> T,
  ) -> Result<Scoped<T>, MountError> {
    let guard = self.acquire(env, host_directory)?;
    let value = inner(guard.binding());
    let release = guard.release();
    Ok(Scoped { value, release })
  }

  /// Bind `host_directory` into `env` and return the guard that undoes it.
  pub fn acquire(&self, env: &Environment, host_directory: &Path) -> Result<BindingGuard<'_, M>, MountError> {
    if env.is_host() {
      return Err(MountError::HostEnvironment(env.name().to_string()));
    }

    self.retry_stale(env.name())?;
    if self.is_active(env.name()) {
      return Err(MountError::Busy(env.name().to_string()));
    }

    let target = prepare_mount_point(env, &self.mount_point)?;

    self
      .mounter
      .bind(host_directory, &target)
      .map_err(|source| MountError::Acquire {
        host_directory: host_directory.to_path_buf(),
        target: target.clone(),
        source,
      })?;

    info!(env = %env, from = %host_directory.display(), to = %target.display(), "bound working directory");
    self.active.borrow_mut().insert(env.name().to_string());

    Ok(BindingGuard {
      manager: self,
      binding: MountBinding {
        environment: env.name().to_string(),
        host_directory: host_directory.to_path_buf(),
        mount_point: self.mount_point.clone(),
        target,
      },
      released: false,
    })
  }

  /// Unmount a binding left behind by a failed release, if there is one.
  fn retry_stale(&self, environment: &str) -> Result<(), MountError> {
    let Some(target) = self.stale.borrow().get(environment).cloned() else {
      return Ok(());
    };

    match self.mounter.unmount(&target) {
      Ok(()) => {
        info!(env = environment, target = %target.display(), "released stale binding");
        self.stale.borrow_mut().remove(environment);
        self.active.borrow_mut().remove(environment);
        Ok(())
      }
      Err(source) => Err(MountError::Stuck {
        environment: environment.to_string(),
        target,
        source,
      }),
    }
  }

  fn teardown(&self, binding: &MountBinding) -> Result<(), MountError> {
    match self.mounter.unmount(&binding.target) {
      Ok(()) => {
        self.active.borrow_mut().remove(&binding.environment);
        debug!(env = %binding.environment, target = %binding.target.display(), "released binding");
        Ok(())
      }
      Err(source) => {
        self
          .stale
          .borrow_mut()
          .insert(binding.environment.clone(), binding.target.clone());
        Err(MountError::Release {
          environment: binding.environment.clone(),
          target: binding.target.clone(),
          source,
        })
      }
    }
  }
}

/// Create the mount point inside the root of `env` one component at a time
/// and return its host-side path. Every component must be a real directory:
/// a symlink would let the root redirect the bind onto an arbitrary host path.
fn prepare_mount_point(env: &Environment, mount_point: &Path) -> Result<PathBuf, MountError> {
  let root = env
    .root()
    .ok_or_else(|| MountError::HostEnvironment(env.name().to_string()))?;
  std::fs::create_dir_all(root).map_err(|source| create_error(root, source))?;

  let mut target = root.to_path_buf();
  for component in mount_point.components() {
    let Component::Normal(part) = component else {
      continue;
    };
    target.push(part);

    match std::fs::symlink_metadata(&target) {
      Ok(meta) if meta.file_type().is_symlink() => {
        return Err(MountError::SymlinkInRoot {
          environment: env.name().to_string(),
          path: target,
        });
      }
      Ok(meta) if meta.is_dir() => {}
      Ok(_) => {
        return Err(create_error(&target, io::Error::from(io::ErrorKind::NotADirectory)));
      }
      Err(err) if err.kind() == io::ErrorKind::NotFound => {
        std::fs::create_dir(&target).map_err(|source| create_error(&target, source))?;
      }
      Err(source) => return Err(create_error(&target, source)),
    }
  }

  Ok(target)
}

fn create_error(path: &Path, source: io::Error) -> MountError {
  MountError::CreateMountPoint {
    path: path.to_path_buf(),
    source,
  }
}

/// Holds one binding; unmounts it on [`release`](Self::release) or drop.
pub struct BindingGuard<'m, M: Mounter> {
  manager: &'m BindMountManager<M>,
  binding: MountBinding,
  released: bool,
}

impl<M: Mounter> BindingGuard<'_, M> {
  pub fn binding(&self) -> &MountBinding {
    &self.binding
  }

  /// Unmount now and report the outcome.
  pub fn release(mut self) -> Result<(), MountError> {
    self.released = true;
    self.manager.teardown(&self.binding)
  }
}

impl<M: Mounter> Drop for BindingGuard<'_, M> {
  fn drop(&mut self) {
    if self.released {
      return;
    }
    if let Err(err) = self.manager.teardown(&self.binding) {
      warn!(error = %err, "failed to release binding during unwind");
    }
  }
}
