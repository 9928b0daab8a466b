//! jailsh-lib: run commands across the host and chroot environments
//!
//! One input line is resolved against every registered environment and run
//! in exactly one of them:
//! - `Registry`: the ordered set of environments (host, chroot, layered chroot)
//! - `Locator`: probes each environment's own `PATH` for a command
//! - `Disambiguator`: asks the operator when several environments match
//! - `BindMountManager`: exposes the working directory inside a root, and
//!   always takes it away again
//! - `Executor`: launches the command on the host or through the jail tool
//! - `Dispatcher`: sends `<install verb> <manager> ...` to the manager's
//!   pinned environment
//!
//! `Engine` ties these together into a single turn.

pub mod config;
pub mod consts;
pub mod dispatch;
pub mod engine;
pub mod execute;
pub mod locate;
pub mod mount;
pub mod platform;
pub mod process;
pub mod registry;
pub mod select;
pub mod util;
