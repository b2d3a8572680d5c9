//! Background Tasks Module
//!
//! Contains the work that runs off the caller's task.
//!
//! # Tasks
//! - Janitor: Removes expired cache entries at a configured interval
//! - Blocking lookups: Provider and cgroup reads on the blocking pool

mod blocking;
mod janitor;

pub(crate) use blocking::run_blocking;
pub(crate) use janitor::spawn_janitor;
