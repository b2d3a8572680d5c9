//! Container Module
//!
//! Cgroup readers, container id matching rules and the per-processor
//! container id resolver.

pub mod matcher;
pub mod reader;
pub mod resolver;

pub use matcher::CgroupMatcher;
pub use reader::{open_cgroup_reader, CgroupReader, NoopCgroupReader, ProcCgroupReader};
pub use resolver::ContainerIdResolver;
