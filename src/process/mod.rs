//! Process Module
//!
//! Process metadata providers and the shared process metadata cache.

pub mod cache;
pub mod capabilities;
pub mod provider;

pub use cache::ProcessMetadataCache;
pub use provider::{ProcessMetadataProvider, SysinfoProvider};
