//! Data models shared by the caches and the enrichment processor
//!
//! Defines the event capability, the process metadata value object and
//! pid coercion.

pub mod event;
pub mod metadata;
pub mod pid;

// Re-export commonly used types
pub use event::{Event, JsonEvent};
pub use metadata::{Capabilities, Principal, ProcessMetadata};
pub use pid::{pid_from_value, Pid, PidValue};
