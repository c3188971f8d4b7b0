//! Shared types and constants for flowstamp probe points
//!
//! This crate provides the record layout, probe enumeration and the
//! compile-time limits shared between the event log engine and the
//! userspace tooling that replays and exports it.

#![no_std]

pub mod constants;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use types::{EventRecord, ProbePoint, Timeval};
