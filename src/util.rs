//! Shared helpers used across the index components.

pub mod checksum;
pub mod time;
