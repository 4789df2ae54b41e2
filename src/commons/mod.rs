//! Common types and helpers used across the crate.

pub mod error;
pub mod util;
