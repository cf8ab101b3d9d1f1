//! Command-line entry points.

pub mod classify;
pub mod process;
pub mod schema;
