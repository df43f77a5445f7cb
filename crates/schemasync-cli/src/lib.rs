//! schemasync CLI library.
//!
//! This module exposes internal types for testing purposes.
//! The main entry point is the `schemasync` binary.

pub mod cli;
pub mod output;
pub mod plan_file;
pub mod snapshot;

// Re-export commonly used types
pub use cli::Args;
pub use plan_file::{PlanFileError, PlanFilePlanner};
pub use snapshot::JsonSnapshotWriter;
