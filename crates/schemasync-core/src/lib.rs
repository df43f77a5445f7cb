//! Reconciles foreign-data connection schemas with a computed update plan.
//!
//! A pass acquires a session, asks a [`Planner`] for the connections to
//! create, update or delete, applies that plan through the [`Orchestrator`],
//! persists per-connection progress via a [`StateStore`] and finally resets
//! the consumer role's search path. See [`Reconciler`] for the entry point.

pub mod clone;
pub mod config;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sql;
pub mod state_table;
pub mod status;
pub mod types;
pub mod validate;

// Re-export main types
pub use clone::{CloneEngine, CloneProgress, ExemplarSchemas};
pub use config::ReconcileConfig;
pub use driver::Reconciler;
pub use error::{
    CombinedError, Operation, PoolError, SnapshotError, StateStoreError, SyncError,
};
pub use orchestrator::Orchestrator;
pub use planner::{NoopSnapshotWriter, Planner, StateSnapshotWriter};
pub use pool::{PoolSession, SchemaPool};
pub use state_table::{ConnectionStateTableUpdater, MemoryStateStore, StateStore};
pub use status::{StatusSink, TracingStatus};
pub use types::{
    ColumnSchema, ConnectionData, ConnectionPlugin, ConnectionState, ConnectionStateRow,
    ConnectionUpdatePlan, PluginSchema, RefreshConnectionResult, TableSchema,
};
pub use validate::{
    PluginValidator, ProtocolVersionValidator, ValidationFailure, ValidationOutcome,
    SUPPORTED_PROTOCOL_VERSION,
};
