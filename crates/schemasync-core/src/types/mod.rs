//! Data model for connection reconciliation.
//!
//! A reconciliation pass consumes a [`ConnectionUpdatePlan`], tracks each
//! connection's [`ConnectionState`] while schemas are rebuilt or dropped, and
//! produces a [`RefreshConnectionResult`].

mod plan;
mod result;
mod state;

pub use plan::{
    ColumnSchema, ConnectionData, ConnectionPlugin, ConnectionUpdatePlan, PluginSchema,
    TableSchema,
};
pub use result::RefreshConnectionResult;
pub use state::{ConnectionState, ConnectionStateRow};
