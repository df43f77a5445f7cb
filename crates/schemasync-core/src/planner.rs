//! Collaborators at either end of a pass: the planner that computes the diff
//! and the writer that persists the resulting connection set.

use async_trait::async_trait;

use crate::error::SnapshotError;
use crate::types::{ConnectionUpdatePlan, RefreshConnectionResult};

/// Computes which connections need creating, updating or deleting.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Builds the plan for the current configuration.
    ///
    /// `existing_foreign_schemas` lists the connection schemas currently
    /// present in the database. Connections named in `force_update` are
    /// rebuilt even when unchanged. Errors and warnings reported through the
    /// returned result are merged into the pass result; an error aborts the
    /// pass before any schema is touched.
    async fn compute_plan(
        &self,
        existing_foreign_schemas: &[String],
        force_update: &[String],
    ) -> (ConnectionUpdatePlan, RefreshConnectionResult);
}

/// Persists the final connection state for use at the next startup.
pub trait StateSnapshotWriter: Send + Sync {
    fn save(&self, plan: &ConnectionUpdatePlan) -> Result<(), SnapshotError>;
}

/// Discards snapshots.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSnapshotWriter;

impl StateSnapshotWriter for NoopSnapshotWriter {
    fn save(&self, _plan: &ConnectionUpdatePlan) -> Result<(), SnapshotError> {
        Ok(())
    }
}
