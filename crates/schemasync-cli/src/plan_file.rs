//! Planner backed by a JSON plan file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemasync_core::{ConnectionUpdatePlan, Planner, RefreshConnectionResult, SyncError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PlanFileError {
    #[error("failed to read plan file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plan file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads a [`ConnectionUpdatePlan`] from disk on every pass.
///
/// The plan is adjusted against the live database: deletions of schemas that
/// no longer exist are dropped from the plan, and forced connections known to
/// the final state are added to the updates. A plan that both updates and
/// deletes a connection is rejected.
#[derive(Debug, Clone)]
pub struct PlanFilePlanner {
    path: PathBuf,
}

impl PlanFilePlanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ConnectionUpdatePlan, PlanFileError> {
        let content = fs::read_to_string(&self.path).map_err(|source| PlanFileError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| PlanFileError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

#[async_trait]
impl Planner for PlanFilePlanner {
    async fn compute_plan(
        &self,
        existing_foreign_schemas: &[String],
        force_update: &[String],
    ) -> (ConnectionUpdatePlan, RefreshConnectionResult) {
        let mut plan = match self.load() {
            Ok(plan) => plan,
            Err(err) => {
                return (
                    ConnectionUpdatePlan::default(),
                    RefreshConnectionResult::from_error(SyncError::Planning(err.to_string())),
                )
            }
        };
        let mut res = RefreshConnectionResult::default();

        let existing: HashSet<&str> = existing_foreign_schemas.iter().map(String::as_str).collect();
        let before = plan.to_delete.len();
        plan.to_delete.retain(|name| existing.contains(name.as_str()));
        if plan.to_delete.len() != before {
            debug!(
                pruned = before - plan.to_delete.len(),
                "dropped deletions of schemas that do not exist"
            );
            plan.connection_state_modified = true;
        }

        let mut unknown = Vec::new();
        for name in force_update {
            if plan.to_update.contains_key(name) {
                continue;
            }
            match plan.final_connection_state.get(name) {
                Some(data) => {
                    debug!(connection = %name, "forcing update of unchanged connection");
                    plan.to_update.insert(name.clone(), data.clone());
                }
                None => unknown.push(name.as_str()),
            }
        }
        if !unknown.is_empty() {
            res.add_warning(format!(
                "cannot force update connections not in the plan: {}",
                unknown.join(", ")
            ));
        }

        let overlapping = plan.overlapping_connections();
        if !overlapping.is_empty() {
            let err = SyncError::Planning(format!(
                "plan file {} both updates and deletes: {}",
                self.path.display(),
                overlapping.join(", ")
            ));
            return (ConnectionUpdatePlan::default(), RefreshConnectionResult::from_error(err));
        }

        (plan, res)
    }
}
