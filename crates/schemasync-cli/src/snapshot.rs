use std::fs;
use std::path::PathBuf;

use schemasync_core::{ConnectionUpdatePlan, SnapshotError, StateSnapshotWriter};

/// Writes the final connection state as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonSnapshotWriter {
    path: PathBuf,
}

impl JsonSnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateSnapshotWriter for JsonSnapshotWriter {
    fn save(&self, plan: &ConnectionUpdatePlan) -> Result<(), SnapshotError> {
        let mut json = serde_json::to_string_pretty(&plan.final_connection_state)?;
        json.push('\n');
        fs::write(&self.path, json)?;
        Ok(())
    }
}
