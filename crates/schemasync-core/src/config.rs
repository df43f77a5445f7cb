//! Reconciliation settings passed explicitly to the driver and orchestrator.

use serde::{Deserialize, Serialize};

/// Configuration for a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    /// Annotate imported tables and columns with plugin descriptions.
    pub write_comments: bool,
    /// Foreign server that connection schemas are imported from.
    pub foreign_server: String,
    /// Role granted read access to connection schemas; its search path is
    /// updated at the end of a pass.
    pub consumer_role: String,
    /// Schemas placed ahead of connection schemas in the search path.
    pub search_path_prefix: Vec<String>,
    /// Table backing the connection state, optionally schema-qualified.
    pub state_table: String,
    /// Number of buffered state transitions that triggers a flush.
    pub state_flush_batch: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            write_comments: false,
            foreign_server: "schemasync".to_string(),
            consumer_role: "schemasync_users".to_string(),
            search_path_prefix: vec!["public".to_string()],
            state_table: "schemasync_connection_state".to_string(),
            state_flush_batch: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ReconcileConfig =
            serde_json::from_str(r#"{"writeComments": true}"#).expect("parse config");
        assert!(config.write_comments);
        assert_eq!(config.foreign_server, "schemasync");
        assert_eq!(config.search_path_prefix, vec!["public"]);
        assert_eq!(config.state_flush_batch, 20);
    }
}
