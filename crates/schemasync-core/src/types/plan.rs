use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A connection that should exist after the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    pub name: String,
    /// Fully qualified plugin reference, e.g. `hub.example.io/plugins/acme/aws@latest`.
    pub plugin: String,
    /// Schema exposed by the foreign server for this plugin.
    pub remote_schema: String,
    /// True when the plugin declares its schema static, so every connection
    /// of the plugin has an identical schema and may be cloned.
    #[serde(default)]
    pub is_cloneable: bool,
}

impl ConnectionData {
    pub fn new(
        name: impl Into<String>,
        plugin: impl Into<String>,
        remote_schema: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            plugin: plugin.into(),
            remote_schema: remote_schema.into(),
            is_cloneable: false,
        }
    }

    pub fn cloneable(mut self, is_cloneable: bool) -> Self {
        self.is_cloneable = is_cloneable;
        self
    }
}

/// Column metadata reported by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Table metadata reported by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
}

/// Introspected schema of a single connection, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSchema {
    #[serde(default)]
    pub tables: IndexMap<String, TableSchema>,
}

/// Metadata bundle for one plugin, mapping each of its connections to the
/// schema the plugin reported for it. Read-only; used for validation and
/// comment annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPlugin {
    pub plugin: String,
    /// Protocol version the plugin was built against.
    #[serde(default)]
    pub protocol_version: u32,
    #[serde(default)]
    pub connections: IndexMap<String, PluginSchema>,
}

/// The externally computed diff driving a reconciliation pass.
///
/// Produced once per pass and never mutated afterwards. `to_update` keeps the
/// planner's ordering; updates are attempted in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdatePlan {
    #[serde(default)]
    pub to_update: IndexMap<String, ConnectionData>,
    #[serde(default)]
    pub to_delete: BTreeSet<String>,
    /// Plugins that are referenced by connections but not installed.
    #[serde(default)]
    pub missing_plugins: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub connection_plugins: Vec<ConnectionPlugin>,
    /// Set by the planner when it had to change the persisted connection
    /// state, e.g. by pruning connections that no longer exist.
    #[serde(default)]
    pub connection_state_modified: bool,
    /// Connection set to persist for the next startup once the pass succeeds.
    #[serde(default)]
    pub final_connection_state: BTreeMap<String, ConnectionData>,
}

impl ConnectionUpdatePlan {
    pub fn has_updates(&self) -> bool {
        !self.to_update.is_empty() || !self.to_delete.is_empty()
    }

    /// Connection names that appear in both `to_update` and `to_delete`.
    ///
    /// Planners must never produce such a plan; a non-empty result makes the
    /// plan unusable.
    pub fn overlapping_connections(&self) -> Vec<String> {
        self.to_update
            .keys()
            .filter(|name| self.to_delete.contains(*name))
            .cloned()
            .collect()
    }

    /// Connection names whose plugin is missing, paired with the plugin.
    pub fn missing_plugin_connections(&self) -> impl Iterator<Item = (&str, &str)> {
        self.missing_plugins.iter().flat_map(|(plugin, connections)| {
            connections
                .iter()
                .map(move |name| (name.as_str(), plugin.as_str()))
        })
    }
}
