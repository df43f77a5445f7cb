//! Plugin compatibility checks run before any schema is rebuilt.

use std::collections::HashMap;
use std::fmt::Write;

use indexmap::IndexMap;

use crate::status::pluralize;
use crate::types::{ConnectionData, ConnectionPlugin, PluginSchema};

/// Highest plugin protocol version this engine understands.
pub const SUPPORTED_PROTOCOL_VERSION: u32 = 5;

/// A planned update that may not proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub connection_name: String,
    pub plugin: String,
    pub message: String,
    /// The existing schema is unsafe to keep and must be dropped.
    pub should_drop_if_exists: bool,
}

/// Partition of the planned updates produced by a [`PluginValidator`].
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub failures: Vec<ValidationFailure>,
    /// Updates that may proceed, in plan order.
    pub validated_updates: IndexMap<String, ConnectionData>,
    /// Reported schema of each validated connection that has plugin metadata.
    pub validated_plugins: IndexMap<String, PluginSchema>,
}

pub trait PluginValidator: Send + Sync {
    fn validate(
        &self,
        updates: &IndexMap<String, ConnectionData>,
        connection_plugins: &[ConnectionPlugin],
    ) -> ValidationOutcome;
}

/// Rejects connections whose plugin speaks a newer protocol than supported.
///
/// Updates without plugin metadata are accepted as is.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolVersionValidator {
    pub max_supported: u32,
}

impl Default for ProtocolVersionValidator {
    fn default() -> Self {
        Self {
            max_supported: SUPPORTED_PROTOCOL_VERSION,
        }
    }
}

impl PluginValidator for ProtocolVersionValidator {
    fn validate(
        &self,
        updates: &IndexMap<String, ConnectionData>,
        connection_plugins: &[ConnectionPlugin],
    ) -> ValidationOutcome {
        let by_plugin: HashMap<&str, &ConnectionPlugin> = connection_plugins
            .iter()
            .map(|p| (p.plugin.as_str(), p))
            .collect();

        let mut outcome = ValidationOutcome::default();
        for (name, data) in updates {
            let Some(plugin) = by_plugin.get(data.plugin.as_str()) else {
                outcome.validated_updates.insert(name.clone(), data.clone());
                continue;
            };

            if plugin.protocol_version > self.max_supported {
                outcome.failures.push(ValidationFailure {
                    connection_name: name.clone(),
                    plugin: data.plugin.clone(),
                    message: format!(
                        "plugin requires protocol version {} but the maximum supported is {}",
                        plugin.protocol_version, self.max_supported
                    ),
                    should_drop_if_exists: true,
                });
                continue;
            }

            outcome.validated_updates.insert(name.clone(), data.clone());
            if let Some(schema) = plugin.connections.get(name) {
                outcome
                    .validated_plugins
                    .insert(name.clone(), schema.clone());
            }
        }
        outcome
    }
}

/// Single warning describing every failure.
pub fn validation_warning(failures: &[ValidationFailure]) -> String {
    let mut warning = format!(
        "{} {} failed validation and will not be loaded:",
        failures.len(),
        pluralize("connection", failures.len())
    );
    for failure in failures {
        let _ = write!(
            warning,
            "\n  - {} ({}): {}",
            failure.connection_name, failure.plugin, failure.message
        );
    }
    warning
}
