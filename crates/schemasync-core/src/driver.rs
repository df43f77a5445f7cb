//! Entry point for a reconciliation pass.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ReconcileConfig;
use crate::error::SyncError;
use crate::orchestrator::Orchestrator;
use crate::planner::{NoopSnapshotWriter, Planner, StateSnapshotWriter};
use crate::pool::{PoolSession, SchemaPool};
use crate::sql;
use crate::state_table::{ConnectionStateTableUpdater, StateStore};
use crate::status::{pluralize, StatusSink, TracingStatus};
use crate::types::{ConnectionUpdatePlan, RefreshConnectionResult};
use crate::validate::{PluginValidator, ProtocolVersionValidator};

/// Drives one reconciliation pass from plan to search path.
pub struct Reconciler {
    pool: Arc<dyn SchemaPool>,
    planner: Arc<dyn Planner>,
    state_store: Arc<dyn StateStore>,
    validator: Arc<dyn PluginValidator>,
    snapshot: Arc<dyn StateSnapshotWriter>,
    status: Arc<dyn StatusSink>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        pool: Arc<dyn SchemaPool>,
        planner: Arc<dyn Planner>,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            pool,
            planner,
            state_store,
            validator: Arc::new(ProtocolVersionValidator::default()),
            snapshot: Arc::new(NoopSnapshotWriter),
            status: Arc::new(TracingStatus),
            config: ReconcileConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn PluginValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_snapshot_writer(mut self, snapshot: Arc<dyn StateSnapshotWriter>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Brings connection schemas in line with the planner's view and points
    /// the search path at them.
    ///
    /// Connections named in `force_update` are rebuilt even if unchanged. The
    /// search path is only touched when the pass itself succeeded.
    #[instrument(skip_all, fields(force_update = force_update.len()))]
    pub async fn refresh_connections_and_search_paths(
        &self,
        force_update: &[String],
        cancel: CancellationToken,
    ) -> RefreshConnectionResult {
        // Sessions are held only around catalog reads and the search path update.
        let foreign_schemas = match self.load_foreign_schema_names(&cancel).await {
            Ok(names) => names,
            Err(err) => return RefreshConnectionResult::from_error(err),
        };

        self.status.set_status("Refreshing connections");
        let mut res = self
            .refresh_connections(&foreign_schemas, force_update, &cancel)
            .await;
        if !res.is_ok() {
            return res;
        }

        self.status.set_status("Setting up search path");
        let schemas = if res.updated_connections {
            match self.load_foreign_schema_names(&cancel).await {
                Ok(names) => names,
                Err(err) => {
                    res.add_error(err);
                    return res;
                }
            }
        } else {
            foreign_schemas
        };
        let query = sql::build_search_path(
            &self.config.consumer_role,
            &self.config.search_path_prefix,
            &schemas,
        );
        let mut session = match self.acquire(&cancel).await {
            Ok(session) => session,
            Err(err) => {
                res.add_error(err);
                return res;
            }
        };
        if let Err(err) = session.exec(&query).await {
            res.add_error(SyncError::SearchPath(err));
        }
        res
    }

    async fn refresh_connections(
        &self,
        foreign_schemas: &[String],
        force_update: &[String],
        cancel: &CancellationToken,
    ) -> RefreshConnectionResult {
        let (plan, mut res) = self
            .planner
            .compute_plan(foreign_schemas, force_update)
            .await;
        if !res.is_ok() {
            return res;
        }
        debug!(
            updates = plan.to_update.len(),
            deletes = plan.to_delete.len(),
            missing_plugins = plan.missing_plugins.len(),
            "computed connection updates"
        );

        let overlapping = plan.overlapping_connections();
        if !overlapping.is_empty() {
            res.add_error(SyncError::OverlappingPlan(overlapping));
            return res;
        }

        let updater = Arc::new(ConnectionStateTableUpdater::new(
            self.state_store.clone(),
            self.config.state_flush_batch,
        ));
        updater.start(&plan).await;

        if let Some(warning) = missing_plugins_warning(&plan) {
            res.add_warning(warning);
        }

        if plan.has_updates() {
            let orchestrator = Orchestrator::new(
                self.pool.clone(),
                updater.clone(),
                self.validator.clone(),
                self.status.clone(),
                self.config.clone(),
                cancel.clone(),
            );
            let outcome = orchestrator.execute(&plan).await;
            let succeeded = outcome.is_ok();
            res.merge(outcome);
            if succeeded {
                res.updated_connections = true;
            }
        } else {
            info!("no connection updates required");
        }
        res.warnings.extend(updater.take_warnings().await);

        if res.is_ok() && (plan.connection_state_modified || res.updated_connections) {
            if let Err(err) = self.snapshot.save(&plan) {
                warn!(error = %err, "failed to save connection state snapshot");
                res.add_warning(format!("failed to save connection state: {err}"));
            }
        }
        res
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<Box<dyn PoolSession>, SyncError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SyncError::Cancelled),
            session = self.pool.acquire() => session.map_err(SyncError::Session),
        }
    }

    /// Reads the foreign schema names on a session that is released before
    /// this returns.
    async fn load_foreign_schema_names(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, SyncError> {
        let mut session = self.acquire(cancel).await?;
        session
            .query_strings(&sql::foreign_schema_names_query(&self.config.foreign_server))
            .await
            .map_err(SyncError::Session)
    }
}

fn missing_plugins_warning(plan: &ConnectionUpdatePlan) -> Option<String> {
    if plan.missing_plugins.is_empty() {
        return None;
    }
    let plugins: Vec<&str> = plan.missing_plugins.keys().map(String::as_str).collect();
    let connections = plan.missing_plugin_connections().count();
    Some(format!(
        "{} {} required by {} {} {} missing. To install, please run: schemasync plugin install {}",
        plugins.len(),
        pluralize("plugin", plugins.len()),
        connections,
        pluralize("connection", connections),
        pluralize("is", plugins.len()),
        plugins.join(" ")
    ))
}
