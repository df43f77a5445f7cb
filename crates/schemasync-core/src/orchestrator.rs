//! Applies a connection update plan to the database.
//!
//! Phases run in a fixed order on the calling task: validate, create or
//! replace schemas (deferring clone candidates), clone, drop schemas that
//! failed validation, annotate comments, and finally delete. A failed create
//! stops the update phase early, but the delete phase always runs.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clone::{CloneEngine, CloneProgress, ExemplarSchemas};
use crate::config::ReconcileConfig;
use crate::error::{Operation, SyncError};
use crate::pool::SchemaPool;
use crate::sql;
use crate::state_table::ConnectionStateTableUpdater;
use crate::status::{pluralize, StatusSink};
use crate::types::{ConnectionUpdatePlan, PluginSchema, RefreshConnectionResult};
use crate::validate::{validation_warning, PluginValidator};

pub struct Orchestrator {
    pool: Arc<dyn SchemaPool>,
    updater: Arc<ConnectionStateTableUpdater>,
    validator: Arc<dyn PluginValidator>,
    status: Arc<dyn StatusSink>,
    config: ReconcileConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<dyn SchemaPool>,
        updater: Arc<ConnectionStateTableUpdater>,
        validator: Arc<dyn PluginValidator>,
        status: Arc<dyn StatusSink>,
        config: ReconcileConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            updater,
            validator,
            status,
            config,
            cancel,
        }
    }

    /// Runs every phase for `plan` and returns the combined outcome.
    ///
    /// A plan that schedules a connection for both update and delete is
    /// rejected before anything is executed.
    #[instrument(
        skip_all,
        fields(updates = plan.to_update.len(), deletes = plan.to_delete.len())
    )]
    pub async fn execute(&self, plan: &ConnectionUpdatePlan) -> RefreshConnectionResult {
        let overlapping = plan.overlapping_connections();
        if !overlapping.is_empty() {
            return RefreshConnectionResult::from_error(SyncError::OverlappingPlan(overlapping));
        }

        let mut res = RefreshConnectionResult::default();
        if !plan.to_update.is_empty() {
            res.merge(self.execute_updates(plan).await);
        }
        res.merge(self.execute_deletes(plan.to_delete.iter().map(String::as_str)).await);
        res.warnings.extend(self.updater.take_warnings().await);
        res
    }

    #[instrument(skip_all, fields(updates = plan.to_update.len()))]
    async fn execute_updates(&self, plan: &ConnectionUpdatePlan) -> RefreshConnectionResult {
        let mut res = RefreshConnectionResult::default();

        let outcome = self
            .validator
            .validate(&plan.to_update, &plan.connection_plugins);
        if !outcome.failures.is_empty() {
            warn!(
                failures = outcome.failures.len(),
                "connections failed plugin validation"
            );
            res.add_warning(validation_warning(&outcome.failures));
            for failure in &outcome.failures {
                self.updater
                    .on_connection_error(&failure.connection_name, &failure.message)
                    .await;
            }
        }

        let validated = &outcome.validated_updates;
        let num_updates = validated.len();
        self.updater
            .begin_updating(validated.keys().map(String::as_str))
            .await;
        self.status.set_status(&format!(
            "Creating {num_updates} {}",
            pluralize("connection", num_updates)
        ));
        info!(connections = num_updates, "updating connection schemas");

        let exemplars = ExemplarSchemas::new();
        let mut deferred = IndexMap::new();
        let mut errors = Vec::new();
        let mut created = 0;

        for (idx, (name, data)) in validated.iter().enumerate() {
            if data.is_cloneable && exemplars.contains(&data.plugin).await {
                debug!(connection = %name, plugin = %data.plugin, "deferring to clone");
                deferred.insert(name.clone(), data.clone());
                continue;
            }

            let query = sql::build_create_or_replace(name, &data.remote_schema, &self.config);
            match self.run(name, Operation::Create, &query).await {
                Ok(()) => {
                    created += 1;
                    exemplars.record(&data.plugin, name).await;
                    self.updater.on_connection_updated(name).await;
                    self.status.set_status(&format!(
                        "Created {created} of {num_updates} {} ({name})",
                        pluralize("connection", num_updates)
                    ));
                }
                Err(SyncError::Cancelled) => {
                    let unprocessed = validated.keys().skip(idx).chain(deferred.keys());
                    self.mark_cancelled(unprocessed.map(String::as_str)).await;
                    errors.push(SyncError::Cancelled);
                    break;
                }
                Err(err) => {
                    warn!(connection = %name, error = %err, "failed to create connection");
                    self.updater.on_connection_error(name, &err).await;
                    errors.push(err);
                }
            }
        }

        if !errors.is_empty() {
            self.updater.finished_updating().await;
            res.add_errors(errors);
            return res;
        }

        if deferred.is_empty() {
            self.updater.finished_updating().await;
        } else {
            let engine = CloneEngine::new(
                self.pool.clone(),
                self.updater.clone(),
                self.status.clone(),
                self.cancel.clone(),
            );
            let progress = CloneProgress {
                completed: created,
                total: num_updates,
            };
            let clone_errors = engine
                .clone_connection_schemas(&exemplars, deferred, progress)
                .await;
            if !clone_errors.is_empty() {
                res.add_errors(clone_errors);
                return res;
            }
        }
        debug!("all update queries executed");

        for failure in outcome.failures.iter().filter(|f| f.should_drop_if_exists) {
            debug!(
                connection = %failure.connection_name,
                plugin = %failure.plugin,
                "dropping schema of connection that failed validation"
            );
            let query = sql::build_delete(&failure.connection_name);
            if let Err(err) = self
                .run(&failure.connection_name, Operation::Drop, &query)
                .await
            {
                errors.push(err);
            }
        }
        if !errors.is_empty() {
            res.add_errors(errors);
            return res;
        }

        if self.config.write_comments {
            if let Err(err) = self.write_comments(&outcome.validated_plugins).await {
                if let Some(name) = err.connection_name() {
                    self.updater.on_connection_error(name, &err).await;
                    self.updater.finished_updating().await;
                }
                res.add_error(err);
                return res;
            }
        }

        res
    }

    /// Writes comment annotations, one transaction per connection, each
    /// holding a lock on the namespace catalog.
    async fn write_comments(&self, plugins: &IndexMap<String, PluginSchema>) -> Result<(), SyncError> {
        let mut session = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            session = self.pool.acquire() => session.map_err(SyncError::Session)?,
        };

        self.status.set_status(&format!(
            "Writing comments for {} {}",
            plugins.len(),
            pluralize("connection", plugins.len())
        ));
        info!(connections = plugins.len(), "writing schema comments");

        for (name, schema) in plugins {
            let comments = sql::build_comments(name, schema);
            if comments.is_empty() {
                continue;
            }
            let statements = [sql::lock_namespace_catalog(), comments.as_str()];
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                res = session.exec_in_transaction(&statements) => {
                    res.map_err(|err| SyncError::connection(name, Operation::Comment, err))?;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(deletes = names.len()))]
    async fn execute_deletes<'a>(
        &self,
        names: impl ExactSizeIterator<Item = &'a str> + Clone,
    ) -> RefreshConnectionResult {
        let mut res = RefreshConnectionResult::default();
        let count = names.len();
        if count > 0 {
            self.status.set_status(&format!(
                "Deleting {count} {}",
                pluralize("connection", count)
            ));
            info!(connections = count, "deleting connection schemas");
        }

        self.updater.begin_deleting(names.clone()).await;
        let mut errors = Vec::new();
        for (idx, name) in names.clone().enumerate() {
            debug!(connection = name, "deleting connection");
            match self.run(name, Operation::Delete, &sql::build_delete(name)).await {
                Ok(()) => self.updater.on_connection_deleted(name).await,
                Err(SyncError::Cancelled) => {
                    self.mark_cancelled(names.clone().skip(idx)).await;
                    errors.push(SyncError::Cancelled);
                    break;
                }
                Err(err) => {
                    warn!(connection = name, error = %err, "failed to delete connection");
                    self.updater.on_connection_error(name, &err).await;
                    errors.push(err);
                }
            }
        }

        self.updater.finished_deleting().await;
        res.add_errors(errors);
        res
    }

    /// Executes `query` for one connection unless the pass is cancelled first.
    async fn run(&self, name: &str, operation: Operation, query: &str) -> Result<(), SyncError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SyncError::Cancelled),
            res = self.pool.exec(query) => {
                res.map_err(|err| SyncError::connection(name, operation, err))
            }
        }
    }

    async fn mark_cancelled<'a>(&self, names: impl Iterator<Item = &'a str>) {
        for name in names {
            self.updater
                .on_connection_error(name, &SyncError::Cancelled)
                .await;
        }
    }
}
