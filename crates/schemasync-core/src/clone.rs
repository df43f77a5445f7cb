//! Parallel cloning of static plugin schemas.
//!
//! When a plugin declares its schema static, every connection of that plugin
//! has the same tables. Once one of them has been imported it serves as an
//! exemplar, and the remaining connections are cloned from it instead of
//! re-importing the foreign schema.
//!
//! Workers never touch connection state. They report on two channels to a
//! single aggregator task, which is the only writer to the state table and to
//! progress output while cloning runs.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Operation, SyncError};
use crate::pool::SchemaPool;
use crate::sql;
use crate::state_table::ConnectionStateTableUpdater;
use crate::status::{pluralize, StatusSink};
use crate::types::ConnectionData;

/// Per plugin, one connection whose schema is fully materialized.
///
/// Shared by all clone workers; every access goes through one lock.
#[derive(Debug, Clone, Default)]
pub struct ExemplarSchemas {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl ExemplarSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, plugin: &str) -> Option<String> {
        self.inner.lock().await.get(plugin).cloned()
    }

    pub async fn contains(&self, plugin: &str) -> bool {
        self.inner.lock().await.contains_key(plugin)
    }

    /// Makes `connection_name` the clone source for `plugin`.
    pub async fn record(&self, plugin: &str, connection_name: &str) {
        self.inner
            .lock()
            .await
            .insert(plugin.to_string(), connection_name.to_string());
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().await.clone()
    }
}

/// Progress numbering shared with the preceding update phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneProgress {
    /// Connections already created before cloning starts.
    pub completed: usize,
    /// Total connections being created in this pass.
    pub total: usize,
}

/// Clones deferred connections with at most one database session per worker.
pub struct CloneEngine {
    pool: Arc<dyn SchemaPool>,
    updater: Arc<ConnectionStateTableUpdater>,
    status: Arc<dyn StatusSink>,
    cancel: CancellationToken,
}

impl CloneEngine {
    pub fn new(
        pool: Arc<dyn SchemaPool>,
        updater: Arc<ConnectionStateTableUpdater>,
        status: Arc<dyn StatusSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            updater,
            status,
            cancel,
        }
    }

    /// Clones every connection in `deferred` from its plugin's exemplar.
    ///
    /// Concurrency is capped at the pool's maximum connection count. A
    /// successful clone becomes the plugin's exemplar, so later clones may
    /// chain off it. Returns the errors of all failed clones; state for every
    /// connection is flushed before this returns.
    pub async fn clone_connection_schemas(
        &self,
        exemplars: &ExemplarSchemas,
        deferred: IndexMap<String, ConnectionData>,
        progress: CloneProgress,
    ) -> Vec<SyncError> {
        if deferred.is_empty() {
            return Vec::new();
        }

        let limit = self.pool.max_connections().max(1);
        info!(
            connections = deferred.len(),
            concurrency = limit,
            "cloning connection schemas"
        );
        self.status.set_status(&format!(
            "Cloning {} {}",
            deferred.len(),
            pluralize("connection", deferred.len())
        ));

        let (progress_tx, progress_rx) = mpsc::unbounded_channel::<String>();
        let (error_tx, error_rx) = mpsc::unbounded_channel::<(String, SyncError)>();
        let aggregator = tokio::spawn(aggregate(
            progress_rx,
            error_rx,
            self.updater.clone(),
            self.status.clone(),
            progress,
        ));

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut workers = JoinSet::new();
        let mut launched: HashMap<task::Id, String> = HashMap::new();
        let mut queue = deferred.into_iter();

        while let Some((name, data)) = queue.next() {
            let permit = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                // Never launched: unwind them through the aggregator.
                for (name, _) in std::iter::once((name, data)).chain(queue.by_ref()) {
                    let _ = error_tx.send((name, SyncError::Cancelled));
                }
                break;
            };

            let pool = self.pool.clone();
            let exemplars = exemplars.clone();
            let cancel = self.cancel.clone();
            let progress_tx = progress_tx.clone();
            let error_tx = error_tx.clone();
            let worker_name = name.clone();
            let handle = workers.spawn(async move {
                let result = clone_connection(&*pool, &exemplars, &cancel, &name, &data).await;
                drop(permit);
                match result {
                    Ok(()) => {
                        let _ = progress_tx.send(name);
                    }
                    Err(err) => {
                        let _ = error_tx.send((name, err));
                    }
                }
            });
            launched.insert(handle.id(), worker_name);
        }

        // A worker that panicked never reported; fail its connection here.
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                let name = launched.remove(&err.id()).unwrap_or_default();
                warn!(connection = %name, error = %err, "clone worker did not complete");
                let _ = error_tx.send((name, SyncError::Worker(err.to_string())));
            }
        }

        // Closing both channels tells the aggregator to drain and finish.
        drop(progress_tx);
        drop(error_tx);
        match aggregator.await {
            Ok(errors) => errors,
            Err(err) => vec![SyncError::Worker(err.to_string())],
        }
    }
}

async fn clone_connection(
    pool: &dyn SchemaPool,
    exemplars: &ExemplarSchemas,
    cancel: &CancellationToken,
    name: &str,
    data: &ConnectionData,
) -> Result<(), SyncError> {
    let exemplar = exemplars
        .get(&data.plugin)
        .await
        .ok_or_else(|| SyncError::NoExemplar {
            name: name.to_string(),
            plugin: data.plugin.clone(),
        })?;

    debug!(connection = name, exemplar = %exemplar, "cloning schema");
    let query = sql::build_clone(&exemplar, name, &data.plugin);
    tokio::select! {
        () = cancel.cancelled() => return Err(SyncError::Cancelled),
        res = pool.exec(&query) => {
            res.map_err(|err| SyncError::connection(name, Operation::Clone, err))?;
        }
    }

    exemplars.record(&data.plugin, name).await;
    Ok(())
}

async fn aggregate(
    mut progress_rx: mpsc::UnboundedReceiver<String>,
    mut error_rx: mpsc::UnboundedReceiver<(String, SyncError)>,
    updater: Arc<ConnectionStateTableUpdater>,
    status: Arc<dyn StatusSink>,
    mut progress: CloneProgress,
) -> Vec<SyncError> {
    let mut errors = Vec::new();
    loop {
        tokio::select! {
            Some((name, err)) = error_rx.recv() => {
                warn!(connection = %name, error = %err, "failed to clone connection");
                updater.on_connection_error(&name, &err).await;
                errors.push(err);
            }
            Some(name) = progress_rx.recv() => {
                progress.completed += 1;
                updater.on_connection_updated(&name).await;
                status.set_status(&format!(
                    "Cloned {} of {} {} ({name})",
                    progress.completed,
                    progress.total,
                    pluralize("connection", progress.total)
                ));
            }
            else => break,
        }
    }
    updater.finished_updating().await;
    errors
}
