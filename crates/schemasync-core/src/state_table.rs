//! Durable per-connection state, updated as a pass progresses.
//!
//! [`ConnectionStateTableUpdater`] is the only component that writes
//! connection state. Other components request transitions; the updater appends
//! them to a log and flushes the log to a [`StateStore`] in batches and at the
//! end of every phase, so external readers can follow a pass while it runs.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StateStoreError;
use crate::types::{ConnectionState, ConnectionStateRow, ConnectionUpdatePlan};

/// Durable storage for connection state rows, keyed by connection name.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upserts `rows` in order; a later row for the same name wins.
    async fn write(&self, rows: &[ConnectionStateRow]) -> Result<(), StateStoreError>;
}

/// Keeps connection state in memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    rows: Mutex<BTreeMap<String, ConnectionStateRow>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row(&self, name: &str) -> Option<ConnectionStateRow> {
        self.rows.lock().await.get(name).cloned()
    }

    pub async fn state(&self, name: &str) -> Option<ConnectionState> {
        self.row(name).await.map(|row| row.state)
    }

    pub async fn rows(&self) -> Vec<ConnectionStateRow> {
        self.rows.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn write(&self, rows: &[ConnectionStateRow]) -> Result<(), StateStoreError> {
        let mut stored = self.rows.lock().await;
        for row in rows {
            stored.insert(row.name.clone(), row.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TransitionLog {
    pending: Vec<ConnectionStateRow>,
    /// Connections marked `error` during this pass.
    failed: HashSet<String>,
    warnings: Vec<String>,
}

/// Buffers connection state transitions and writes them to a [`StateStore`].
///
/// All methods may be called concurrently. Persistence failures never
/// propagate; they are logged and collected as warnings.
pub struct ConnectionStateTableUpdater {
    store: Arc<dyn StateStore>,
    flush_batch: usize,
    log: Mutex<TransitionLog>,
}

impl ConnectionStateTableUpdater {
    pub fn new(store: Arc<dyn StateStore>, flush_batch: usize) -> Self {
        Self {
            store,
            flush_batch: flush_batch.max(1),
            log: Mutex::new(TransitionLog::default()),
        }
    }

    /// Persists the initial state of every connection in `plan`.
    ///
    /// Updates and deletes start out `pending`; connections whose plugin is
    /// missing are marked `error` straight away.
    pub async fn start(&self, plan: &ConnectionUpdatePlan) {
        let mut log = self.log.lock().await;
        for name in plan.to_update.keys().chain(plan.to_delete.iter()) {
            log.pending
                .push(ConnectionStateRow::new(name, ConnectionState::Pending));
        }
        for (name, plugin) in plan.missing_plugin_connections() {
            log.failed.insert(name.to_string());
            log.pending.push(ConnectionStateRow::error(
                name,
                format!("plugin {plugin} is not installed"),
            ));
        }
        self.flush_locked(&mut log).await;
    }

    pub async fn begin_updating<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        self.push_all(names, ConnectionState::Updating).await;
    }

    pub async fn begin_deleting<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        self.push_all(names, ConnectionState::Deleting).await;
    }

    pub async fn on_connection_updated(&self, name: &str) {
        self.push(ConnectionStateRow::new(name, ConnectionState::Ready))
            .await;
    }

    pub async fn on_connection_deleted(&self, name: &str) {
        self.push(ConnectionStateRow::new(name, ConnectionState::Deleted))
            .await;
    }

    pub async fn on_connection_error(&self, name: &str, err: impl Display) {
        self.push(ConnectionStateRow::error(name, err.to_string()))
            .await;
    }

    /// Flushes buffered transitions at the end of the update phase.
    pub async fn finished_updating(&self) {
        let mut log = self.log.lock().await;
        self.flush_locked(&mut log).await;
        info!("connection updates persisted");
    }

    /// Flushes buffered transitions at the end of the delete phase.
    pub async fn finished_deleting(&self) {
        let mut log = self.log.lock().await;
        self.flush_locked(&mut log).await;
        info!("connection deletions persisted");
    }

    /// Warnings collected from failed writes so far.
    pub async fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut self.log.lock().await.warnings)
    }

    async fn push_all<'a>(&self, names: impl IntoIterator<Item = &'a str>, state: ConnectionState) {
        let mut log = self.log.lock().await;
        for name in names {
            if log.failed.contains(name) {
                continue;
            }
            log.pending.push(ConnectionStateRow::new(name, state));
        }
        if log.pending.len() >= self.flush_batch {
            self.flush_locked(&mut log).await;
        }
    }

    async fn push(&self, row: ConnectionStateRow) {
        let mut log = self.log.lock().await;
        if row.state == ConnectionState::Error {
            log.failed.insert(row.name.clone());
        } else if log.failed.contains(&row.name) {
            debug!(
                connection = %row.name,
                state = %row.state,
                "ignoring transition for connection already in error"
            );
            return;
        }
        log.pending.push(row);
        if log.pending.len() >= self.flush_batch {
            self.flush_locked(&mut log).await;
        }
    }

    // Writes happen with the log locked, so batches reach the store in order.
    async fn flush_locked(&self, log: &mut TransitionLog) {
        if log.pending.is_empty() {
            return;
        }
        let rows = std::mem::take(&mut log.pending);
        debug!(rows = rows.len(), "flushing connection state");
        if let Err(err) = self.store.write(&rows).await {
            warn!(error = %err, rows = rows.len(), "failed to persist connection state");
            let warning = err.to_string();
            if !log.warnings.contains(&warning) {
                log.warnings.push(warning);
            }
        }
    }
}
