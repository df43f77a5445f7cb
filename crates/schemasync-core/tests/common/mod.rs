//! Shared doubles for the reconciliation integration tests.
//!
//! [`MockPool`] keeps a set of existing schemas and applies the create, drop
//! and clone statements it receives to that set, so a test can check what a
//! pass left behind as well as which statements it sent.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use schemasync_core::{
    ConnectionData, ConnectionUpdatePlan, PoolError, PoolSession, Planner,
    RefreshConnectionResult, SchemaPool, SnapshotError, StateSnapshotWriter, StatusSink,
    SyncError,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

struct MockState {
    max_connections: usize,
    slots: Arc<Semaphore>,
    delay: Duration,
    fail_on: Mutex<Vec<String>>,
    panic_on: Mutex<Vec<String>>,
    fail_acquire: Mutex<Option<PoolError>>,
    schemas: Mutex<BTreeSet<String>>,
    statements: Mutex<Vec<String>>,
    transactions: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockState {
    fn new(max_connections: usize, delay: Duration) -> Self {
        Self {
            max_connections,
            slots: Arc::new(Semaphore::new(max_connections)),
            delay,
            fail_on: Mutex::default(),
            panic_on: Mutex::default(),
            fail_acquire: Mutex::default(),
            schemas: Mutex::default(),
            statements: Mutex::default(),
            transactions: Mutex::default(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    async fn exec(&self, sql: &str) -> Result<(), PoolError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let res = self.apply(sql);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res
    }

    fn apply(&self, sql: &str) -> Result<(), PoolError> {
        let panics = matches_any(&self.panic_on, sql);
        assert!(!panics, "mock pool panicked on {sql}");
        self.statements.lock().unwrap().push(sql.to_string());
        if matches_any(&self.fail_on, sql) {
            return Err(PoolError::Database("mock failure".into()));
        }

        let mut schemas = self.schemas.lock().unwrap();
        for line in sql.lines() {
            if let Some(rest) = line.strip_prefix("drop schema if exists \"") {
                schemas.remove(quoted_prefix(rest));
            } else if let Some(rest) = line.strip_prefix("create schema \"") {
                schemas.insert(quoted_prefix(rest).to_string());
            } else if let Some(rest) = line.strip_prefix("select clone_foreign_schema('") {
                let args: Vec<&str> = rest.splitn(3, "', '").collect();
                let (source, target) = (args[0], args[1]);
                if !schemas.contains(source) {
                    return Err(PoolError::Database(format!(
                        "schema \"{source}\" does not exist"
                    )));
                }
                schemas.insert(target.to_string());
            }
        }
        Ok(())
    }
}

fn matches_any(patterns: &Mutex<Vec<String>>, sql: &str) -> bool {
    patterns
        .lock()
        .unwrap()
        .iter()
        .any(|pattern| sql.contains(pattern.as_str()))
}

fn quoted_prefix(rest: &str) -> &str {
    rest.split('"').next().unwrap_or(rest)
}

/// In-memory [`SchemaPool`] recording every statement it executes.
#[derive(Clone)]
pub struct MockPool {
    state: Arc<MockState>,
}

impl MockPool {
    pub fn new(max_connections: usize) -> Self {
        Self::with_delay(max_connections, Duration::ZERO)
    }

    /// Every statement sleeps for `delay` while counted as in flight.
    pub fn with_delay(max_connections: usize, delay: Duration) -> Self {
        Self {
            state: Arc::new(MockState::new(max_connections, delay)),
        }
    }

    pub fn with_schemas(self, names: &[&str]) -> Self {
        self.state
            .schemas
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Fails every statement containing `pattern`.
    pub fn fail_on(&self, pattern: &str) {
        self.state.fail_on.lock().unwrap().push(pattern.to_string());
    }

    /// Panics the executing task on every statement containing `pattern`.
    pub fn panic_on(&self, pattern: &str) {
        self.state.panic_on.lock().unwrap().push(pattern.to_string());
    }

    pub fn fail_acquire(&self, err: PoolError) {
        *self.state.fail_acquire.lock().unwrap() = Some(err);
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.statements.lock().unwrap().clone()
    }

    pub fn statements_containing(&self, pattern: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.contains(pattern))
            .collect()
    }

    pub fn transactions(&self) -> Vec<Vec<String>> {
        self.state.transactions.lock().unwrap().clone()
    }

    pub fn schemas(&self) -> Vec<String> {
        self.state.schemas.lock().unwrap().iter().cloned().collect()
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.state.schemas.lock().unwrap().contains(name)
    }

    /// Highest number of statements that were executing at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaPool for MockPool {
    async fn exec(&self, sql: &str) -> Result<(), PoolError> {
        let _slot = self
            .state
            .slots
            .acquire()
            .await
            .map_err(|err| PoolError::Acquire(err.to_string()))?;
        self.state.exec(sql).await
    }

    async fn acquire(&self) -> Result<Box<dyn PoolSession>, PoolError> {
        if let Some(err) = self.state.fail_acquire.lock().unwrap().clone() {
            return Err(err);
        }
        let slot = self
            .state
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| PoolError::Acquire(err.to_string()))?;
        Ok(Box::new(MockSession {
            state: self.state.clone(),
            _slot: slot,
        }))
    }

    fn max_connections(&self) -> usize {
        self.state.max_connections
    }
}

struct MockSession {
    state: Arc<MockState>,
    _slot: OwnedSemaphorePermit,
}

#[async_trait]
impl PoolSession for MockSession {
    async fn exec(&mut self, sql: &str) -> Result<(), PoolError> {
        self.state.exec(sql).await
    }

    async fn exec_in_transaction(&mut self, statements: &[&str]) -> Result<(), PoolError> {
        self.state
            .transactions
            .lock()
            .unwrap()
            .push(statements.iter().map(|s| s.to_string()).collect());
        for statement in statements {
            self.state.exec(statement).await?;
        }
        Ok(())
    }

    async fn query_strings(&mut self, _sql: &str) -> Result<Vec<String>, PoolError> {
        Ok(self.state.schemas.lock().unwrap().iter().cloned().collect())
    }
}

/// Returns the same plan on every call and records what it was asked.
pub struct StaticPlanner {
    plan: ConnectionUpdatePlan,
    error: Option<String>,
    calls: Mutex<Vec<(Vec<String>, Vec<String>)>>,
}

impl StaticPlanner {
    pub fn new(plan: ConnectionUpdatePlan) -> Self {
        Self {
            plan,
            error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new(ConnectionUpdatePlan::default())
        }
    }

    /// `(existing_foreign_schemas, force_update)` of every call.
    pub fn calls(&self) -> Vec<(Vec<String>, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn compute_plan(
        &self,
        existing_foreign_schemas: &[String],
        force_update: &[String],
    ) -> (ConnectionUpdatePlan, RefreshConnectionResult) {
        self.calls
            .lock()
            .unwrap()
            .push((existing_foreign_schemas.to_vec(), force_update.to_vec()));
        let res = match &self.error {
            Some(message) => RefreshConnectionResult::from_error(SyncError::Planning(message.clone())),
            None => RefreshConnectionResult::default(),
        };
        (self.plan.clone(), res)
    }
}

/// Records status messages; optionally cancels a token when a message with
/// the given prefix is reported.
#[derive(Default)]
pub struct RecordingStatus {
    messages: Mutex<Vec<String>>,
    cancel_on: Option<(String, CancellationToken)>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelling_on(prefix: &str, cancel: CancellationToken) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            cancel_on: Some((prefix.to_string(), cancel)),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingStatus {
    fn set_status(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
        if let Some((prefix, cancel)) = &self.cancel_on {
            if message.starts_with(prefix.as_str()) {
                cancel.cancel();
            }
        }
    }
}

/// Counts saves; fails every save when built with [`RecordingSnapshot::failing`].
#[derive(Default)]
pub struct RecordingSnapshot {
    saves: AtomicUsize,
    fail: bool,
}

impl RecordingSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            saves: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateSnapshotWriter for RecordingSnapshot {
    fn save(&self, _plan: &ConnectionUpdatePlan) -> Result<(), SnapshotError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SnapshotError::Io(std::io::Error::other("read-only file system")));
        }
        Ok(())
    }
}

pub fn connection(name: &str, plugin: &str) -> ConnectionData {
    ConnectionData::new(name, plugin, plugin.rsplit('/').next().unwrap_or(plugin))
}

pub fn cloneable(name: &str, plugin: &str) -> ConnectionData {
    connection(name, plugin).cloneable(true)
}

/// Plan updating `updates` in order and deleting `deletes`.
pub fn plan(updates: Vec<ConnectionData>, deletes: &[&str]) -> ConnectionUpdatePlan {
    let mut plan = ConnectionUpdatePlan::default();
    for data in updates {
        plan.final_connection_state
            .insert(data.name.clone(), data.clone());
        plan.to_update.insert(data.name.clone(), data);
    }
    plan.to_delete = deletes.iter().map(|d| d.to_string()).collect();
    plan
}
