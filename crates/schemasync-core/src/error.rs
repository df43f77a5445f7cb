//! Error types for connection reconciliation.
//!
//! # Error Handling Strategy
//!
//! A reconciliation pass distinguishes fatal errors from per-connection ones:
//!
//! - Planning errors, overlapping plans, and failures to reach the database
//!   abort the pass before any schema is touched.
//!
//! - [`SyncError::Connection`] records a failed create, clone, delete, drop, or
//!   comment operation against a single connection. These are collected into a
//!   [`CombinedError`] while processing continues for unrelated connections.
//!
//! Failures to persist connection state or the state snapshot are never errors
//! of the pass; they are downgraded to warnings on the
//! [`crate::RefreshConnectionResult`].

use std::fmt;

use thiserror::Error;

/// Error returned by the database pool or one of its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("database error: {0}")]
    Database(String),

    #[error("failed to acquire a database session: {0}")]
    Acquire(String),

    #[error("pool is closed")]
    Closed,
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PoolError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => PoolError::Closed,
            sqlx::Error::PoolTimedOut => {
                PoolError::Acquire("timed out waiting for a pooled connection".to_string())
            }
            other => PoolError::Database(other.to_string()),
        }
    }
}

/// Error writing rows to the connection state table.
#[derive(Debug, Clone, Error)]
#[error("failed to persist connection state: {0}")]
pub struct StateStoreError(pub String);

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StateStoreError {
    fn from(err: sqlx::Error) -> Self {
        StateStoreError(err.to_string())
    }
}

/// Error saving the final connection state snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Schema operation applied to a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Clone,
    Delete,
    Drop,
    Comment,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Operation::Create => "create",
            Operation::Clone => "clone",
            Operation::Delete => "delete",
            Operation::Drop => "drop",
            Operation::Comment => "comment",
        };
        f.write_str(verb)
    }
}

/// Errors produced by a reconciliation pass.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("failed to compute connection updates: {0}")]
    Planning(String),

    #[error("connections scheduled for both update and delete: {}", .0.join(", "))]
    OverlappingPlan(Vec<String>),

    #[error("failed to {operation} connection '{name}': {source}")]
    Connection {
        name: String,
        operation: Operation,
        #[source]
        source: PoolError,
    },

    #[error("no exemplar schema recorded for plugin '{plugin}' to clone connection '{name}' from")]
    NoExemplar { name: String, plugin: String },

    #[error("clone worker failed: {0}")]
    Worker(String),

    #[error("database session error: {0}")]
    Session(#[source] PoolError),

    #[error("failed to set search path: {0}")]
    SearchPath(#[source] PoolError),

    #[error("reconciliation cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn connection(name: impl Into<String>, operation: Operation, source: PoolError) -> Self {
        SyncError::Connection {
            name: name.into(),
            operation,
            source,
        }
    }

    /// Name of the connection this error is attributed to, if any.
    pub fn connection_name(&self) -> Option<&str> {
        match self {
            SyncError::Connection { name, .. } | SyncError::NoExemplar { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Ordered collection of errors from one or more phases.
#[derive(Debug, Clone, Default)]
pub struct CombinedError {
    errors: Vec<SyncError>,
}

impl CombinedError {
    /// Combines `errors`, returning `None` when there are none.
    pub fn from_errors(errors: Vec<SyncError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &[SyncError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Appends every error of `other`, keeping order.
    pub fn extend(&mut self, other: CombinedError) {
        self.errors.extend(other.errors);
    }

    /// Distinct names of the connections that failed, in first-seen order.
    pub fn connection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.errors.iter().filter_map(SyncError::connection_name) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn is_cancelled(&self) -> bool {
        self.errors
            .iter()
            .any(|err| matches!(err, SyncError::Cancelled))
    }
}

impl From<SyncError> for CombinedError {
    fn from(err: SyncError) -> Self {
        Self { errors: vec![err] }
    }
}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors"),
            [single] => write!(f, "{single}"),
            errors => {
                write!(f, "{} errors occurred:", errors.len())?;
                for (idx, err) in errors.iter().enumerate() {
                    write!(f, "\n  {}. {err}", idx + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CombinedError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(name: &str, operation: Operation) -> SyncError {
        SyncError::connection(name, operation, PoolError::Database("boom".into()))
    }

    #[test]
    fn test_from_errors_empty_is_none() {
        assert!(CombinedError::from_errors(Vec::new()).is_none());
    }

    #[test]
    fn test_display_single_error() {
        let err = CombinedError::from(failed("aws", Operation::Create));
        assert_eq!(
            err.to_string(),
            "failed to create connection 'aws': database error: boom"
        );
    }

    #[test]
    fn test_display_multiple_errors() {
        let err = CombinedError::from_errors(vec![
            failed("aws", Operation::Clone),
            SyncError::Cancelled,
        ])
        .expect("two errors");
        assert_eq!(
            err.to_string(),
            "2 errors occurred:\n  1. failed to clone connection 'aws': database error: boom\n  2. reconciliation cancelled"
        );
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_connection_names_are_distinct() {
        let err = CombinedError::from_errors(vec![
            failed("b", Operation::Create),
            SyncError::Planning("x".into()),
            failed("a", Operation::Delete),
            failed("b", Operation::Comment),
        ])
        .expect("errors");
        assert_eq!(err.connection_names(), vec!["b", "a"]);
    }

    #[test]
    fn test_overlapping_plan_display() {
        let err = SyncError::OverlappingPlan(vec!["a".into(), "b".into()]);
        assert_eq!(
            err.to_string(),
            "connections scheduled for both update and delete: a, b"
        );
    }
}
