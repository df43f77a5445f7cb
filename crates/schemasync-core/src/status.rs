//! Human-readable progress reporting.

use tracing::info;

/// Receives progress messages such as `Creating 3 connections`.
///
/// Purely observational: nothing in the engine depends on what a sink does.
pub trait StatusSink: Send + Sync {
    fn set_status(&self, message: &str);
}

/// Reports progress through `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn set_status(&self, message: &str) {
        info!(target: "schemasync::status", "{message}");
    }
}

/// `word` or its plural form for `count`.
pub(crate) fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        return word.to_string();
    }
    match word {
        "is" => "are".to_string(),
        "query" => "queries".to_string(),
        _ => format!("{word}s"),
    }
}
