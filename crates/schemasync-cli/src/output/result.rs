//! Human-readable and JSON rendering of a reconciliation result.

use owo_colors::OwoColorize;
use schemasync_core::RefreshConnectionResult;
use std::fmt::Write;

/// Format warnings and the error of `result` for stderr.
///
/// Warnings are included even when the pass succeeded. Returns an empty
/// string for a clean result.
pub fn format_result(result: &RefreshConnectionResult, colored: bool) -> String {
    let mut out = String::new();

    for warning in &result.warnings {
        let label = if colored {
            "warning:".yellow().bold().to_string()
        } else {
            "warning:".to_string()
        };
        let _ = writeln!(out, "{label} {warning}");
    }

    if let Some(err) = &result.error {
        let label = if colored {
            "error:".red().bold().to_string()
        } else {
            "error:".to_string()
        };
        let _ = writeln!(out, "{label} {err}");

        let names = err.connection_names();
        if !names.is_empty() {
            let _ = writeln!(out, "failed connections: {}", names.join(", "));
        }
    }

    out
}

/// Format the result as JSON, with the error rendered as its message.
pub fn format_result_json(
    result: &RefreshConnectionResult,
    compact: bool,
) -> serde_json::Result<String> {
    if compact {
        serde_json::to_string(result)
    } else {
        serde_json::to_string_pretty(result)
    }
}
