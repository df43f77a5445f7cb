//! Single-line progress display on stderr.

use is_terminal::IsTerminal;
use schemasync_core::StatusSink;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Renders status messages in place on an interactive stderr.
///
/// Disabled when quiet or when stderr is not a terminal; status messages
/// still reach the log through `tracing` in that case.
pub struct StderrStatus {
    enabled: bool,
    rendered: AtomicBool,
}

impl StderrStatus {
    pub fn new(quiet: bool) -> Self {
        Self {
            enabled: !quiet && io::stderr().is_terminal(),
            rendered: AtomicBool::new(false),
        }
    }

    /// Ends the progress line so later output starts on a fresh line.
    pub fn finish(&self) {
        if self.enabled && self.rendered.swap(false, Ordering::SeqCst) {
            eprintln!();
        }
    }
}

impl StatusSink for StderrStatus {
    fn set_status(&self, message: &str) {
        tracing::debug!(target: "schemasync::status", "{message}");
        if !self.enabled {
            return;
        }
        self.rendered.store(true, Ordering::SeqCst);
        // \x1b[2K clears whatever the previous message left behind.
        eprint!("\r\x1b[2K{message}");
        let _ = io::stderr().flush();
    }
}
