//! Integration tests for the schemasync CLI with a real database.
//!
//! These tests are behind the `integration-tests` feature flag and won't run
//! with regular `cargo test`. They also need `TEST_POSTGRES_URL` to point at a
//! database where the current user may create schemas, roles and tables.

#![cfg(feature = "integration-tests")]

mod postgres;

use std::process::{Command, Output};

/// Run the schemasync CLI with the given arguments and return the output.
pub fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_schemasync"))
        .args(args)
        .output()
        .expect("failed to execute schemasync CLI")
}

/// Run the schemasync CLI and assert it succeeds.
pub fn run_cli_success(args: &[&str]) -> Output {
    let output = run_cli(args);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        panic!(
            "CLI failed with status {:?}\nstderr: {}\nstdout: {}",
            output.status.code(),
            stderr,
            stdout
        );
    }
    output
}
