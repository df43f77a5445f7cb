//! Output formatting modules.

pub mod progress;
pub mod result;

pub use progress::StderrStatus;
pub use result::{format_result, format_result_json};
