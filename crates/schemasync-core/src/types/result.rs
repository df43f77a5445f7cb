use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::{CombinedError, SyncError};

/// Outcome of a reconciliation pass, or of one of its phases.
///
/// Partial results are combined with [`RefreshConnectionResult::merge`], which
/// only ever appends: warnings accumulate, errors are combined, and
/// `updated_connections` stays set once any phase sets it.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshConnectionResult {
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<CombinedError>,
    pub warnings: Vec<String>,
    pub updated_connections: bool,
}

fn serialize_error<S: Serializer>(
    error: &Option<CombinedError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

impl RefreshConnectionResult {
    pub fn from_error(err: impl Into<CombinedError>) -> Self {
        Self {
            error: Some(err.into()),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Records `err` alongside any error already present.
    pub fn add_error(&mut self, err: SyncError) {
        self.add_combined(CombinedError::from(err));
    }

    /// Records every error in `errors`; a no-op for an empty list.
    pub fn add_errors(&mut self, errors: Vec<SyncError>) {
        if let Some(combined) = CombinedError::from_errors(errors) {
            self.add_combined(combined);
        }
    }

    fn add_combined(&mut self, combined: CombinedError) {
        match &mut self.error {
            Some(existing) => existing.extend(combined),
            None => self.error = Some(combined),
        }
    }

    /// Appends `other` to this result.
    pub fn merge(&mut self, other: RefreshConnectionResult) {
        if let Some(err) = other.error {
            self.add_combined(err);
        }
        self.warnings.extend(other.warnings);
        self.updated_connections |= other.updated_connections;
    }
}

impl fmt::Display for RefreshConnectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "updated connections: {}", self.updated_connections)?;
        if let Some(err) = &self.error {
            writeln!(f, "error: {err}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}
