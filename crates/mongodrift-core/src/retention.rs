//! Count-based retention of snapshot versions.

use serde::Serialize;

use crate::error::ErrorCode;
use crate::store::{DeleteFailure, StoreError, VersionStore};

/// How many of the most recent versions to keep per name.
///
/// `keep_count = 0` is accepted but behaves like 1: the newest version is
/// never removed by retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    pub keep_count: u64,
}

impl RetentionPolicy {
    #[must_use]
    pub const fn keep_last(keep_count: u64) -> Self {
        Self { keep_count }
    }

    /// Keep count actually enforced.
    #[must_use]
    pub const fn effective_keep(self) -> u64 {
        if self.keep_count == 0 { 1 } else { self.keep_count }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::keep_last(100)
    }
}

/// What a retention pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionOutcome {
    /// Sequences still present after the pass.
    pub kept: Vec<u64>,
    /// Sequences removed by this pass.
    pub deleted: Vec<u64>,
    /// Sequences that should have been removed but were not.
    pub failed: Vec<u64>,
}

/// Non-fatal retention failure.
#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    /// Listing or locking the namespace failed; nothing was deleted.
    #[error("retention skipped for {name:?}: {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },

    /// Some old versions could not be removed.
    #[error("retention could not delete {} version(s) of {name:?}: {}", .failures.len(), describe(.failures))]
    Incomplete {
        name: String,
        failures: Vec<DeleteFailure>,
        outcome: RetentionOutcome,
    },
}

impl RetentionError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::RetentionIncomplete
    }
}

fn describe(failures: &[DeleteFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("#{} ({})", f.sequence, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drop the oldest versions of `name` beyond the policy's keep count.
///
/// Deletion goes through [`VersionStore::delete_before`], oldest first. One
/// record failing to delete does not stop the others.
///
/// # Errors
///
/// Returns [`RetentionError`] when the pass could not run or left records
/// behind. Callers treat it as a warning.
pub fn enforce(
    store: &VersionStore,
    name: &str,
    policy: RetentionPolicy,
) -> Result<RetentionOutcome, RetentionError> {
    let store_err = |source: StoreError| RetentionError::Store {
        name: name.to_string(),
        source,
    };

    let sequences = store.sequences(name).map_err(store_err)?;
    let keep = usize::try_from(policy.effective_keep()).unwrap_or(usize::MAX);
    if sequences.len() <= keep {
        tracing::debug!(name, versions = sequences.len(), keep, "retention: nothing to trim");
        return Ok(RetentionOutcome {
            kept: sequences,
            ..RetentionOutcome::default()
        });
    }

    let cutoff = sequences[sequences.len() - keep];
    let deleted = store.delete_before(name, cutoff).map_err(store_err)?;

    let kept = store.sequences(name).map_err(store_err)?;
    let outcome = RetentionOutcome {
        kept,
        deleted: deleted.deleted,
        failed: deleted.failed.iter().map(|f| f.sequence).collect(),
    };

    tracing::info!(
        name,
        deleted = outcome.deleted.len(),
        failed = outcome.failed.len(),
        kept = outcome.kept.len(),
        "retention pass complete"
    );

    if deleted.failed.is_empty() {
        Ok(outcome)
    } else {
        Err(RetentionError::Incomplete {
            name: name.to_string(),
            failures: deleted.failed,
            outcome,
        })
    }
}
