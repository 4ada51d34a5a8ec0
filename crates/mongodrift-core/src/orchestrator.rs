//! One drift-detection run: sample, compare, report, persist, retain.
//!
//! ```text
//! Idle -> Sampling -> Comparing -> Reporting -> Persisting -> Retaining -> Done
//!            |            |            |             |
//!            +------------+------------+-------------+---> Failed
//! ```
//!
//! Report-only runs (`no_diff`) go `Sampling -> Reporting -> Done` and never
//! open the data directory. A retention failure is logged and the run still
//! reaches `Done`.

use std::fmt;
use std::io::{self, Write};

use chrono::{SubsecRound, Utc};
use serde::Serialize;

use crate::config::{DriftConfig, ReportFormat};
use crate::diff;
use crate::error::ErrorCode;
use crate::report::DriftReport;
use crate::retention::{self, RetentionOutcome};
use crate::sampler::{InventorySampler, SampleError};
use crate::store::{StoreError, VersionRecord, VersionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Sampling,
    Comparing,
    Reporting,
    Persisting,
    Retaining,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Sampling => "sampling",
            Self::Comparing => "comparing",
            Self::Reporting => "reporting",
            Self::Persisting => "persisting",
            Self::Retaining => "retaining",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Fatal run failure.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("sampling failed: {0}")]
    Sampling(#[from] SampleError),

    #[error("{0}")]
    Storage(#[from] StoreError),

    #[error("could not write report: {0}")]
    Output(#[source] io::Error),
}

impl RunError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Sampling(e) => e.code(),
            Self::Storage(e) => e.code(),
            Self::Output(_) => ErrorCode::InternalUnexpected,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: RunState,
    /// `None` in report-only mode.
    pub report: Option<DriftReport>,
    pub saved: Option<VersionRecord>,
    pub retention: Option<RetentionOutcome>,
    /// Set when retention could not finish; the run still succeeded.
    pub retention_warning: Option<String>,
}

/// Drives one run against an injected sampler and the configured store.
pub struct Orchestrator<'a, S> {
    config: &'a DriftConfig,
    sampler: S,
    state: RunState,
}

impl<'a, S: InventorySampler> Orchestrator<'a, S> {
    #[must_use]
    pub const fn new(config: &'a DriftConfig, sampler: S) -> Self {
        Self {
            config,
            sampler,
            state: RunState::Idle,
        }
    }

    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(name = %self.config.name, from = %self.state, to = %next, "run state");
        self.state = next;
    }

    fn fail(&mut self, err: impl Into<RunError>) -> RunError {
        let err = err.into();
        tracing::error!(
            name = %self.config.name,
            state = %self.state,
            code = err.code().code(),
            error = %err,
            "run failed"
        );
        self.state = RunState::Failed;
        err
    }

    /// Execute the run, writing the report (or raw inventory) to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] on sampling, storage, or output failure. The
    /// state is `Failed` afterwards. Anything already written to `out`
    /// stays written.
    pub fn run(&mut self, out: &mut dyn Write) -> Result<RunOutcome, RunError> {
        let config = self.config;

        self.transition(RunState::Sampling);
        let content = match self.sampler.sample(config.sample_timeout()) {
            Ok(content) => content,
            Err(e) => return Err(self.fail(e)),
        };
        let captured_at = Utc::now().trunc_subsecs(6);
        tracing::info!(
            name = %config.name,
            bytes = content.len(),
            lines = content.lines().count(),
            "inventory sampled"
        );

        if config.no_diff {
            self.transition(RunState::Reporting);
            if let Err(e) = out.write_all(content.as_bytes()).and_then(|()| out.flush()) {
                return Err(self.fail(RunError::Output(e)));
            }
            self.transition(RunState::Done);
            return Ok(RunOutcome {
                state: self.state,
                report: None,
                saved: None,
                retention: None,
                retention_warning: None,
            });
        }

        self.transition(RunState::Comparing);
        let store = match VersionStore::open(&config.data_dir) {
            Ok(store) => store.with_lock_timeout(config.lock_timeout()),
            Err(e) => return Err(self.fail(e)),
        };
        let previous = match store.latest(&config.name) {
            Ok(previous) => previous,
            Err(e) => return Err(self.fail(e)),
        };
        let result = diff::diff(
            previous.as_ref().map(|rec| rec.content.as_str()),
            &content,
            config.context_lines,
        );
        let report = DriftReport::new(&config.name, previous.as_ref(), captured_at, result);
        tracing::info!(
            name = %config.name,
            previous = previous.as_ref().map(|rec| rec.sequence),
            hunks = report.diff.hunks.len(),
            added = report.added,
            removed = report.removed,
            "compared against latest version"
        );

        self.transition(RunState::Reporting);
        let written = match config.format {
            ReportFormat::Text => report.write_text(out),
            ReportFormat::Json => report.write_json(out),
        }
        .and_then(|()| out.flush());
        if let Err(e) = written {
            return Err(self.fail(RunError::Output(e)));
        }

        self.transition(RunState::Persisting);
        let saved = match store.save(&config.name, &content) {
            Ok(saved) => saved,
            Err(e) => return Err(self.fail(e)),
        };
        tracing::info!(name = %config.name, sequence = saved.sequence, "snapshot persisted");

        self.transition(RunState::Retaining);
        let (retention, retention_warning) =
            match retention::enforce(&store, &config.name, config.retention()) {
                Ok(outcome) => (Some(outcome), None),
                Err(e) => {
                    tracing::warn!(
                        name = %config.name,
                        code = e.code().code(),
                        error = %e,
                        "retention incomplete, continuing"
                    );
                    let outcome = match &e {
                        retention::RetentionError::Incomplete { outcome, .. } => {
                            Some(outcome.clone())
                        }
                        retention::RetentionError::Store { .. } => None,
                    };
                    (outcome, Some(e.to_string()))
                }
            };

        self.transition(RunState::Done);
        Ok(RunOutcome {
            state: self.state,
            report: Some(report),
            saved: Some(saved),
            retention,
            retention_warning,
        })
    }
}
