//! mongodrift-core library.
//!
//! Versioned snapshot storage, line diffing, retention, and the run state
//! machine that ties them to an [`InventorySampler`].
//!
//! # Conventions
//!
//! - **Errors**: domain errors are `thiserror` enums carrying an
//!   [`ErrorCode`]; configuration loading uses `anyhow::Result`.
//! - **Logging**: use `tracing` macros with structured fields
//!   (`name`, `sequence`, `code`).

pub mod config;
pub mod diff;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod report;
pub mod retention;
pub mod sampler;
pub mod store;

pub use config::{ConfigOverrides, DriftConfig, ReportFormat, resolve_config};
pub use diff::{DiffLine, DiffResult, Hunk, LineTag, diff};
pub use error::ErrorCode;
pub use orchestrator::{Orchestrator, RunError, RunOutcome, RunState};
pub use report::DriftReport;
pub use retention::{RetentionError, RetentionOutcome, RetentionPolicy};
pub use sampler::{InventorySampler, SampleError};
pub use store::{StoreError, VersionRecord, VersionStore};
