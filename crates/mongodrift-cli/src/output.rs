//! Diagnostics written to stderr when a run fails.

use std::io::{self, Write};

use serde::Serialize;

use mongodrift_core::ErrorCode;
use mongodrift_core::orchestrator::RunError;

/// A fatal error ready to print.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Stable `E####` code.
    pub error_code: &'static str,
    /// Fixed one-line description of the code.
    pub summary: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
}

impl CliError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: code.code(),
            summary: code.message(),
            message: message.into(),
            suggestion: code.hint(),
        }
    }

    /// Configuration problems surface before any run starts.
    pub fn config(err: &anyhow::Error) -> Self {
        Self::new(ErrorCode::ConfigInvalid, format!("{err:#}"))
    }
}

impl From<&RunError> for CliError {
    fn from(err: &RunError) -> Self {
        let code = err.code();
        Self {
            error_code: code.code(),
            summary: code.message(),
            message: err.to_string(),
            suggestion: err.hint(),
        }
    }
}

/// Render an error to `out`, as JSON when `json` is set.
pub fn render_error(out: &mut dyn Write, json: bool, error: &CliError) -> io::Result<()> {
    if json {
        let wrapper = serde_json::json!({ "error": error });
        serde_json::to_writer_pretty(&mut *out, &wrapper)?;
        writeln!(out)?;
    } else {
        writeln!(out, "error[{}]: {}", error.error_code, error.summary)?;
        writeln!(out, "  cause: {}", error.message)?;
        if let Some(suggestion) = error.suggestion {
            writeln!(out, "  hint: {suggestion}")?;
        }
    }
    Ok(())
}
