//! Seam between the core and whatever captures the inventory text.

use std::time::Duration;

use crate::error::ErrorCode;

/// Failure while capturing an inventory. Always fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("could not connect: {0}")]
    Connect(String),

    #[error("command {command} failed: {message}")]
    Command { command: String, message: String },

    #[error("could not decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("sampling timed out after {0:?}")]
    Timeout(Duration),

    #[error("sampler runtime error: {0}")]
    Runtime(String),
}

impl SampleError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::SamplingFailed
    }
}

/// Produces one deterministic, line-oriented text block per call.
///
/// Implementations must emit the same bytes for the same underlying state:
/// every section sorted, one record per line.
pub trait InventorySampler {
    /// Capture the current inventory, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError`] on connection or command failure, or when
    /// `timeout` elapses first.
    fn sample(&self, timeout: Duration) -> Result<String, SampleError>;
}

impl<S: InventorySampler + ?Sized> InventorySampler for &S {
    fn sample(&self, timeout: Duration) -> Result<String, SampleError> {
        (**self).sample(timeout)
    }
}

impl<S: InventorySampler + ?Sized> InventorySampler for Box<S> {
    fn sample(&self, timeout: Duration) -> Result<String, SampleError> {
        (**self).sample(timeout)
    }
}
