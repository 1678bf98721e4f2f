//! Error types for the offload trigger driver.
//!
//! Everything fallible in this crate reports a [`TriggerError`]. The
//! variants mirror the outcomes a platform probe loop has to tell apart:
//! permanent caller mistakes, retryable "not ready yet" conditions, and
//! faults reported by the underlying hardware.

use thiserror::Error;

use crate::hal::HalError;
use crate::trigger::TriggerKind;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TriggerError>;

/// Unified error type for trigger discovery, binding, and rate control.
#[derive(Error, Debug)]
pub enum TriggerError {
    /// The request can never succeed as written: a zero sample rate, a
    /// dangling description-graph reference, a duplicate trigger name, a
    /// second attach on an already-bound device.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required provider resource is not ready yet. Expected during
    /// staged bring-up; the platform re-invokes setup later.
    #[error("setup deferred: {0}")]
    Deferred(&'static str),

    /// The resolved trigger is of a different kind than this driver
    /// manages. Permanent; retrying cannot fix a wiring mistake.
    #[error("trigger kind mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        /// Kind this driver binds to.
        expected: TriggerKind,
        /// Kind actually found on the resolved trigger.
        found: TriggerKind,
    },

    /// The clock or capture hardware rejected a request.
    #[error("hardware rejected request: {0}")]
    Hardware(#[from] HalError),

    /// A fixed-size table or allocation was exhausted.
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),
}

impl TriggerError {
    /// True for outcomes the platform should retry later rather than
    /// report as failures.
    pub fn is_deferred(&self) -> bool {
        matches!(self, TriggerError::Deferred(_))
    }
}
