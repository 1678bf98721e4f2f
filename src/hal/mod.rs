//! Hardware abstraction for the pulse clock and the capture stream.
//!
//! The driver core never touches registers itself; it drives these traits.
//! Real deployments implement them against a PWM controller and a DMA
//! engine; the [`mock`] module provides in-memory stand-ins for tests and
//! simulation.
//!
//! All methods are register-level and non-suspending. Implementations
//! handle their own interior synchronization so handles can be shared
//! behind an `Arc`.

pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::platform::{Device, DeviceId};

/// Result alias for HAL calls.
pub type HalResult<T> = std::result::Result<T, HalError>;

/// Faults reported by clock or capture hardware.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// The requested pulse timing cannot be produced by the clock.
    #[error("infeasible pulse timing: width {width_ns} ns within period {period_ns} ns")]
    InfeasibleTiming {
        /// Requested pulse width in nanoseconds.
        width_ns: u64,
        /// Requested period in nanoseconds.
        period_ns: u64,
    },

    /// No capture stream with the requested name exists on the device.
    #[error("unknown capture channel {0:?}")]
    UnknownChannel(String),

    /// The hardware reported a fault while executing the request.
    #[error("hardware fault: {0}")]
    Fault(String),
}

/// Pulse-train generator that paces sample acquisition.
pub trait ClockSource: Send + Sync {
    /// Atomically applies a new pulse width and period.
    ///
    /// Must reject a zero width and any width that does not fit inside the
    /// period. The driver core never clamps on the caller's behalf; an
    /// infeasible request comes back as [`HalError::InfeasibleTiming`].
    fn configure(&self, width: Duration, period: Duration) -> HalResult<()>;

    /// Starts the pulse output.
    fn enable(&self) -> HalResult<()>;

    /// Stops the pulse output. Idempotent.
    fn disable(&self) -> HalResult<()>;

    /// Realized (hardware-quantized) period.
    ///
    /// Reads `Duration::ZERO` before the first successful
    /// [`configure`](Self::configure).
    fn period(&self) -> Duration;

    /// Whether the output is currently running.
    fn is_enabled(&self) -> bool;
}

/// Hardware-filled capture stream a trigger paces samples into.
pub trait CapturePipeline: Send + Sync {
    /// Name of the stream this pipeline was allocated on.
    fn channel(&self) -> &str;

    /// Attaches the stream to a consumer device.
    ///
    /// Implementations may veto a second attachment while one is live.
    fn bind(&self, device: DeviceId) -> HalResult<()>;

    /// Detaches the stream from a consumer device. Idempotent.
    fn unbind(&self, device: DeviceId);
}

/// Board-support surface a provider device probes against.
pub trait ProviderHal: Send + Sync {
    /// Claims the pulse clock wired to `dev`.
    fn claim_clock(&self, dev: &Device) -> HalResult<Arc<dyn ClockSource>>;

    /// Returns a clock claimed earlier.
    ///
    /// The driver guarantees the output is disabled before release.
    fn release_clock(&self, clock: Arc<dyn ClockSource>);

    /// Allocates the capture stream named `channel` on `dev`.
    fn allocate_pipeline(&self, dev: &Device, channel: &str)
        -> HalResult<Arc<dyn CapturePipeline>>;

    /// Returns a pipeline allocated earlier.
    fn release_pipeline(&self, pipeline: Arc<dyn CapturePipeline>);
}
