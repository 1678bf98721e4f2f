//! Sample-rate math for the pulse clock.
//!
//! Rates are requested in Hz and realized as whole-nanosecond periods.
//! Setting rounds the period up so the realized rate never exceeds the
//! request; reading rounds the reciprocal to the nearest whole Hz. Both
//! directions are exact integer arithmetic, no floats.

use std::time::Duration;

use crate::error::{Result, TriggerError};
use crate::hal::ClockSource;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Pulse width driven onto the trigger line, in nanoseconds.
///
/// Some capture engines sample the line as a level rather than an edge,
/// so the pulse has to stay high for a measurable window. The width is
/// not configurable; it only has to be non-zero and shorter than the
/// period, and the clock rejects any period it does not fit into.
pub const TRIGGER_PULSE_NS: u64 = 10;

/// Requests a new sampling rate on `clock`.
///
/// The period is rounded up to the next whole nanosecond, so the realized
/// rate is never above the request. A rate of 0 Hz is rejected before the
/// hardware is touched. A rate so high that the pulse no longer fits in
/// the period is rejected by the clock itself and surfaces as
/// [`TriggerError::Hardware`]; it is never clamped.
pub fn set_sampling_frequency(clock: &dyn ClockSource, hz: u32) -> Result<()> {
    if hz == 0 {
        return Err(TriggerError::InvalidArgument(
            "sampling frequency must be non-zero".to_string(),
        ));
    }
    let period_ns = div_round_up(NANOS_PER_SEC, u64::from(hz));
    clock.configure(
        Duration::from_nanos(TRIGGER_PULSE_NS),
        Duration::from_nanos(period_ns),
    )?;
    Ok(())
}

/// Reads the rate the clock actually realizes, in Hz.
///
/// Recomputed from the hardware period on every call, nothing is cached.
/// An unconfigured clock reads as 0 Hz.
pub fn sampling_frequency(clock: &dyn ClockSource) -> u32 {
    let period_ns = clock.period().as_nanos() as u64;
    if period_ns == 0 {
        return 0;
    }
    div_round_closest(NANOS_PER_SEC, period_ns) as u32
}

/// Integer division rounding the quotient up.
fn div_round_up(dividend: u64, divisor: u64) -> u64 {
    (dividend + divisor - 1) / divisor
}

/// Integer division rounding the quotient to nearest.
fn div_round_closest(dividend: u64, divisor: u64) -> u64 {
    (dividend + divisor / 2) / divisor
}
