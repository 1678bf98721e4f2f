//! Mock Hardware Implementations
//!
//! In-memory stand-ins for the clock and capture hardware, used by the
//! test suite and by simulation setups without real silicon.
//!
//! # Available Mocks
//!
//! - [`MockClockSource`] - pulse clock with 1 ns quantization
//! - [`MockCapturePipeline`] - capture stream that tracks its consumer
//! - [`MockHal`] - board support handing both out, with failure injection
//!
//! Every hardware-visible call is appended to a shared [`EventLog`] so
//! tests can assert exact acquisition and release ordering.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{CapturePipeline, ClockSource, HalError, HalResult, ProviderHal};
use crate::platform::{Device, DeviceId};

// =============================================================================
// EventLog - Shared Call Recorder
// =============================================================================

/// Shared, ordered record of hardware-visible events.
///
/// Clones append to the same underlying log.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event.
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Snapshot of all events in record order.
    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `event` exactly.
    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

// =============================================================================
// MockClockSource - Simulated Pulse Clock
// =============================================================================

#[derive(Default)]
struct ClockState {
    width_ns: u64,
    period_ns: u64,
    enabled: bool,
    configure_calls: u32,
}

/// Simulated pulse clock.
///
/// Periods are stored as whole nanoseconds, so the quantization step is
/// exactly 1 ns. A pending failure can be armed for the next `configure`
/// or `enable` call to exercise unwind paths.
pub struct MockClockSource {
    log: EventLog,
    state: Mutex<ClockState>,
    fail_configure: Mutex<Option<HalError>>,
    fail_enable: Mutex<Option<HalError>>,
    fail_disable: Mutex<Option<HalError>>,
}

impl MockClockSource {
    /// Creates an idle, unconfigured clock recording into `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            state: Mutex::new(ClockState::default()),
            fail_configure: Mutex::new(None),
            fail_enable: Mutex::new(None),
            fail_disable: Mutex::new(None),
        }
    }

    /// Arms a failure for the next `configure` call.
    pub fn fail_next_configure(&self, err: HalError) {
        *self.fail_configure.lock() = Some(err);
    }

    /// Arms a failure for the next `enable` call.
    pub fn fail_next_enable(&self, err: HalError) {
        *self.fail_enable.lock() = Some(err);
    }

    /// Arms a failure for the next `disable` call.
    pub fn fail_next_disable(&self, err: HalError) {
        *self.fail_disable.lock() = Some(err);
    }

    /// Overwrites the realized period behind the driver's back.
    ///
    /// Models an out-of-band reconfiguration; used to prove that rate
    /// reads go to hardware instead of a cache.
    pub fn force_period(&self, period: Duration) {
        self.state.lock().period_ns = period.as_nanos() as u64;
    }

    /// Number of successful `configure` calls so far.
    pub fn configure_calls(&self) -> u32 {
        self.state.lock().configure_calls
    }

    /// Pulse width currently programmed, in nanoseconds.
    pub fn width_ns(&self) -> u64 {
        self.state.lock().width_ns
    }
}

impl ClockSource for MockClockSource {
    fn configure(&self, width: Duration, period: Duration) -> HalResult<()> {
        if let Some(err) = self.fail_configure.lock().take() {
            return Err(err);
        }
        let width_ns = width.as_nanos() as u64;
        let period_ns = period.as_nanos() as u64;
        if width_ns == 0 || width_ns >= period_ns {
            return Err(HalError::InfeasibleTiming { width_ns, period_ns });
        }
        let mut state = self.state.lock();
        state.width_ns = width_ns;
        state.period_ns = period_ns;
        state.configure_calls += 1;
        self.log
            .record(format!("clock.configure {width_ns}ns/{period_ns}ns"));
        Ok(())
    }

    fn enable(&self) -> HalResult<()> {
        if let Some(err) = self.fail_enable.lock().take() {
            return Err(err);
        }
        self.state.lock().enabled = true;
        self.log.record("clock.enable");
        Ok(())
    }

    fn disable(&self) -> HalResult<()> {
        if let Some(err) = self.fail_disable.lock().take() {
            return Err(err);
        }
        self.state.lock().enabled = false;
        self.log.record("clock.disable");
        Ok(())
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(self.state.lock().period_ns)
    }

    fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }
}

// =============================================================================
// MockCapturePipeline - Simulated Capture Stream
// =============================================================================

/// Simulated capture stream.
///
/// Tracks the consumer device it is bound to and vetoes a second bind
/// while one is live.
pub struct MockCapturePipeline {
    channel: String,
    log: EventLog,
    bound: Mutex<Option<DeviceId>>,
}

impl MockCapturePipeline {
    /// Creates an unbound pipeline on `channel`, recording into `log`.
    pub fn new(channel: impl Into<String>, log: EventLog) -> Self {
        Self {
            channel: channel.into(),
            log,
            bound: Mutex::new(None),
        }
    }

    /// Consumer device currently bound, if any.
    pub fn bound_to(&self) -> Option<DeviceId> {
        *self.bound.lock()
    }
}

impl CapturePipeline for MockCapturePipeline {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn bind(&self, device: DeviceId) -> HalResult<()> {
        let mut bound = self.bound.lock();
        if let Some(existing) = *bound {
            return Err(HalError::Fault(format!(
                "pipeline already bound to {existing}"
            )));
        }
        *bound = Some(device);
        self.log.record(format!("pipeline.bind {device}"));
        Ok(())
    }

    fn unbind(&self, device: DeviceId) {
        let mut bound = self.bound.lock();
        if *bound == Some(device) {
            *bound = None;
            self.log.record(format!("pipeline.unbind {device}"));
        }
    }
}

// =============================================================================
// MockHal - Simulated Board Support
// =============================================================================

/// Simulated board support.
///
/// Hands out one shared clock and a fresh pipeline per allocation. Each
/// acquisition step can be armed to fail once, which is how the teardown
/// tests truncate provider setup at a chosen point.
pub struct MockHal {
    log: EventLog,
    clock: Arc<MockClockSource>,
    channels: Vec<String>,
    pipelines: Mutex<Vec<Arc<MockCapturePipeline>>>,
    fail_claim_clock: Mutex<Option<HalError>>,
    fail_allocate: Mutex<Option<HalError>>,
}

impl MockHal {
    /// Board with a single "rx" capture channel.
    pub fn new() -> Self {
        Self::with_channels(&["rx"])
    }

    /// Board exposing the given capture channels.
    pub fn with_channels(channels: &[&str]) -> Self {
        let log = EventLog::new();
        Self {
            clock: Arc::new(MockClockSource::new(log.clone())),
            channels: channels.iter().map(|c| (*c).to_string()).collect(),
            pipelines: Mutex::new(Vec::new()),
            fail_claim_clock: Mutex::new(None),
            fail_allocate: Mutex::new(None),
            log,
        }
    }

    /// Handle to the shared event log.
    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    /// Direct handle to the board's clock.
    pub fn clock(&self) -> Arc<MockClockSource> {
        self.clock.clone()
    }

    /// Pipelines allocated so far, oldest first.
    pub fn pipelines(&self) -> Vec<Arc<MockCapturePipeline>> {
        self.pipelines.lock().clone()
    }

    /// Arms a failure for the next `claim_clock` call.
    pub fn fail_next_claim_clock(&self, err: HalError) {
        *self.fail_claim_clock.lock() = Some(err);
    }

    /// Arms a failure for the next `allocate_pipeline` call.
    pub fn fail_next_allocate(&self, err: HalError) {
        *self.fail_allocate.lock() = Some(err);
    }
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderHal for MockHal {
    fn claim_clock(&self, dev: &Device) -> HalResult<Arc<dyn ClockSource>> {
        if let Some(err) = self.fail_claim_clock.lock().take() {
            return Err(err);
        }
        self.log.record(format!("hal.claim_clock {}", dev.name()));
        Ok(self.clock.clone())
    }

    fn release_clock(&self, _clock: Arc<dyn ClockSource>) {
        self.log.record("hal.release_clock");
    }

    fn allocate_pipeline(
        &self,
        dev: &Device,
        channel: &str,
    ) -> HalResult<Arc<dyn CapturePipeline>> {
        if let Some(err) = self.fail_allocate.lock().take() {
            return Err(err);
        }
        if !self.channels.iter().any(|c| c == channel) {
            return Err(HalError::UnknownChannel(channel.to_string()));
        }
        let pipeline = Arc::new(MockCapturePipeline::new(channel, self.log.clone()));
        self.pipelines.lock().push(pipeline.clone());
        self.log
            .record(format!("hal.allocate_pipeline {} {channel}", dev.name()));
        Ok(pipeline)
    }

    fn release_pipeline(&self, _pipeline: Arc<dyn CapturePipeline>) {
        self.log.record("hal.release_pipeline");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
