//! PWM-paced hardware trigger and offload capture binding.
//!
//! A sampling engine can run conversions without the host in the loop: a
//! PWM pacing clock fires the engine, results land in a DMA capture
//! pipeline, and the host only sets the rate and wires consumers up.
//! This crate is the provider/consumer plumbing for that arrangement:
//!
//! - [`lifecycle`] probes an engine device, claims its pacing clock and
//!   capture pipeline, and publishes a trigger for discovery
//! - [`discovery`] resolves a consumer's `offloads` description
//!   reference to the registered trigger
//! - [`binding`] attaches a capture device to the trigger, flipping it
//!   into hardware-paced acquisition
//! - [`frequency`] converts between sampling rates and pacing-clock
//!   timing
//! - [`params`] exposes `sampling_frequency` as a type-erased control
//!   parameter
//! - [`platform`] and [`hal`] are the device model and the hardware seam
//!   the rest of the crate is written against
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use daq_trigger_pwm::hal::mock::MockHal;
//! use daq_trigger_pwm::{
//!     attach_offload_trigger, resolve_offload_trigger, CaptureDevice, CaptureMode, Node,
//!     OffloadTriggerProvider, Platform, ProviderConfig, ProviderHal, TriggerRegistry,
//! };
//!
//! # fn main() -> daq_trigger_pwm::Result<()> {
//! let platform = Platform::new();
//! let registry = Arc::new(TriggerRegistry::new());
//! let hal: Arc<dyn ProviderHal> = Arc::new(MockHal::new());
//!
//! // Provider side: bring the engine's trigger into service.
//! let engine_node = platform.add_node(Node::new("engine0"));
//! let engine = platform.create_device(engine_node)?;
//! let provider =
//!     OffloadTriggerProvider::probe(&engine, &hal, &registry, &ProviderConfig::default())?;
//! assert_eq!(provider.trigger().name(), "engine0-pwm-trigger");
//!
//! // Consumer side: resolve the description reference and bind to it.
//! let adc_node = platform.add_node(Node::new("adc0").with_reference("offloads", engine_node));
//! let adc = platform.create_device(adc_node)?;
//! let trigger = resolve_offload_trigger(&platform, &registry, &adc)?
//!     .expect("provider registered above");
//!
//! let capture = CaptureDevice::new(adc);
//! attach_offload_trigger(&capture, &trigger)?;
//! assert!(capture.mode().contains(CaptureMode::HARDWARE_TRIGGERED));
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod discovery;
pub mod error;
pub mod frequency;
pub mod hal;
pub mod lifecycle;
pub mod params;
pub mod platform;
pub mod registration;
pub mod trigger;

pub use binding::{
    attach_offload_trigger, request_trigger_change, BindingStatus, CaptureDevice, CaptureMode,
};
pub use discovery::{resolve_offload_trigger, OFFLOAD_PROPERTY};
pub use error::{Result, TriggerError};
pub use hal::{CapturePipeline, ClockSource, HalError, HalResult, ProviderHal};
pub use lifecycle::{
    OffloadTriggerProvider, ProviderConfig, ProviderState, DEFAULT_CHANNEL,
    DEFAULT_SAMPLING_FREQUENCY_HZ,
};
pub use params::{trigger_params, TriggerParam};
pub use platform::{Device, DeviceId, Node, NodeId, Platform};
pub use registration::{DriverEntry, COMPAT, COMPATIBLE, COMPAT_LEGACY, DRIVER_ENTRY};
pub use trigger::{
    OffloadPwmTrigger, PwmTriggerState, Trigger, TriggerInfo, TriggerKind, TriggerRef,
    TriggerRegistry,
};
