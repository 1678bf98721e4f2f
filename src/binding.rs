//! Consumer-side binding of a capture device to an offload trigger.
//!
//! Attaching flips the device into hardware-paced operation: the trigger's
//! capture stream becomes the device's buffer and the mode word gains the
//! hardware-buffer and hardware-trigger bits. The binding is one-shot and
//! lives until the device tears down; there is deliberately no path that
//! swaps it at runtime.

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, TriggerError};
use crate::hal::CapturePipeline;
use crate::platform::Device;
use crate::trigger::{OffloadPwmTrigger, Trigger, TriggerRef};

bitflags! {
    /// Operating-mode word of a capture device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CaptureMode: u32 {
        /// Samples are pulled by software, one conversion at a time.
        const SOFTWARE = 1 << 0;
        /// Samples land in a hardware-filled buffer.
        const BUFFER_HARDWARE = 1 << 1;
        /// Conversions are paced by a hardware trigger.
        const HARDWARE_TRIGGERED = 1 << 2;
    }
}

/// Observable binding state of a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStatus {
    /// No trigger bound; the device samples under software control.
    Unbound,
    /// Bound to an offload trigger; acquisition is hardware-paced.
    Bound,
    /// A binding attempt failed; the device stays in software control.
    Faulted,
}

enum Slot {
    Unbound,
    Bound {
        trigger: TriggerRef,
        pipeline: Arc<dyn CapturePipeline>,
    },
    Faulted,
}

struct CaptureShared {
    mode: Mutex<CaptureMode>,
    slot: Mutex<Slot>,
}

/// Consumer-side capture device.
///
/// Wraps a platform device with the mode word and the trigger binding
/// slot. The slot is shared with the device's release stack so teardown
/// clears it without keeping the wrapper alive.
pub struct CaptureDevice {
    dev: Arc<Device>,
    shared: Arc<CaptureShared>,
}

impl CaptureDevice {
    /// Wraps `dev` in software-controlled mode with nothing bound.
    pub fn new(dev: Arc<Device>) -> Self {
        Self {
            dev,
            shared: Arc::new(CaptureShared {
                mode: Mutex::new(CaptureMode::SOFTWARE),
                slot: Mutex::new(Slot::Unbound),
            }),
        }
    }

    /// The underlying platform device.
    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    /// Current operating-mode word.
    pub fn mode(&self) -> CaptureMode {
        *self.shared.mode.lock()
    }

    /// Current binding state.
    pub fn binding_status(&self) -> BindingStatus {
        match *self.shared.slot.lock() {
            Slot::Unbound => BindingStatus::Unbound,
            Slot::Bound { .. } => BindingStatus::Bound,
            Slot::Faulted => BindingStatus::Faulted,
        }
    }

    /// The bound trigger, if any.
    pub fn bound_trigger(&self) -> Option<Arc<Trigger>> {
        match &*self.shared.slot.lock() {
            Slot::Bound { trigger, .. } => Some(trigger.trigger().clone()),
            _ => None,
        }
    }
}

/// Binds `trigger` to `capture` for hardware-paced acquisition.
///
/// The kind marker is re-validated here even when the trigger came from
/// discovery; callers that fabricated a handle get the same
/// [`TriggerError::TypeMismatch`] they would have gotten there.
///
/// One-shot: a device that is already bound, or whose earlier attempt
/// faulted, is rejected without any change to its state. If the stream
/// vetoes the attachment the slot is marked faulted and the mode word is
/// left untouched.
pub fn attach_offload_trigger(capture: &CaptureDevice, trigger: &Arc<Trigger>) -> Result<()> {
    let view = OffloadPwmTrigger::try_from(trigger)?;

    let mut slot = capture.shared.slot.lock();
    match *slot {
        Slot::Unbound => {}
        Slot::Bound { .. } => {
            return Err(TriggerError::InvalidArgument(format!(
                "device {} already has a bound trigger",
                capture.dev.name()
            )));
        }
        Slot::Faulted => {
            return Err(TriggerError::InvalidArgument(format!(
                "device {} faulted during an earlier binding attempt",
                capture.dev.name()
            )));
        }
    }

    let pipeline = view.pipeline().clone();
    if let Err(err) = pipeline.bind(capture.dev.id()) {
        *slot = Slot::Faulted;
        return Err(err.into());
    }

    *slot = Slot::Bound {
        trigger: TriggerRef::new(trigger),
        pipeline,
    };
    *capture.shared.mode.lock() |= CaptureMode::BUFFER_HARDWARE | CaptureMode::HARDWARE_TRIGGERED;
    drop(slot);

    // Clear the binding when the consumer device goes away.
    let shared = capture.shared.clone();
    let dev_id = capture.dev.id();
    capture.dev.defer("detach-trigger", move || {
        let mut slot = shared.slot.lock();
        if let Slot::Bound { pipeline, .. } = &*slot {
            pipeline.unbind(dev_id);
        }
        *slot = Slot::Unbound;
    });

    info!(
        "device {} bound to trigger {}",
        capture.dev.name(),
        trigger.name()
    );
    Ok(())
}

/// Runtime trigger reassignment, the generic control-surface entry point.
///
/// Offload PWM bindings are fixed when the device is set up, so every
/// request is rejected outright, whatever the current binding state. No
/// state is touched.
pub fn request_trigger_change(capture: &CaptureDevice, trigger: &Arc<Trigger>) -> Result<()> {
    debug!(
        "device {} rejected runtime reassignment to trigger {}",
        capture.dev.name(),
        trigger.name()
    );
    Err(TriggerError::InvalidArgument(
        "offload pwm triggers are bound at setup time and cannot be reassigned".to_string(),
    ))
}
