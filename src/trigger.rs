//! Trigger objects and the registry consumers discover them through.
//!
//! A [`Trigger`] is a named, typed pacing source owned by exactly one
//! provider device. Consumers never own it; they hold counted
//! [`TriggerRef`] handles acquired through discovery. The private state a
//! provider attaches at creation is opaque to everyone else and is only
//! recovered through [`OffloadPwmTrigger`], which checks the kind marker
//! before downcasting.
//!
//! # Lifecycle
//!
//! `create` allocates an unpublished trigger, `register` makes it visible
//! to discovery, `unregister` withdraws it, `destroy` returns its table
//! slot. Providers run these through their release stacks so the order is
//! the exact reverse of acquisition.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::{Result, TriggerError};
use crate::frequency;
use crate::hal::{CapturePipeline, ClockSource};
use crate::platform::DeviceId;

// =============================================================================
// Trigger and Kind Marker
// =============================================================================

/// Trigger flavors known to the capture stack.
///
/// The marker is the identity checked before any private-state downcast;
/// this crate only ever constructs [`TriggerKind::OffloadPwm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerKind {
    /// Paced by a PWM clock feeding a bus-offload capture engine.
    OffloadPwm,
    /// Paced by a software high-resolution timer.
    Hrtimer,
    /// Fired by an operator, one shot at a time.
    Manual,
}

/// A named pacing source owned by one provider device.
pub struct Trigger {
    name: String,
    kind: TriggerKind,
    owner: DeviceId,
    state: Arc<dyn Any + Send + Sync>,
    // Counts consumer references only. The owner is not a reference.
    consumer_refs: AtomicUsize,
}

impl Trigger {
    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind marker.
    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    /// Identity of the offload engine this trigger paces.
    ///
    /// Consumers correlating multiple streams key them by this id.
    pub fn offload_id(&self) -> DeviceId {
        self.owner
    }

    /// Number of consumer references currently outstanding.
    pub fn consumer_refs(&self) -> usize {
        self.consumer_refs.load(Ordering::Relaxed)
    }

    /// Serializable snapshot of the public identity.
    pub fn info(&self) -> TriggerInfo {
        TriggerInfo {
            name: self.name.clone(),
            kind: self.kind,
            owner: self.owner,
            consumer_refs: self.consumer_refs(),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("consumer_refs", &self.consumer_refs())
            .finish_non_exhaustive()
    }
}

/// Serializable snapshot of a trigger's public identity.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerInfo {
    /// Registered name.
    pub name: String,
    /// Kind marker.
    pub kind: TriggerKind,
    /// Owning provider device.
    pub owner: DeviceId,
    /// Consumer references outstanding at snapshot time.
    pub consumer_refs: usize,
}

// =============================================================================
// TriggerRef - Counted Consumer Handle
// =============================================================================

/// Non-owning consumer handle to a trigger.
///
/// Creating or cloning one increments the trigger's consumer count;
/// dropping it decrements. The count is advisory: it never blocks the
/// owner, it tells teardown whether consumers are still holding on.
pub struct TriggerRef {
    inner: Arc<Trigger>,
}

impl TriggerRef {
    /// Takes a counted reference on `trigger`.
    pub fn new(trigger: &Arc<Trigger>) -> Self {
        trigger.consumer_refs.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: trigger.clone(),
        }
    }

    /// The referenced trigger.
    pub fn trigger(&self) -> &Arc<Trigger> {
        &self.inner
    }
}

impl Clone for TriggerRef {
    fn clone(&self) -> Self {
        Self::new(&self.inner)
    }
}

impl Drop for TriggerRef {
    fn drop(&mut self) {
        self.inner.consumer_refs.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::ops::Deref for TriggerRef {
    type Target = Trigger;

    fn deref(&self) -> &Trigger {
        &self.inner
    }
}

impl fmt::Debug for TriggerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TriggerRef").field(&self.inner).finish()
    }
}

// =============================================================================
// TriggerRegistry
// =============================================================================

#[derive(Default)]
struct RegistryInner {
    registered: HashMap<DeviceId, Arc<Trigger>>,
    names: HashSet<String>,
    live: usize,
    capacity: Option<usize>,
}

/// Creates triggers and publishes them for discovery.
///
/// Discovery is keyed by owning device: a provider registers at most one
/// trigger, and consumers that resolved the provider acquire it here.
pub struct TriggerRegistry {
    inner: RwLock<RegistryInner>,
}

impl TriggerRegistry {
    /// Registry without a table limit.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Registry with a fixed trigger table.
    ///
    /// Deployments that preallocate their tables get `OutOfMemory` from
    /// [`create`](Self::create) instead of growing without bound.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                capacity: Some(capacity),
                ..RegistryInner::default()
            }),
        }
    }

    /// Allocates a trigger scoped to `owner`.
    ///
    /// The trigger is not yet visible to discovery; call
    /// [`register`](Self::register) once setup can no longer fail short of
    /// registration itself.
    pub fn create(
        &self,
        owner: DeviceId,
        name: impl Into<String>,
        kind: TriggerKind,
        state: Arc<dyn Any + Send + Sync>,
    ) -> Result<Arc<Trigger>> {
        let mut inner = self.inner.write();
        if let Some(capacity) = inner.capacity {
            if inner.live >= capacity {
                return Err(TriggerError::OutOfMemory("trigger table full"));
            }
        }
        inner.live += 1;
        let name = name.into();
        debug!("created trigger {} ({:?}) for {}", name, kind, owner);
        Ok(Arc::new(Trigger {
            name,
            kind,
            owner,
            state,
            consumer_refs: AtomicUsize::new(0),
        }))
    }

    /// Publishes `trigger` so discovery can find it.
    ///
    /// Fails on a name collision or when the owner already has a
    /// registered trigger; a failed call publishes nothing.
    pub fn register(&self, trigger: &Arc<Trigger>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.names.contains(trigger.name()) {
            return Err(TriggerError::InvalidArgument(format!(
                "trigger name {:?} already registered",
                trigger.name()
            )));
        }
        if inner.registered.contains_key(&trigger.owner) {
            return Err(TriggerError::InvalidArgument(format!(
                "device {} already owns a registered trigger",
                trigger.owner
            )));
        }
        inner.names.insert(trigger.name().to_string());
        inner.registered.insert(trigger.owner, trigger.clone());
        info!("registered trigger {} for {}", trigger.name(), trigger.owner);
        Ok(())
    }

    /// Withdraws the trigger registered by `owner` from discovery.
    ///
    /// Consumer handles already out there stay valid; the pacing they
    /// observe stops once the owner finishes tearing down.
    pub fn unregister(&self, owner: DeviceId) {
        let mut inner = self.inner.write();
        if let Some(trigger) = inner.registered.remove(&owner) {
            inner.names.remove(trigger.name());
            let refs = trigger.consumer_refs();
            if refs > 0 {
                warn!(
                    "trigger {} unregistered with {} consumer reference(s) outstanding",
                    trigger.name(),
                    refs
                );
            } else {
                info!("trigger {} unregistered", trigger.name());
            }
        }
    }

    /// Returns the trigger's table slot.
    ///
    /// Runs after `unregister` on the owner's release stack; if the
    /// trigger is somehow still published, it is withdrawn here so no
    /// destroyed trigger stays reachable.
    pub fn destroy(&self, trigger: &Arc<Trigger>) {
        let mut inner = self.inner.write();
        let still_registered = inner
            .registered
            .get(&trigger.owner)
            .is_some_and(|current| Arc::ptr_eq(current, trigger));
        if still_registered {
            inner.registered.remove(&trigger.owner);
            inner.names.remove(trigger.name());
        }
        inner.live = inner.live.saturating_sub(1);
        debug!("destroyed trigger {}", trigger.name());
    }

    /// Acquires a counted reference to the trigger registered by `owner`.
    pub fn acquire_owned_by(&self, owner: DeviceId) -> Option<TriggerRef> {
        self.inner.read().registered.get(&owner).map(TriggerRef::new)
    }

    /// Number of triggers currently visible to discovery.
    pub fn registered_count(&self) -> usize {
        self.inner.read().registered.len()
    }

    /// Number of triggers created and not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.inner.read().live
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Offload PWM Private State and Typed View
// =============================================================================

/// Private state attached to the triggers this driver creates.
pub struct PwmTriggerState {
    clock: Arc<dyn ClockSource>,
    pipeline: Arc<dyn CapturePipeline>,
}

impl PwmTriggerState {
    /// Bundles the provider's clock and capture stream.
    pub fn new(clock: Arc<dyn ClockSource>, pipeline: Arc<dyn CapturePipeline>) -> Self {
        Self { clock, pipeline }
    }

    /// The pulse clock pacing this trigger.
    pub fn clock(&self) -> &Arc<dyn ClockSource> {
        &self.clock
    }

    /// The capture stream samples land in.
    pub fn pipeline(&self) -> &Arc<dyn CapturePipeline> {
        &self.pipeline
    }
}

/// Kind-checked view of a trigger created by this driver.
///
/// Constructing one is the only way to reach the private state: the kind
/// marker is validated first, then the opaque state is downcast. A caller
/// holding a foreign trigger gets [`TriggerError::TypeMismatch`] and never
/// sees the state.
pub struct OffloadPwmTrigger {
    trigger: Arc<Trigger>,
    state: Arc<PwmTriggerState>,
}

impl TryFrom<&Arc<Trigger>> for OffloadPwmTrigger {
    type Error = TriggerError;

    fn try_from(trigger: &Arc<Trigger>) -> Result<Self> {
        if trigger.kind != TriggerKind::OffloadPwm {
            return Err(TriggerError::TypeMismatch {
                expected: TriggerKind::OffloadPwm,
                found: trigger.kind,
            });
        }
        let state = trigger
            .state
            .clone()
            .downcast::<PwmTriggerState>()
            .map_err(|_| {
                TriggerError::InvalidArgument(format!(
                    "trigger {:?} carries foreign private state",
                    trigger.name
                ))
            })?;
        Ok(Self {
            trigger: trigger.clone(),
            state,
        })
    }
}

impl OffloadPwmTrigger {
    /// The underlying trigger object.
    pub fn trigger(&self) -> &Arc<Trigger> {
        &self.trigger
    }

    pub(crate) fn pipeline(&self) -> &Arc<dyn CapturePipeline> {
        self.state.pipeline()
    }

    /// Requests a new sampling rate. See
    /// [`frequency::set_sampling_frequency`].
    pub fn set_sampling_frequency(&self, hz: u32) -> Result<()> {
        frequency::set_sampling_frequency(self.state.clock.as_ref(), hz)
    }

    /// Rate the clock actually realizes, in Hz. Recomputed per call.
    pub fn sampling_frequency(&self) -> u32 {
        frequency::sampling_frequency(self.state.clock.as_ref())
    }

    /// Pauses or resumes the pulse train.
    ///
    /// Wired to capture start/stop so the line only pulses while a stream
    /// is draining samples.
    pub fn set_paced(&self, paced: bool) -> Result<()> {
        if paced {
            self.state.clock.enable()?;
        } else {
            self.state.clock.disable()?;
        }
        Ok(())
    }
}

impl fmt::Debug for OffloadPwmTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OffloadPwmTrigger").field(&self.trigger).finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
