//! Consumer-side trigger discovery.
//!
//! A consumer device opts in to hardware pacing by carrying an
//! [`OFFLOAD_PROPERTY`] reference in its description node. Resolution
//! walks reference, node, device, trigger in that order, and each missing
//! link has a distinct outcome: an absent property means the consumer
//! never asked (not an error), a dangling reference is a description bug,
//! and a provider that simply has not probed yet defers the caller until
//! the platform retries.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, TriggerError};
use crate::platform::{Device, Platform};
use crate::trigger::{Trigger, TriggerKind, TriggerRegistry};

/// Description-graph property naming the offload engine a consumer wants
/// to be paced by.
pub const OFFLOAD_PROPERTY: &str = "offloads";

/// Resolves the offload trigger `consumer` references, if any.
///
/// Returns `Ok(None)` when the consumer's node carries no
/// [`OFFLOAD_PROPERTY`] at all.
///
/// # Errors
///
/// - [`TriggerError::InvalidArgument`] for a reference that points at a
///   node missing from the graph.
/// - [`TriggerError::Deferred`] when the provider device has not been
///   created yet, or exists but has not registered its trigger. Retryable.
/// - [`TriggerError::TypeMismatch`] when the reference resolves to a
///   trigger of a foreign kind. Permanent.
///
/// On every path that acquires a reference, including the mismatch path,
/// the consumer device is left holding a release obligation that drops
/// the reference at teardown.
pub fn resolve_offload_trigger(
    platform: &Platform,
    registry: &TriggerRegistry,
    consumer: &Arc<Device>,
) -> Result<Option<Arc<Trigger>>> {
    let provider_node = match platform.find_reference(consumer.node(), OFFLOAD_PROPERTY)? {
        Some(node) => node,
        None => {
            debug!("device {} requests no offload trigger", consumer.name());
            return Ok(None);
        }
    };

    let provider = match platform.device_for_node(provider_node) {
        Some(device) => device,
        None => {
            debug!(
                "device {}: provider {} not created yet",
                consumer.name(),
                provider_node
            );
            return Err(TriggerError::Deferred("provider device not created"));
        }
    };

    let handle = match registry.acquire_owned_by(provider.id()) {
        Some(handle) => handle,
        None => {
            debug!(
                "device {}: provider {} has no registered trigger yet",
                consumer.name(),
                provider.name()
            );
            return Err(TriggerError::Deferred("provider trigger not registered"));
        }
    };
    let trigger = handle.trigger().clone();

    // The count drops at consumer teardown, however resolution ends.
    consumer.defer_drop("put-offload-trigger", handle);

    if trigger.kind() != TriggerKind::OffloadPwm {
        return Err(TriggerError::TypeMismatch {
            expected: TriggerKind::OffloadPwm,
            found: trigger.kind(),
        });
    }

    debug!(
        "device {} resolved offload trigger {}",
        consumer.name(),
        trigger.name()
    );
    Ok(Some(trigger))
}
