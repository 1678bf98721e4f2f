//! In-memory platform harness: description nodes, live devices, and
//! per-device release stacks.
//!
//! Real deployments hang these semantics off a firmware description; the
//! harness keeps just enough of it in memory to drive discovery, probe
//! deferral, and ordered teardown. A description [`Node`] may exist long
//! before a [`Device`] is created for it, which is exactly the window the
//! deferral contract covers.
//!
//! Every device carries a release stack. Code that acquires a resource
//! pushes a labeled release action immediately afterwards; the stack runs
//! in reverse push order when the device is removed, and probe code can
//! unwind to a recorded mark on failure.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, TriggerError};

// =============================================================================
// Identifiers and Nodes
// =============================================================================

/// Identifies a node in the description graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NodeId(u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Identifies a live device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// One node in the hardware description graph.
///
/// Nodes carry a name, the compatible strings driver dispatch matches
/// against, and named references to other nodes.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    compatible: Vec<String>,
    references: HashMap<String, NodeId>,
}

impl Node {
    /// Creates a bare node.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compatible: Vec::new(),
            references: HashMap::new(),
        }
    }

    /// Adds a compatible string.
    pub fn with_compatible(mut self, compatible: impl Into<String>) -> Self {
        self.compatible.push(compatible.into());
        self
    }

    /// Adds a named reference to another node.
    pub fn with_reference(mut self, property: impl Into<String>, target: NodeId) -> Self {
        self.references.insert(property.into(), target);
        self
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compatible strings, in declaration order.
    pub fn compatible(&self) -> &[String] {
        &self.compatible
    }

    /// Target of the named reference, if the property is present.
    pub fn reference(&self, property: &str) -> Option<NodeId> {
        self.references.get(property).copied()
    }
}

// =============================================================================
// Platform
// =============================================================================

#[derive(Default)]
struct PlatformInner {
    nodes: HashMap<NodeId, Node>,
    devices_by_node: HashMap<NodeId, Arc<Device>>,
    devices: HashMap<DeviceId, Arc<Device>>,
}

/// Description graph plus the table of live devices.
pub struct Platform {
    inner: RwLock<PlatformInner>,
    next_node: AtomicU32,
    next_device: AtomicU32,
}

impl Platform {
    /// Creates an empty platform.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PlatformInner::default()),
            next_node: AtomicU32::new(0),
            next_device: AtomicU32::new(0),
        }
    }

    /// Inserts a description node and returns its id.
    pub fn add_node(&self, node: Node) -> NodeId {
        let id = NodeId(self.next_node.fetch_add(1, Ordering::Relaxed));
        self.inner.write().nodes.insert(id, node);
        id
    }

    /// Removes a description node.
    ///
    /// Any device created for the node is unaffected; references to the
    /// node from elsewhere in the graph now dangle.
    pub fn remove_node(&self, id: NodeId) {
        self.inner.write().nodes.remove(&id);
    }

    /// Snapshot of a node.
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.inner.read().nodes.get(&id).cloned()
    }

    /// Resolves the named reference property on `node`.
    ///
    /// Returns `Ok(None)` when the property is absent, and
    /// `InvalidArgument` when the property points at a node that does not
    /// exist in the graph.
    pub fn find_reference(&self, node: NodeId, property: &str) -> Result<Option<NodeId>> {
        let inner = self.inner.read();
        let source = inner.nodes.get(&node).ok_or_else(|| {
            TriggerError::InvalidArgument(format!("no description node {node}"))
        })?;
        let target = match source.reference(property) {
            Some(target) => target,
            None => return Ok(None),
        };
        if !inner.nodes.contains_key(&target) {
            return Err(TriggerError::InvalidArgument(format!(
                "reference {property:?} on {} points at missing node {target}",
                source.name()
            )));
        }
        Ok(Some(target))
    }

    /// Instantiates the device described by `node`.
    ///
    /// At most one device may exist per node.
    pub fn create_device(&self, node: NodeId) -> Result<Arc<Device>> {
        let mut inner = self.inner.write();
        let name = match inner.nodes.get(&node) {
            Some(n) => n.name().to_string(),
            None => {
                return Err(TriggerError::InvalidArgument(format!(
                    "no description node {node}"
                )))
            }
        };
        if inner.devices_by_node.contains_key(&node) {
            return Err(TriggerError::InvalidArgument(format!(
                "node {node} already has a device"
            )));
        }
        let id = DeviceId(self.next_device.fetch_add(1, Ordering::Relaxed));
        let device = Arc::new(Device::new(id, node, name));
        inner.devices_by_node.insert(node, device.clone());
        inner.devices.insert(id, device.clone());
        debug!("created device {} for node {}", device.name(), node);
        Ok(device)
    }

    /// Live device created for `node`, if any.
    pub fn device_for_node(&self, node: NodeId) -> Option<Arc<Device>> {
        self.inner.read().devices_by_node.get(&node).cloned()
    }

    /// Live device by id.
    pub fn device(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.inner.read().devices.get(&id).cloned()
    }

    /// Removes a device and runs its release stack in reverse push order.
    pub fn remove_device(&self, id: DeviceId) {
        let device = {
            let mut inner = self.inner.write();
            match inner.devices.remove(&id) {
                Some(device) => {
                    inner.devices_by_node.remove(&device.node());
                    device
                }
                None => return,
            }
        };
        debug!("removing device {}", device.name());
        device.run_releases();
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Device and Release Stack
// =============================================================================

struct ReleaseEntry {
    label: &'static str,
    action: Box<dyn FnOnce() + Send>,
}

/// A live device with its scoped release stack.
pub struct Device {
    id: DeviceId,
    node: NodeId,
    name: String,
    releases: Mutex<Vec<ReleaseEntry>>,
    trace: Mutex<Vec<&'static str>>,
}

impl Device {
    fn new(id: DeviceId, node: NodeId, name: String) -> Self {
        Self {
            id,
            node,
            name,
            releases: Mutex::new(Vec::new()),
            trace: Mutex::new(Vec::new()),
        }
    }

    /// Device id.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Description node this device was created from.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Device name (the node name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pushes a release action to run when the device is torn down.
    ///
    /// Actions run in reverse push order, each exactly once.
    pub fn defer(&self, label: &'static str, action: impl FnOnce() + Send + 'static) {
        self.releases.lock().push(ReleaseEntry {
            label,
            action: Box::new(action),
        });
    }

    /// Holds `value` until teardown, then drops it.
    pub fn defer_drop<T: Send + 'static>(&self, label: &'static str, value: T) {
        self.defer(label, move || drop(value));
    }

    /// Current depth of the release stack.
    ///
    /// Probe code records the mark on entry and unwinds to it on failure,
    /// so a failed probe releases only what it acquired itself.
    pub fn release_mark(&self) -> usize {
        self.releases.lock().len()
    }

    /// Pops and runs release actions until the stack is back at `mark`.
    pub fn release_to(&self, mark: usize) {
        loop {
            let entry = {
                let mut releases = self.releases.lock();
                if releases.len() <= mark {
                    return;
                }
                releases.pop()
            };
            if let Some(entry) = entry {
                debug!("device {}: releasing {}", self.name, entry.label);
                (entry.action)();
                self.trace.lock().push(entry.label);
            }
        }
    }

    /// Runs the entire release stack.
    pub fn run_releases(&self) {
        self.release_to(0);
    }

    /// Labels of release actions already run, in execution order.
    pub fn release_trace(&self) -> Vec<&'static str> {
        self.trace.lock().clone()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Anything remove_device did not drain still runs, in reverse.
        let entries: Vec<ReleaseEntry> = self.releases.get_mut().drain(..).collect();
        for entry in entries.into_iter().rev() {
            (entry.action)();
            self.trace.get_mut().push(entry.label);
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
