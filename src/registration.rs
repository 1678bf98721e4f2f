//! Driver registration table.
//!
//! Providers are matched to platform nodes by compatible string. The
//! legacy string predates the trigger being split out of the offload
//! engine driver; nodes written against it still bind here.

use crate::platform::Node;

/// Compatible string used by early engine descriptions.
pub const COMPAT_LEGACY: &str = "spi-engine-offload-pwm-trigger-dma";

/// Canonical compatible string.
pub const COMPAT: &str = "offload-pwm-trigger";

/// All compatible strings this driver binds to.
pub const COMPATIBLE: [&str; 2] = [COMPAT_LEGACY, COMPAT];

/// One row of the platform's driver table.
#[derive(Debug, Clone, Copy)]
pub struct DriverEntry {
    /// Driver name, used in logs and probe dispatch.
    pub name: &'static str,
    /// Compatible strings that select this driver.
    pub compatible: &'static [&'static str],
}

impl DriverEntry {
    /// Whether this driver binds to `node`.
    pub fn matches(&self, node: &Node) -> bool {
        node.compatible()
            .iter()
            .any(|compat| self.compatible.iter().any(|entry| compat == entry))
    }
}

/// Table entry for the offload PWM trigger driver.
pub const DRIVER_ENTRY: DriverEntry = DriverEntry {
    name: "offload-pwm-trigger",
    compatible: &COMPATIBLE,
};
