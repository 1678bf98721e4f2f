//! Provider lifecycle: bringing a trigger engine into service.
//!
//! [`OffloadTriggerProvider::probe`] walks the setup sequence for one
//! engine device. Each acquired resource is paired with a labelled
//! release action on the device before the next step runs, so a failure
//! anywhere unwinds exactly the completed steps, in reverse, and leaves
//! the engine as it was found. The same stack runs at teardown.
//!
//! Setup order (release labels in parentheses):
//!
//! 1. claim the pacing clock (`release-clock`)
//! 2. allocate the capture pipeline (`release-pipeline`)
//! 3. create the trigger object (`destroy-trigger`)
//! 4. program the initial sampling rate
//! 5. start the clock (`disable-clock`)
//! 6. publish the trigger for discovery (`unregister-trigger`)

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TriggerError};
use crate::frequency;
use crate::hal::ProviderHal;
use crate::platform::{Device, Platform};
use crate::trigger::{PwmTriggerState, Trigger, TriggerKind, TriggerRegistry};

/// Capture channel claimed when the config does not name one.
pub const DEFAULT_CHANNEL: &str = "rx";

/// Sampling rate programmed when the config does not name one.
pub const DEFAULT_SAMPLING_FREQUENCY_HZ: u32 = 1000;

// ============================================================================
// Configuration
// ============================================================================

/// Provider settings, usually read from a TOML fragment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Capture channel to allocate on the offload engine.
    pub channel: String,
    /// Initial sampling rate in hertz.
    pub sampling_frequency_hz: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            sampling_frequency_hz: DEFAULT_SAMPLING_FREQUENCY_HZ,
        }
    }
}

impl ProviderConfig {
    /// Parses a TOML fragment. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|err| TriggerError::InvalidArgument(format!("bad provider config: {err}")))
    }

    /// Reads and parses a TOML config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            TriggerError::InvalidArgument(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}

// ============================================================================
// Provider state machine
// ============================================================================

/// Setup progress of a trigger provider.
///
/// States advance strictly in declaration order during probe. A failure
/// at any point unwinds the completed steps, so intermediate states are
/// only ever observable in the debug log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    /// Nothing acquired yet.
    Uninitialized,
    /// Pacing clock claimed from the engine.
    ClockAcquired,
    /// Capture pipeline allocated on the requested channel.
    PipelineAllocated,
    /// Trigger object created, not yet visible to consumers.
    TriggerCreated,
    /// Initial sampling rate programmed.
    RateConfigured,
    /// Pacing clock running.
    ClockEnabled,
    /// Trigger published for discovery.
    Registered,
}

/// A trigger engine in service.
///
/// Holds the engine device and the published trigger. Dropping the
/// provider does not tear anything down; the release stack on the
/// device does that when the device is removed.
#[derive(Debug)]
pub struct OffloadTriggerProvider {
    dev: Arc<Device>,
    trigger: Arc<Trigger>,
    state: ProviderState,
}

impl OffloadTriggerProvider {
    /// Brings a trigger engine into service.
    ///
    /// On failure every completed step is undone in reverse order before
    /// the error is returned. A [`TriggerError::Deferred`] failure is
    /// logged at debug level only, since the platform is expected to
    /// retry once the missing piece arrives; anything else is an error.
    pub fn probe(
        dev: &Arc<Device>,
        hal: &Arc<dyn ProviderHal>,
        registry: &Arc<TriggerRegistry>,
        config: &ProviderConfig,
    ) -> Result<Self> {
        let mark = dev.release_mark();
        match Self::try_probe(dev, hal, registry, config) {
            Ok(provider) => Ok(provider),
            Err(err) => {
                dev.release_to(mark);
                if err.is_deferred() {
                    debug!("probe of {} deferred: {}", dev.name(), err);
                } else {
                    error!("probe of {} failed: {}", dev.name(), err);
                }
                Err(err)
            }
        }
    }

    fn try_probe(
        dev: &Arc<Device>,
        hal: &Arc<dyn ProviderHal>,
        registry: &Arc<TriggerRegistry>,
        config: &ProviderConfig,
    ) -> Result<Self> {
        let clock = hal.claim_clock(dev)?;
        {
            let hal = hal.clone();
            let clock = clock.clone();
            dev.defer("release-clock", move || hal.release_clock(clock));
        }
        debug!("{}: {:?}", dev.name(), ProviderState::ClockAcquired);

        let pipeline = hal.allocate_pipeline(dev, &config.channel)?;
        {
            let hal = hal.clone();
            let pipeline = pipeline.clone();
            dev.defer("release-pipeline", move || hal.release_pipeline(pipeline));
        }
        debug!("{}: {:?}", dev.name(), ProviderState::PipelineAllocated);

        let trigger = registry.create(
            dev.id(),
            format!("{}-pwm-trigger", dev.name()),
            TriggerKind::OffloadPwm,
            Arc::new(PwmTriggerState::new(clock.clone(), pipeline)),
        )?;
        {
            let registry = registry.clone();
            let trigger = trigger.clone();
            dev.defer("destroy-trigger", move || registry.destroy(&trigger));
        }
        debug!("{}: {:?}", dev.name(), ProviderState::TriggerCreated);

        frequency::set_sampling_frequency(clock.as_ref(), config.sampling_frequency_hz)?;
        debug!("{}: {:?}", dev.name(), ProviderState::RateConfigured);

        clock.enable()?;
        {
            let clock = clock.clone();
            // Teardown cannot propagate; a stuck output is logged and the
            // remaining releases still run.
            dev.defer("disable-clock", move || {
                if let Err(err) = clock.disable() {
                    warn!("pacing clock failed to disable at teardown: {}", err);
                }
            });
        }
        debug!("{}: {:?}", dev.name(), ProviderState::ClockEnabled);

        registry.register(&trigger)?;
        {
            let registry = registry.clone();
            let owner = dev.id();
            dev.defer("unregister-trigger", move || registry.unregister(owner));
        }

        info!(
            "{}: trigger {} registered at {} Hz on channel {:?}",
            dev.name(),
            trigger.name(),
            frequency::sampling_frequency(clock.as_ref()),
            config.channel
        );

        Ok(Self {
            dev: dev.clone(),
            trigger,
            state: ProviderState::Registered,
        })
    }

    /// The published trigger.
    pub fn trigger(&self) -> &Arc<Trigger> {
        &self.trigger
    }

    /// The engine device this provider runs on.
    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    /// Setup progress. Always [`ProviderState::Registered`] for a live
    /// provider.
    pub fn state(&self) -> ProviderState {
        self.state
    }

    /// Takes the provider out of service.
    ///
    /// Removes the engine device from the platform, which runs the
    /// release stack: the trigger is withdrawn from discovery first,
    /// then the clock stops and the engine resources are returned.
    pub fn teardown(self, platform: &Platform) {
        info!(
            "{}: tearing down trigger {}",
            self.dev.name(),
            self.trigger.name()
        );
        platform.remove_device(self.dev.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockHal;
    use crate::platform::Node;
    use std::io::Write;

    #[test]
    fn config_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.channel, "rx");
        assert_eq!(config.sampling_frequency_hz, 1000);
    }

    #[test]
    fn config_parses_full_fragment() {
        let config = ProviderConfig::from_toml_str(
            r#"
            channel = "tx"
            sampling_frequency_hz = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.channel, "tx");
        assert_eq!(config.sampling_frequency_hz, 250);
    }

    #[test]
    fn config_fills_missing_keys_with_defaults() {
        let config = ProviderConfig::from_toml_str("sampling_frequency_hz = 50").unwrap();
        assert_eq!(config.channel, "rx");
        assert_eq!(config.sampling_frequency_hz, 50);
    }

    #[test]
    fn config_rejects_wrong_types() {
        let err = ProviderConfig::from_toml_str("sampling_frequency_hz = \"fast\"").unwrap_err();
        assert!(matches!(err, TriggerError::InvalidArgument(_)));
    }

    #[test]
    fn config_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "channel = \"aux\"").unwrap();
        file.flush().unwrap();

        let config = ProviderConfig::from_path(file.path()).unwrap();
        assert_eq!(config.channel, "aux");
        assert_eq!(config.sampling_frequency_hz, 1000);

        let err = ProviderConfig::from_path("/nonexistent/trigger.toml").unwrap_err();
        assert!(matches!(err, TriggerError::InvalidArgument(_)));
    }

    #[test]
    fn probe_reaches_registered() {
        let platform = Platform::new();
        let registry = Arc::new(TriggerRegistry::new());
        let hal: Arc<dyn ProviderHal> = Arc::new(MockHal::new());
        let node = platform.add_node(Node::new("engine0"));
        let dev = platform.create_device(node).unwrap();

        let provider =
            OffloadTriggerProvider::probe(&dev, &hal, &registry, &ProviderConfig::default())
                .unwrap();

        assert_eq!(provider.state(), ProviderState::Registered);
        assert_eq!(provider.trigger().name(), "engine0-pwm-trigger");
        assert_eq!(registry.registered_count(), 1);
        assert!(provider.device().release_trace().is_empty());

        // Probe results land in logs and assertion messages; the provider
        // has to render something readable.
        let rendered = format!("{provider:?}");
        assert!(rendered.contains("Registered"));
        assert!(rendered.contains("engine0"));
    }
}
