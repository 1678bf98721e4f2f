//! Type-erased control parameters exposed by a trigger.
//!
//! Control surfaces address trigger settings by name and move values as
//! JSON, without knowing the trigger's concrete type. [`trigger_params`]
//! builds the parameter group for a trigger; offload PWM triggers expose
//! `sampling_frequency`.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde_json::Value;

use crate::trigger::{OffloadPwmTrigger, Trigger};

/// Type-erased access to one named trigger setting.
pub trait TriggerParam: Send + Sync {
    /// The parameter name.
    fn name(&self) -> &str;

    /// Current value as JSON.
    fn get_json(&self) -> anyhow::Result<Value>;

    /// Sets the value from JSON.
    fn set_json(&self, value: Value) -> anyhow::Result<()>;
}

/// The `sampling_frequency` parameter of an offload PWM trigger.
///
/// Reads recompute the realized rate from the pacing clock, so a read
/// after a rounded write reports what the hardware actually does.
struct SamplingFrequency {
    view: OffloadPwmTrigger,
}

impl TriggerParam for SamplingFrequency {
    fn name(&self) -> &str {
        "sampling_frequency"
    }

    fn get_json(&self) -> anyhow::Result<Value> {
        Ok(Value::from(self.view.sampling_frequency()))
    }

    fn set_json(&self, value: Value) -> anyhow::Result<()> {
        let hz = parse_hz(&value)?;
        self.view
            .set_sampling_frequency(hz)
            .with_context(|| format!("setting sampling_frequency to {hz}"))
    }
}

// Accepts a JSON number or a decimal string. Interactive shells tend to
// send everything as strings.
fn parse_hz(value: &Value) -> anyhow::Result<u32> {
    match value {
        Value::Number(n) => {
            let raw = n
                .as_u64()
                .ok_or_else(|| anyhow!("sampling_frequency must be a non-negative integer"))?;
            u32::try_from(raw).context("sampling_frequency out of range")
        }
        Value::String(s) => s
            .trim()
            .parse::<u32>()
            .with_context(|| format!("cannot parse sampling_frequency from {s:?}")),
        other => Err(anyhow!("sampling_frequency expects a number, got {other}")),
    }
}

/// Builds the parameter group for `trigger`.
///
/// Kinds without settings get an empty group, so callers need no
/// special case for them.
pub fn trigger_params(trigger: &Arc<Trigger>) -> Vec<Box<dyn TriggerParam>> {
    match OffloadPwmTrigger::try_from(trigger) {
        Ok(view) => vec![Box::new(SamplingFrequency { view })],
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockHal;
    use crate::hal::ProviderHal;
    use crate::platform::{Node, Platform};
    use crate::trigger::{PwmTriggerState, TriggerKind, TriggerRegistry};
    use serde_json::json;
    use std::time::Duration;

    fn pwm_trigger() -> (Arc<MockHal>, Arc<Trigger>) {
        let platform = Platform::new();
        let registry = TriggerRegistry::new();
        let hal = Arc::new(MockHal::new());
        let node = platform.add_node(Node::new("engine0"));
        let dev = platform.create_device(node).unwrap();
        let clock = hal.claim_clock(&dev).unwrap();
        let pipeline = hal.allocate_pipeline(&dev, "rx").unwrap();
        let trigger = registry
            .create(
                dev.id(),
                "engine0-pwm-trigger",
                TriggerKind::OffloadPwm,
                Arc::new(PwmTriggerState::new(clock, pipeline)),
            )
            .unwrap();
        (hal, trigger)
    }

    #[test]
    fn pwm_trigger_exposes_sampling_frequency() {
        let (_hal, trigger) = pwm_trigger();
        let params = trigger_params(&trigger);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name(), "sampling_frequency");
    }

    #[test]
    fn writes_accept_numbers_and_decimal_strings() {
        let (_hal, trigger) = pwm_trigger();
        let params = trigger_params(&trigger);
        let param = &params[0];

        param.set_json(json!(1000)).unwrap();
        assert_eq!(param.get_json().unwrap(), json!(1000));

        param.set_json(json!("250")).unwrap();
        assert_eq!(param.get_json().unwrap(), json!(250));

        param.set_json(json!("  50  ")).unwrap();
        assert_eq!(param.get_json().unwrap(), json!(50));
    }

    #[test]
    fn rejected_writes_leave_the_rate() {
        let (_hal, trigger) = pwm_trigger();
        let params = trigger_params(&trigger);
        let param = &params[0];
        param.set_json(json!(1000)).unwrap();

        assert!(param.set_json(json!(0)).is_err());
        assert!(param.set_json(json!(-5)).is_err());
        assert!(param.set_json(json!(u64::from(u32::MAX) + 1)).is_err());
        assert!(param.set_json(json!("fast")).is_err());
        assert!(param.set_json(json!(true)).is_err());

        assert_eq!(param.get_json().unwrap(), json!(1000));
    }

    #[test]
    fn reads_recompute_from_the_clock() {
        let (hal, trigger) = pwm_trigger();
        let params = trigger_params(&trigger);
        params[0].set_json(json!(1000)).unwrap();

        // Something else reprograms the clock behind our back.
        hal.clock().force_period(Duration::from_nanos(2_000_000));
        assert_eq!(params[0].get_json().unwrap(), json!(500));
    }

    #[test]
    fn foreign_triggers_have_no_params() {
        let platform = Platform::new();
        let registry = TriggerRegistry::new();
        let node = platform.add_node(Node::new("timerdev"));
        let dev = platform.create_device(node).unwrap();
        let trigger = registry
            .create(dev.id(), "timer0", TriggerKind::Hrtimer, Arc::new(()))
            .unwrap();

        assert!(trigger_params(&trigger).is_empty());
    }
}
