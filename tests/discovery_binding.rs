//! Consumer-side integration tests: discovery, binding, and control
//! parameters, run against a provider brought up the normal way.

use std::sync::Arc;
use std::time::Duration;

use daq_trigger_pwm::hal::mock::MockHal;
use daq_trigger_pwm::hal::{ClockSource, ProviderHal};
use daq_trigger_pwm::{
    attach_offload_trigger, request_trigger_change, resolve_offload_trigger, trigger_params,
    BindingStatus, CaptureDevice, CaptureMode, Device, Node, NodeId, OffloadTriggerProvider,
    Platform, ProviderConfig, TriggerError, TriggerKind, TriggerRegistry, COMPAT, COMPAT_LEGACY,
    DRIVER_ENTRY,
};
use serde_json::json;

// =============================================================================
// Test Rig
// =============================================================================

struct Rig {
    platform: Platform,
    registry: Arc<TriggerRegistry>,
    mock: Arc<MockHal>,
    hal: Arc<dyn ProviderHal>,
    engine_node: NodeId,
}

fn rig() -> Rig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mock = Arc::new(MockHal::new());
    let platform = Platform::new();
    let engine_node = platform.add_node(Node::new("engine0").with_compatible(COMPAT));
    Rig {
        platform,
        registry: Arc::new(TriggerRegistry::new()),
        hal: mock.clone(),
        mock,
        engine_node,
    }
}

impl Rig {
    fn probe_provider(&self) -> OffloadTriggerProvider {
        let dev = self.platform.create_device(self.engine_node).unwrap();
        OffloadTriggerProvider::probe(&dev, &self.hal, &self.registry, &ProviderConfig::default())
            .unwrap()
    }

    fn consumer(&self, name: &str) -> Arc<Device> {
        let node = self
            .platform
            .add_node(Node::new(name).with_reference("offloads", self.engine_node));
        self.platform.create_device(node).unwrap()
    }
}

// =============================================================================
// Discovery and Binding
// =============================================================================

#[test]
fn consumer_binds_through_discovery_and_detaches_at_teardown() {
    let rig = rig();
    let provider = rig.probe_provider();
    let adc = rig.consumer("adc0");

    let trigger = resolve_offload_trigger(&rig.platform, &rig.registry, &adc)
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&trigger, provider.trigger()));
    assert_eq!(trigger.offload_id(), provider.device().id());
    // Discovery parked one counted reference on the consumer.
    assert_eq!(trigger.consumer_refs(), 1);

    let capture = CaptureDevice::new(adc.clone());
    attach_offload_trigger(&capture, &trigger).unwrap();

    assert_eq!(capture.binding_status(), BindingStatus::Bound);
    assert!(capture
        .mode()
        .contains(CaptureMode::BUFFER_HARDWARE | CaptureMode::HARDWARE_TRIGGERED));
    assert_eq!(trigger.consumer_refs(), 2);
    assert_eq!(rig.mock.pipelines()[0].bound_to(), Some(adc.id()));

    // Consumer teardown detaches, then drops the discovery reference.
    rig.platform.remove_device(adc.id());
    assert_eq!(
        adc.release_trace(),
        vec!["detach-trigger", "put-offload-trigger"]
    );
    assert_eq!(trigger.consumer_refs(), 0);
    assert_eq!(capture.binding_status(), BindingStatus::Unbound);
    assert_eq!(rig.mock.pipelines()[0].bound_to(), None);

    // The provider never noticed; its trigger stays registered.
    assert_eq!(rig.registry.registered_count(), 1);
    assert!(rig.mock.clock().is_enabled());
}

#[test]
fn resolution_defers_until_the_provider_registers() {
    let rig = rig();
    let adc = rig.consumer("adc0");

    // The provider device does not exist yet.
    let err = resolve_offload_trigger(&rig.platform, &rig.registry, &adc).unwrap_err();
    assert!(err.is_deferred());
    assert_eq!(adc.release_mark(), 0);

    // Now it exists but has not probed.
    let engine = rig.platform.create_device(rig.engine_node).unwrap();
    let err = resolve_offload_trigger(&rig.platform, &rig.registry, &adc).unwrap_err();
    assert!(err.is_deferred());
    assert_eq!(adc.release_mark(), 0);

    // After a successful probe the same call resolves.
    OffloadTriggerProvider::probe(&engine, &rig.hal, &rig.registry, &ProviderConfig::default())
        .unwrap();
    let trigger = resolve_offload_trigger(&rig.platform, &rig.registry, &adc)
        .unwrap()
        .unwrap();
    assert_eq!(trigger.name(), "engine0-pwm-trigger");
    assert_eq!(adc.release_mark(), 1);
}

#[test]
fn foreign_trigger_is_a_mismatch_but_the_reference_still_drops() {
    let rig = rig();
    let engine = rig.platform.create_device(rig.engine_node).unwrap();

    // The engine node registered something other than an offload trigger.
    let foreign = rig
        .registry
        .create(engine.id(), "manual0", TriggerKind::Manual, Arc::new(()))
        .unwrap();
    rig.registry.register(&foreign).unwrap();

    let adc = rig.consumer("adc0");
    let err = resolve_offload_trigger(&rig.platform, &rig.registry, &adc).unwrap_err();
    match err {
        TriggerError::TypeMismatch { expected, found } => {
            assert_eq!(expected, TriggerKind::OffloadPwm);
            assert_eq!(found, TriggerKind::Manual);
        }
        other => panic!("expected kind mismatch, got {other}"),
    }

    // The counted reference taken during resolution is parked on the
    // consumer and drops at its teardown, mismatch or not.
    assert_eq!(foreign.consumer_refs(), 1);
    rig.platform.remove_device(adc.id());
    assert_eq!(adc.release_trace(), vec!["put-offload-trigger"]);
    assert_eq!(foreign.consumer_refs(), 0);
}

#[test]
fn binding_is_one_shot_and_never_reassigned() {
    let rig = rig();
    let provider = rig.probe_provider();
    let adc = rig.consumer("adc0");
    let trigger = resolve_offload_trigger(&rig.platform, &rig.registry, &adc)
        .unwrap()
        .unwrap();

    let capture = CaptureDevice::new(adc);
    attach_offload_trigger(&capture, &trigger).unwrap();

    let err = attach_offload_trigger(&capture, &trigger).unwrap_err();
    assert!(matches!(err, TriggerError::InvalidArgument(_)));

    let err = request_trigger_change(&capture, &trigger).unwrap_err();
    assert!(matches!(err, TriggerError::InvalidArgument(_)));

    // The first binding is untouched.
    assert_eq!(capture.binding_status(), BindingStatus::Bound);
    assert!(Arc::ptr_eq(
        &capture.bound_trigger().unwrap(),
        provider.trigger()
    ));
    assert_eq!(trigger.consumer_refs(), 2);
}

#[test]
fn provider_teardown_before_consumer_is_safe() {
    let rig = rig();
    let provider = rig.probe_provider();
    let adc = rig.consumer("adc0");
    let trigger = resolve_offload_trigger(&rig.platform, &rig.registry, &adc)
        .unwrap()
        .unwrap();
    let capture = CaptureDevice::new(adc.clone());
    attach_offload_trigger(&capture, &trigger).unwrap();

    // Provider goes first, with two consumer references outstanding.
    provider.teardown(&rig.platform);
    assert_eq!(rig.registry.registered_count(), 0);
    assert!(!rig.mock.clock().is_enabled());
    assert_eq!(trigger.consumer_refs(), 2);

    // The straggling consumer still reads its handle, then tears down.
    assert_eq!(trigger.name(), "engine0-pwm-trigger");
    rig.platform.remove_device(adc.id());
    assert_eq!(trigger.consumer_refs(), 0);
}

// =============================================================================
// Control Parameters
// =============================================================================

#[test]
fn params_drive_the_pacing_clock() {
    let rig = rig();
    let provider = rig.probe_provider();
    let params = trigger_params(provider.trigger());
    assert_eq!(params.len(), 1);
    let freq = &params[0];
    assert_eq!(freq.name(), "sampling_frequency");

    // Default rate from probe.
    assert_eq!(freq.get_json().unwrap(), json!(1000));

    freq.set_json(json!(250)).unwrap();
    assert_eq!(rig.mock.clock().period(), Duration::from_nanos(4_000_000));

    // Text writes parse like numbers.
    freq.set_json(json!("125")).unwrap();
    assert_eq!(freq.get_json().unwrap(), json!(125));

    // A rejected write leaves the programmed rate alone.
    assert!(freq.set_json(json!(0)).is_err());
    assert_eq!(freq.get_json().unwrap(), json!(125));

    // Reads go to hardware, not a cached value.
    rig.mock.clock().force_period(Duration::from_nanos(2_000_000));
    assert_eq!(freq.get_json().unwrap(), json!(500));
}

#[test]
fn foreign_triggers_expose_no_params() {
    let rig = rig();
    let engine = rig.platform.create_device(rig.engine_node).unwrap();
    let foreign = rig
        .registry
        .create(engine.id(), "manual0", TriggerKind::Manual, Arc::new(()))
        .unwrap();

    assert!(trigger_params(&foreign).is_empty());
}

// =============================================================================
// Driver Table
// =============================================================================

#[test]
fn driver_table_matches_engine_descriptions() {
    let rig = rig();
    let engine = rig.platform.node(rig.engine_node).unwrap();
    assert!(DRIVER_ENTRY.matches(&engine));

    let legacy = Node::new("engine1").with_compatible(COMPAT_LEGACY);
    assert!(DRIVER_ENTRY.matches(&legacy));

    let adc = Node::new("adc0").with_compatible("vendor,plain-adc");
    assert!(!DRIVER_ENTRY.matches(&adc));
}
