//! Discovery runs and descriptor consumption

mod common;

use common::{all_capabilities, harness};
use hub_core::events::DevicesDiscoveredData;
use hub_core::{DeviceClassId, DeviceDescriptor, ParamList, ThingError};
use hub_devices::{ParamSource, PluginCapabilities};
use serde_json::json;

fn scanned(c: &common::Catalog, address: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(c.scanner.id, format!("Scanner at {}", address))
        .with_params(ParamList::new().with(c.address, address))
}

#[test]
fn test_discovery_then_add_from_descriptor() {
    let mut h = harness(all_capabilities());
    let c = h.catalog.clone();
    let mut discovered = h.bus.subscribe_typed::<DevicesDiscoveredData>();

    h.manager.discover_devices(c.scanner.id, ParamList::new()).unwrap();
    let info = h.plugin.take_discovery();
    assert_eq!(info.device_class_id(), c.scanner.id);
    assert_eq!(info.params().get(&c.timeout), Some(&json!(5)));

    let first = scanned(&c, "10.0.0.2");
    let second = scanned(&c, "10.0.0.3");
    let first_id = first.id;
    info.finish(ThingError::NoError, vec![first, second]);
    h.manager.process_pending();

    let discovered = discovered.drain();
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].data.status, ThingError::NoError);
    assert_eq!(discovered[0].data.descriptors.len(), 2);
    assert_eq!(h.manager.discovered_devices(&c.scanner.id).len(), 2);

    let id = h
        .manager
        .add_configured_device(c.scanner.id, "Office", ParamSource::descriptor(first_id), None)
        .unwrap();
    let device = h.manager.find_configured_device(&id).unwrap();
    assert_eq!(device.params.get(&c.address), Some(&json!("10.0.0.2")));

    // Consumed
    assert_eq!(h.manager.discovered_devices(&c.scanner.id).len(), 1);
    assert_eq!(
        h.manager.add_configured_device(
            c.scanner.id,
            "Office",
            ParamSource::descriptor(first_id),
            None
        ),
        Err(ThingError::DeviceDescriptorNotFound)
    );
}

#[test]
fn test_second_run_supersedes_first() {
    let mut h = harness(all_capabilities());
    let c = h.catalog.clone();

    h.manager.discover_devices(c.scanner.id, ParamList::new()).unwrap();
    let old = scanned(&c, "10.0.0.2");
    let old_id = old.id;
    h.plugin.take_discovery().finish(ThingError::NoError, vec![old]);
    h.manager.process_pending();

    h.manager.discover_devices(c.scanner.id, ParamList::new()).unwrap();
    assert!(h.manager.discovered_devices(&c.scanner.id).is_empty());
    let new = scanned(&c, "10.0.0.9");
    let new_id = new.id;
    h.plugin.take_discovery().finish(ThingError::NoError, vec![new]);
    h.manager.process_pending();

    assert_eq!(
        h.manager
            .add_configured_device(c.scanner.id, "Old", ParamSource::descriptor(old_id), None),
        Err(ThingError::DeviceDescriptorNotFound)
    );
    assert!(h
        .manager
        .add_configured_device(c.scanner.id, "New", ParamSource::descriptor(new_id), None)
        .is_ok());
}

#[test]
fn test_late_result_of_superseded_run_is_ignored() {
    let mut h = harness(all_capabilities());
    let c = h.catalog.clone();
    let mut discovered = h.bus.subscribe_typed::<DevicesDiscoveredData>();

    h.manager.discover_devices(c.scanner.id, ParamList::new()).unwrap();
    h.manager.discover_devices(c.scanner.id, ParamList::new()).unwrap();
    let first_run = h.plugin.take_discovery();
    let second_run = h.plugin.take_discovery();

    second_run.finish(ThingError::NoError, vec![scanned(&c, "10.0.0.9")]);
    first_run.finish(ThingError::NoError, vec![scanned(&c, "10.0.0.2")]);
    h.manager.process_pending();

    let discovered = discovered.drain();
    assert_eq!(discovered.len(), 1);
    let remaining = h.manager.discovered_devices(&c.scanner.id);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].params.get(&c.address), Some(&json!("10.0.0.9")));
}

#[test]
fn test_failed_discovery_stores_nothing() {
    let mut h = harness(all_capabilities());
    let c = h.catalog.clone();
    let mut discovered = h.bus.subscribe_typed::<DevicesDiscoveredData>();

    h.manager.discover_devices(c.scanner.id, ParamList::new()).unwrap();
    h.plugin
        .take_discovery()
        .finish(ThingError::HardwareFailure, vec![scanned(&c, "10.0.0.2")]);
    h.manager.process_pending();

    let discovered = discovered.drain();
    assert_eq!(discovered[0].data.status, ThingError::HardwareFailure);
    assert!(discovered[0].data.descriptors.is_empty());
    assert!(h.manager.discovered_devices(&c.scanner.id).is_empty());
}

#[test]
fn test_descriptors_of_other_classes_are_dropped() {
    let mut h = harness(all_capabilities());
    let c = h.catalog.clone();

    h.manager.discover_devices(c.scanner.id, ParamList::new()).unwrap();
    let stray = DeviceDescriptor::new(c.lock.id, "Not a scanner");
    h.plugin
        .take_discovery()
        .finish(ThingError::NoError, vec![stray, scanned(&c, "10.0.0.4")]);
    h.manager.process_pending();

    assert_eq!(h.manager.discovered_devices(&c.scanner.id).len(), 1);
}

#[test]
fn test_descriptor_params_can_be_overridden() {
    let mut h = harness(all_capabilities());
    let c = h.catalog.clone();

    h.manager.discover_devices(c.scanner.id, ParamList::new()).unwrap();
    let found = scanned(&c, "10.0.0.2");
    let descriptor_id = found.id;
    h.plugin.take_discovery().finish(ThingError::NoError, vec![found]);
    h.manager.process_pending();

    let id = h
        .manager
        .add_configured_device(
            c.scanner.id,
            "Office",
            ParamSource::Descriptor {
                descriptor_id,
                params: ParamList::new().with(c.address, "scanner.local"),
            },
            None,
        )
        .unwrap();
    let device = h.manager.find_configured_device(&id).unwrap();
    assert_eq!(device.params.get(&c.address), Some(&json!("scanner.local")));
}

#[test]
fn test_discovery_errors() {
    let mut h = harness(all_capabilities());
    let c = h.catalog.clone();

    assert_eq!(
        h.manager
            .discover_devices(DeviceClassId::generate(), ParamList::new()),
        Err(ThingError::ClassNotFound)
    );
    assert_eq!(
        h.manager.discover_devices(c.alarm.id, ParamList::new()),
        Err(ThingError::CreationMethodNotSupported)
    );
    assert_eq!(
        h.manager
            .discover_devices(c.scanner.id, ParamList::new().with(c.timeout, "soon")),
        Err(ThingError::InvalidParameter)
    );

    let mut plain = harness(PluginCapabilities::none());
    let c = plain.catalog.clone();
    assert_eq!(
        plain.manager.discover_devices(c.scanner.id, ParamList::new()),
        Err(ThingError::Unsupported)
    );
}
