use std::thread;
use std::time::Duration;
use villas_shmem::{
    AttributeMode, AttributeValue, Interface, InterfaceConfig, InterfaceOptions, ShmemError,
    ShmemTransport,
};

fn options(polling: bool) -> InterfaceOptions {
    InterfaceOptions {
        queue_len: 16,
        sample_len: 4,
        polling,
    }
}

#[test]
fn simulator_and_consumer_exchange_samples() {
    let mut iface = Interface::new("/villas_e2e_out", "/villas_e2e_in", options(true)).unwrap();
    iface.export_attribute("evs.comp_current", 0, AttributeMode::Complex, 1.0).unwrap();
    iface.export_attribute("n1.voltage", 2, AttributeMode::Real, 2.0).unwrap();
    iface.import_attribute("evs.voltage_ref", 0, AttributeMode::Complex, 1.0).unwrap();

    let sim = iface.open_channels().unwrap();

    // The consumer only sees the descriptor, as a VILLAS node would
    let json = iface.describe().unwrap().to_json().unwrap();
    let config = InterfaceConfig::from_json(&json).unwrap();
    let consumer = ShmemTransport::connect(&config).unwrap();

    assert_eq!(
        consumer.signals(),
        ["evs.comp_current.real", "evs.comp_current.imag", "n1.voltage"]
    );

    // simulator -> consumer
    let seq = sim
        .publish(|export| match export.mode() {
            AttributeMode::Real => AttributeValue::Real(115.0),
            _ => AttributeValue::Complex { re: 1.0, im: -1.0 },
        })
        .unwrap();
    assert_eq!(seq, 0);

    let sample = consumer.recv().unwrap().unwrap();
    assert_eq!(sample.sequence, 0);
    assert_eq!(sample.values, vec![1.0, -1.0, 230.0, 0.0]);
    assert!(consumer.recv().unwrap().is_none());

    // consumer -> simulator
    assert!(!sim.apply_imports(|_, _| panic!("nothing was sent")).unwrap());
    consumer.send(&[10.0, 5.0, 0.0, 0.0]).unwrap();

    let mut applied = Vec::new();
    assert!(sim
        .apply_imports(|import, value| applied.push((import.attribute().to_string(), value)))
        .unwrap());
    assert_eq!(
        applied,
        vec![(
            "evs.voltage_ref".to_string(),
            AttributeValue::Complex { re: 10.0, im: 5.0 }
        )]
    );
}

#[test]
fn blocking_consumer_waits_for_simulator() {
    let mut iface = Interface::new("/villas_e2e_block_out", "/villas_e2e_block_in", options(false)).unwrap();
    iface.export_attribute("x", 0, AttributeMode::Real, 1.0).unwrap();

    let sim = iface.open_channels().unwrap();
    let transport = ShmemTransport::connect(&iface.describe().unwrap()).unwrap();

    let consumer = thread::spawn(move || {
        let mut received = Vec::new();
        loop {
            match transport.recv() {
                Ok(Some(sample)) => received.push(sample.values[0]),
                Ok(None) => unreachable!("blocking reader returned without a sample"),
                Err(ShmemError::ChannelClosed(_)) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        received
    });

    for step in 0..5 {
        thread::sleep(Duration::from_millis(5));
        sim.publish(|_| AttributeValue::Real(step as f64)).unwrap();
    }
    drop(sim);

    assert_eq!(consumer.join().unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn consumer_cannot_attach_before_simulator() {
    let config = InterfaceConfig::new("/villas_e2e_missing_out", "/villas_e2e_missing_in", vec![], true, 4, 4)
        .unwrap();
    assert!(matches!(
        ShmemTransport::connect(&config),
        Err(ShmemError::ShmOpen { .. })
    ));
}
