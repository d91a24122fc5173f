//! Example Simulator
//!
//! Opens a shmem interface, prints its VILLAS node configuration and then
//! publishes a rotating phasor every millisecond while applying whatever the
//! consumer sends back.
//!
//!   cargo run --example simulator > node.json
//!   villas-shmem monitor node.json

use std::time::{Duration, Instant};
use villas_shmem::{AttributeMode, AttributeValue, Interface, InterfaceOptions, ShmemError};

fn main() {
    let options = InterfaceOptions {
        queue_len: 1024,
        sample_len: 4,
        polling: true,
    };

    let mut iface = match Interface::new("/villas0-out", "/villas0-in", options) {
        Ok(iface) => iface,
        Err(e) => {
            eprintln!("[Simulator] Invalid interface: {}", e);
            std::process::exit(1);
        }
    };

    let registered = iface
        .export_attribute("v_t.comp_current", 0, AttributeMode::Complex, 1.0)
        .and_then(|_| iface.export_attribute("v_t.comp_current", 2, AttributeMode::Polar, 1.0))
        .and_then(|_| iface.import_attribute("v_t.voltage_ref", 0, AttributeMode::Complex, 1.0));
    if let Err(e) = registered {
        eprintln!("[Simulator] Failed to register attributes: {}", e);
        std::process::exit(1);
    }

    let channels = match iface.open_channels() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[Simulator] Failed to open channels: {}", e);
            std::process::exit(1);
        }
    };

    match iface.describe().and_then(|config| config.to_json_pretty()) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("[Simulator] Failed to describe interface: {}", e);
            std::process::exit(1);
        }
    }

    let start = Instant::now();
    let mut voltage_ref = (0.0f64, 0.0f64);

    loop {
        let t = start.elapsed().as_secs_f64();
        let (sin, cos) = (2.0 * std::f64::consts::PI * 50.0 * t).sin_cos();
        let current = AttributeValue::Complex {
            re: voltage_ref.0 + cos,
            im: voltage_ref.1 + sin,
        };

        // Nobody is draining the queue yet
        match channels.publish(|_| current) {
            Ok(_) | Err(ShmemError::QueueFull) => {}
            Err(e) => eprintln!("[Simulator] Publish failed: {}", e),
        }

        match channels.apply_imports(|_, value| {
            if let AttributeValue::Complex { re, im } = value {
                voltage_ref = (re, im);
            }
        }) {
            Ok(_) => {}
            Err(e) => {
                eprintln!("[Simulator] Consumer left: {}", e);
                break;
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
