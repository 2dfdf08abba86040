//! Emergency-stop watcher.
//!
//! A physical stop button sits on a serial line; any received line halts
//! every manipulator. The watcher runs as its own task for the life of the
//! process, independent of client sessions, and never crashes the server:
//! a missing port disables the feature with a warning.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, Duration};
use tokio_serial::{SerialPortBuilderExt, SerialPortType};
use tracing::{info, warn};

use crate::options::AUTO_SERIAL;
use crate::platform::Platform;

const BAUD_RATE: u32 = 9_600;

/// Resolve the `--serial` value to a concrete port name. `auto` scans for
/// the first USB serial device that looks like the stop button's Arduino.
fn resolve_port(spec: &str) -> Option<String> {
    if spec != AUTO_SERIAL {
        return Some(spec.to_string());
    }
    for port in tokio_serial::available_ports().ok()? {
        if let SerialPortType::UsbPort(usb) = &port.port_type {
            let product = usb.product.as_deref().unwrap_or("");
            if product.contains("Arduino") || product.contains("USB Serial") {
                return Some(port.port_name);
            }
        }
    }
    None
}

pub async fn start_estop_watcher(port_spec: String, platform: Arc<Platform>) {
    let port_name = match resolve_port(&port_spec) {
        Some(name) => name,
        None => {
            warn!("E-stop: no serial port matching '{port_spec}' — emergency stop disabled");
            return;
        }
    };

    let stream = match tokio_serial::new(&port_name, BAUD_RATE).open_native_async() {
        Ok(stream) => {
            info!("🛑 Emergency stop watching serial port {port_name}");
            stream
        }
        Err(e) => {
            warn!("E-stop: could not open {port_name}: {e} — emergency stop disabled");
            return;
        }
    };

    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(_)) => {
                warn!("EMERGENCY STOP — stopping all manipulators");
                let response = platform.stop_all().await;
                if !response.error.is_empty() {
                    warn!("Emergency stop: {}", response.error);
                }
            }
            Ok(None) => {
                warn!("E-stop serial line closed");
                return;
            }
            Err(e) => {
                warn!("E-stop serial read error: {e}");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_ports_pass_through_unchanged() {
        assert_eq!(resolve_port("COM3").as_deref(), Some("COM3"));
        assert_eq!(resolve_port("/dev/ttyACM0").as_deref(), Some("/dev/ttyACM0"));
    }
}
