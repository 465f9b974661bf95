//! Serial port discovery and setup

use std::collections::BTreeMap;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::debug;

use super::ProtocolError;

/// A serial port the changer may be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path, e.g. `/dev/ttyACM0`
    pub name: String,
    /// USB vendor and product id, when the port is a USB device
    pub usb_id: Option<(u16, u16)>,
    /// USB product string
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            usb_id: None,
            product: None,
        }
    }

    /// The changer enumerates as a CDC-ACM device
    pub fn is_cdc_acm(&self) -> bool {
        basename(&self.name).starts_with("ttyACM")
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn serial_error(e: serialport::Error) -> ProtocolError {
    ProtocolError::SerialError(e.to_string())
}

/// ttyACM* before ttyUSB* before anything else, numerically within a family
fn rank(name: &str) -> (u8, usize, String) {
    let base = basename(name);
    for (family, prefix) in [(0, "ttyACM"), (1, "ttyUSB")] {
        if let Some(n) = base.strip_prefix(prefix) {
            return (family, n.parse().unwrap_or(usize::MAX), base.to_string());
        }
    }
    (2, 0, base.to_string())
}

/// Ports visible to the OS, most likely changer first
pub fn list_ports() -> Vec<PortInfo> {
    let mut found: BTreeMap<String, PortInfo> = BTreeMap::new();

    for info in serialport::available_ports().unwrap_or_default() {
        let (usb_id, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (Some((usb.vid, usb.pid)), usb.product),
            _ => (None, None),
        };
        found.insert(
            info.port_name.clone(),
            PortInfo {
                name: info.port_name,
                usb_id,
                product,
            },
        );
    }

    // udev may lag behind /dev right after the changer resets
    #[cfg(target_os = "linux")]
    if let Ok(entries) = std::fs::read_dir("/dev") {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("ttyACM") || name.starts_with("ttyUSB") {
                let path = format!("/dev/{}", name);
                found
                    .entry(path.clone())
                    .or_insert_with(|| PortInfo::bare(path));
            }
        }
    }

    let mut ports: Vec<PortInfo> = found.into_values().collect();
    ports.sort_by_key(|p| rank(&p.name));
    ports
}

/// Open `name` as 8N1 without flow control and drop anything buffered
pub fn open_port(
    name: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let mut port = serialport::new(name, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(serial_error)?;

    // dropping DTR resets the changer
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!("could not raise DTR on {}: {}", name, e);
    }
    port.clear(ClearBuffer::All).map_err(serial_error)?;
    Ok(port)
}
