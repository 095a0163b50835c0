//! Serial device discovery and classification.
//!
//! ESP32 boards show up either through a USB-to-UART bridge soldered on the
//! dev board or, on the S2/S3/C3/C6 families, through the chip's own USB
//! Serial/JTAG controller. Both are recognised from the USB VID/PID.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB bridge/device kinds found on ESP32 boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// CH340/CH341/CH9102 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Espressif native USB Serial/JTAG or USB-OTG CDC.
    Espressif,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x55D4, 0x55D3],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (0x0403, &[0x6001, 0x6010, 0x6014, 0x6015], DeviceKind::Ftdi),
    (0x067B, &[0x2303, 0x23A3], DeviceKind::Prolific),
    (0x303A, &[], DeviceKind::Espressif),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH9102",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Espressif => "Espressif USB",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognised kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Whether this kind should win during auto-selection.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Self::Espressif | Self::Ch340 | Self::Cp210x)
    }
}

/// Discovered serial endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedPort {
    /// Port name/path (e.g. "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// A port known only by name, without USB metadata.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Whether this endpoint is likely an ESP32 board.
    pub fn is_likely_esp(&self) -> bool {
        self.device.is_known()
    }
}

/// Enumerate serial ports with USB metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|port_info| {
            let mut detected = DetectedPort::from_name(port_info.port_name.clone());
            if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);
                detected.vid = Some(usb_info.vid);
                detected.pid = Some(usb_info.pid);
                detected.manufacturer = usb_info.manufacturer;
                detected.product = usb_info.product;
                detected.serial = usb_info.serial_number;

                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                    port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                );
            }
            detected
        })
        .collect()
}

/// Enumerate serial ports (no native serial support: always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Ports that are likely ESP32 boards.
pub fn detect_esp_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_esp)
        .collect()
}

/// Pick the best candidate among `ports`.
///
/// Native Espressif USB wins, then common bridges, then any known bridge,
/// then the first port.
pub fn pick_best_port(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    let rank = |p: &DetectedPort| match p.device {
        DeviceKind::Espressif => 0,
        kind if kind.is_high_priority() => 1,
        kind if kind.is_known() => 2,
        _ => 3,
    };

    ports
        .into_iter()
        .enumerate()
        .min_by_key(|(index, p)| (rank(p), *index))
        .map(|(_, port)| port)
        .ok_or_else(|| Error::DeviceNotFound("no serial ports found".to_string()))
}

/// Auto-detect a single ESP32 endpoint.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let port = pick_best_port(detect_ports())?;
    if port.device.is_known() {
        info!("Auto-detected {} device: {}", port.device.name(), port.name);
    } else {
        info!("Using first available port: {}", port.name);
    }
    Ok(port)
}

/// Auto-detect (no native serial support).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::NoSerialSupport)
}

/// Find a port by exact name, falling back to a substring match.
pub fn find_port(ports: &[DetectedPort], pattern: &str) -> Result<DetectedPort> {
    ports
        .iter()
        .find(|p| p.name == pattern)
        .or_else(|| ports.iter().find(|p| p.name.contains(pattern)))
        .cloned()
        .ok_or_else(|| Error::DeviceNotFound(pattern.to_string()))
}

/// Format detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}
