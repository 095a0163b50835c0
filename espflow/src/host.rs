//! Host-side serial capability: port discovery, device request and engine
//! creation.

use crate::device::DetectedPort;
use crate::engine::FlashEngine;
use crate::error::Result;

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Discover serial ports that are likely ESP32 boards.
#[must_use]
pub fn discover_esp_ports() -> Vec<DetectedPort> {
    crate::device::detect_esp_ports()
}

/// Auto-detect a single best serial port candidate.
pub fn auto_detect_port() -> Result<DetectedPort> {
    crate::device::auto_detect_port()
}

/// The environment a session runs in.
///
/// Requesting a device may involve the user (a picker), so it can fail with
/// [`Error::UserCancelled`](crate::Error::UserCancelled).
pub trait SerialHost {
    /// Whether the host can talk to serial devices at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Ask for a device to connect to.
    fn request_port(&mut self) -> Result<DetectedPort>;

    /// Open a flashing engine on `port`.
    fn open(&mut self, port: &DetectedPort, baud_rate: u32) -> Result<Box<dyn FlashEngine>>;
}

/// Host backed by native serial ports and the `espflash` engine.
///
/// `picker` chooses the port; the CLI passes its interactive selector, a
/// fixed port can be passed with [`NativeHost::fixed`].
#[cfg(feature = "native")]
pub struct NativeHost<F> {
    picker: F,
}

#[cfg(feature = "native")]
impl<F> NativeHost<F>
where
    F: FnMut() -> Result<DetectedPort>,
{
    /// Create a host that asks `picker` for the port.
    pub fn new(picker: F) -> Self {
        Self { picker }
    }
}

#[cfg(feature = "native")]
impl NativeHost<Box<dyn FnMut() -> Result<DetectedPort>>> {
    /// Create a host that always uses `port`.
    pub fn fixed(port: DetectedPort) -> Self {
        Self {
            picker: Box::new(move || Ok(port.clone())),
        }
    }
}

#[cfg(feature = "native")]
impl<F> SerialHost for NativeHost<F>
where
    F: FnMut() -> Result<DetectedPort>,
{
    fn is_supported(&self) -> bool {
        serialport::available_ports().is_ok()
    }

    fn request_port(&mut self) -> Result<DetectedPort> {
        (self.picker)()
    }

    fn open(&mut self, port: &DetectedPort, baud_rate: u32) -> Result<Box<dyn FlashEngine>> {
        let engine = crate::engine::espflash::EspflashEngine::open(port, baud_rate)?;
        Ok(Box::new(engine))
    }
}
