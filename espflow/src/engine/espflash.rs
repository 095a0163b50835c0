//! [`FlashEngine`] backed by the `espflash` crate.

use std::borrow::Cow;
use std::time::Duration;

use espflash::connection::{Connection, ResetAfterOperation, ResetBeforeOperation};
use espflash::flasher::Flasher;
use espflash::image_format::Segment;
use espflash::target::ProgressCallbacks;
use log::{debug, info};

use super::{FlashEngine, FlashSegment, WriteOptions, WriteProgress};
use crate::device::DetectedPort;
use crate::error::{Error, Result};

/// Baud rate of the ROM bootloader before any speed change.
pub const ROM_BAUD: u32 = 115_200;

/// Read timeout of the serial port.
const PORT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Engine talking to a real board over a native serial port.
pub struct EspflashEngine {
    port_name: String,
    baud_rate: u32,
    connection: Option<Connection>,
    flasher: Option<Flasher>,
}

impl EspflashEngine {
    /// Open `port` at the ROM baud rate. `baud_rate` is applied after the
    /// handshake when it differs from [`ROM_BAUD`].
    pub fn open(port: &DetectedPort, baud_rate: u32) -> Result<Self> {
        debug!("Opening {} at {ROM_BAUD} baud", port.name);
        let serial = serialport::new(&port.name, ROM_BAUD)
            .timeout(PORT_TIMEOUT)
            .open_native()?;

        let usb_info = serialport::UsbPortInfo {
            vid: port.vid.unwrap_or(0),
            pid: port.pid.unwrap_or(0),
            serial_number: port.serial.clone(),
            manufacturer: port.manufacturer.clone(),
            product: port.product.clone(),
        };

        let connection = Connection::new(
            serial,
            usb_info,
            ResetAfterOperation::HardReset,
            ResetBeforeOperation::DefaultReset,
            ROM_BAUD,
        );

        Ok(Self {
            port_name: port.name.clone(),
            baud_rate,
            connection: Some(connection),
            flasher: None,
        })
    }

    fn flasher(&mut self) -> Result<&mut Flasher> {
        self.flasher
            .as_mut()
            .ok_or_else(|| Error::ConnectionFailed("not connected".to_string()))
    }
}

impl FlashEngine for EspflashEngine {
    fn connect(&mut self) -> Result<String> {
        let connection = self.connection.take().ok_or_else(|| {
            Error::ConnectionFailed(format!("{} was already used; reopen the port", self.port_name))
        })?;

        info!("Connecting to {}...", self.port_name);
        let speed = (self.baud_rate != ROM_BAUD).then_some(self.baud_rate);
        let flasher = Flasher::connect(connection, true, true, false, None, speed)
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let chip = flasher.chip().to_string().to_uppercase();
        info!("Chip detected: {chip}");
        self.flasher = Some(flasher);
        Ok(chip)
    }

    fn flash_id(&mut self) -> Result<String> {
        let info = self
            .flasher()?
            .device_info()
            .map_err(|e| Error::FlashWrite(e.to_string()))?;
        debug!(
            "Device: {} rev {:?}, features: {}",
            info.chip,
            info.revision,
            info.features.join(", ")
        );
        Ok(info.flash_size.to_string())
    }

    fn write_flash(
        &mut self,
        segments: &[FlashSegment<'_>],
        options: &WriteOptions,
        progress: &mut WriteProgress<'_>,
    ) -> Result<()> {
        check_options(options)?;

        let flasher = self.flasher()?;
        if options.erase_all {
            info!("Erasing entire flash...");
            flasher
                .erase_flash()
                .map_err(|e| Error::FlashWrite(e.to_string()))?;
        }

        let espflash_segments: Vec<Segment<'_>> = segments
            .iter()
            .map(|s| Segment {
                addr: s.address,
                data: Cow::Borrowed(s.data),
            })
            .collect();

        let mut adapter = SegmentProgress::new(segments, progress);
        flasher
            .write_bins_to_flash(&espflash_segments, &mut adapter)
            .map_err(|e| Error::FlashWrite(e.to_string()))
    }

    fn disconnect(&mut self) -> Result<()> {
        debug!("Releasing {}", self.port_name);
        self.flasher = None;
        self.connection = None;
        Ok(())
    }
}

/// espflash always deflates its write blocks.
fn check_options(options: &WriteOptions) -> Result<()> {
    if options.compress {
        Ok(())
    } else {
        Err(Error::Unsupported(
            "uncompressed writes are not available with espflash".to_string(),
        ))
    }
}

/// Maps espflash's per-address block counters onto
/// `(image_index, bytes_written, bytes_total)`.
struct SegmentProgress<'p, 'f> {
    layout: Vec<(u32, usize)>,
    index: usize,
    blocks: usize,
    progress: &'p mut WriteProgress<'f>,
}

impl<'p, 'f> SegmentProgress<'p, 'f> {
    fn new(segments: &[FlashSegment<'_>], progress: &'p mut WriteProgress<'f>) -> Self {
        Self {
            layout: segments.iter().map(|s| (s.address, s.data.len())).collect(),
            index: 0,
            blocks: 0,
            progress,
        }
    }

    fn segment_len(&self) -> usize {
        self.layout.get(self.index).map_or(0, |(_, len)| *len)
    }
}

impl ProgressCallbacks for SegmentProgress<'_, '_> {
    fn init(&mut self, addr: u32, total: usize) {
        if let Some(index) = self.layout.iter().position(|(a, _)| *a == addr) {
            self.index = index;
        }
        self.blocks = total;
        let len = self.segment_len();
        (self.progress)(self.index, 0, len);
    }

    fn update(&mut self, current: usize) {
        let len = self.segment_len();
        let written = if self.blocks == 0 {
            len
        } else {
            (current.min(self.blocks) * len) / self.blocks
        };
        (self.progress)(self.index, written, len);
    }

    fn verifying(&mut self) {
        debug!("Verifying segment {}", self.index + 1);
    }

    fn finish(&mut self, skipped: bool) {
        if skipped {
            debug!("Segment {} already up to date", self.index + 1);
        }
        let len = self.segment_len();
        (self.progress)(self.index, len, len);
    }
}
