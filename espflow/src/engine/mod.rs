//! Flashing engine abstraction.
//!
//! The ROM bootloader protocol itself (sync, stub upload, compressed block
//! writes) lives behind [`FlashEngine`]. The session controller only drives
//! the engine through this trait, so a real device and a test double are
//! interchangeable.

#[cfg(feature = "native")]
pub mod espflash;

use crate::error::Result;
use crate::image::ImageRole;

/// One image ready to be written, borrowed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashSegment<'a> {
    /// Role of the image.
    pub role: ImageRole,
    /// Absolute flash offset.
    pub address: u32,
    /// Image contents.
    pub data: &'a [u8],
}

/// Options for a write pass.
///
/// Flash size, mode and frequency are always left as found in the image
/// headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteOptions {
    /// Erase the whole chip before writing.
    pub erase_all: bool,
    /// Send compressed blocks. The espflash engine only supports `true`.
    pub compress: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            erase_all: false,
            compress: true,
        }
    }
}

/// Progress callback: `(image_index, bytes_written, bytes_total)`.
pub type WriteProgress<'a> = dyn FnMut(usize, usize, usize) + 'a;

/// Operations a flashing engine must provide.
pub trait FlashEngine {
    /// Perform the bootloader handshake and return the detected chip name.
    fn connect(&mut self) -> Result<String>;

    /// Query the flash chip and return a description of its size.
    fn flash_id(&mut self) -> Result<String>;

    /// Write `segments` in order, reporting progress per segment.
    fn write_flash(
        &mut self,
        segments: &[FlashSegment<'_>],
        options: &WriteOptions,
        progress: &mut WriteProgress<'_>,
    ) -> Result<()>;

    /// Release the transport.
    fn disconnect(&mut self) -> Result<()>;
}
