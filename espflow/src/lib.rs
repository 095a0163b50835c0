//! # espflow
//!
//! A library for flashing ESP32 boards over a serial port.
//!
//! The crate models the whole workflow a user goes through:
//!
//! - Loading images, either one file per role or a zip bundle
//! - Keeping track of which images are loaded and where they go in flash
//! - Connecting to a board and identifying its chip
//! - Writing all images in address order, with throttled progress reporting
//!
//! The bootloader protocol is delegated to a [`FlashEngine`]. With the
//! `native` feature the engine is backed by the `espflash` crate.
//!
//! ## Features
//!
//! - `native` (default): serial port discovery and the `espflash` engine
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use espflow::{Controller, ImageLayout, ManualFiles, ImageRole, SessionOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let host = espflow::NativeHost::new(espflow::auto_detect_port);
//!         let mut controller =
//!             Controller::new(host, ImageLayout::three_part(), SessionOptions::default());
//!
//!         controller.load(
//!             &ManualFiles::new()
//!                 .with(ImageRole::Bootloader, "bootloader.bin")
//!                 .with(ImageRole::PartitionTable, "partitions.bin")
//!                 .with(ImageRole::Application, "firmware.bin"),
//!         )?;
//!         controller.connect()?;
//!         controller.start_flash(&mut |event| {
//!             println!("{}: {}%", event.label, event.percent);
//!         })?;
//!         controller.disconnect();
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod engine;
pub mod error;
pub mod host;
pub mod image;
pub mod progress;
pub mod session;

#[cfg(feature = "native")]
pub use engine::espflash::EspflashEngine;
#[cfg(feature = "native")]
pub use host::NativeHost;
pub use {
    device::{DetectedPort, DeviceKind},
    engine::{FlashEngine, FlashSegment, WriteOptions},
    error::{Error, Result},
    host::{SerialHost, auto_detect_port, discover_esp_ports, discover_ports},
    image::{
        FlashImage, ImageLayout, ImageRegistry, ImageRole, ImageSlot,
        archive::MissingEntry,
        loader::{ArchiveBundle, ImageSource, LoadReport, LoadedImage, ManualFiles, read_binary},
    },
    progress::{ProgressEvent, ProgressReporter},
    session::{
        ConnectionState, Controller, DeviceSession, FlashOutcome, FlashState, LogEntry,
        Rejection, SessionLog, SessionOptions, SessionState, Severity, StepStatus, WorkflowStep,
    },
};
