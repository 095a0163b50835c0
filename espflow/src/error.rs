//! Error types for espflow.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::image::ImageRole;

/// Result type for espflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for espflow operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The host has no usable serial capability.
    #[error("Serial ports are not supported in this environment")]
    NoSerialSupport,

    /// The user dismissed the device picker.
    #[error("Device selection was cancelled")]
    UserCancelled,

    /// No serial device could be found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Port selection could not be completed (for example, ambiguous choice
    /// without an interactive terminal).
    #[error("Port selection failed: {0}")]
    PortSelection(String),

    /// Handshake or chip identification failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A selected image file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    FileRead {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An image exceeds the accepted size.
    #[error("{name} is too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge {
        /// File or archive entry name.
        name: String,
        /// Actual size in bytes.
        size: u64,
        /// Accepted maximum in bytes.
        limit: u64,
    },

    /// The container could not be decoded.
    #[error("Invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Expected entries are absent from an image bundle.
    #[error("Missing from archive: {}", entries.join(", "))]
    ArchiveEntryMissing {
        /// Names of the absent entries.
        entries: Vec<String>,
    },

    /// The role is not part of the active image layout.
    #[error("Image role {0} is not part of the current layout")]
    UnknownRole(ImageRole),

    /// The flashing engine reported a failure while writing.
    #[error("Flash write failed: {0}")]
    FlashWrite(String),

    /// Unsupported operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether the user can recover by re-triggering the action.
    ///
    /// Only a missing serial capability blocks the whole session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NoSerialSupport)
    }

    /// Short tag naming the error class, used in session log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "Io",
            #[cfg(feature = "native")]
            Self::Serial(_) => "Serial",
            Self::NoSerialSupport => "NoSerialSupport",
            Self::UserCancelled => "UserCancelled",
            Self::DeviceNotFound(_) => "DeviceNotFound",
            Self::PortSelection(_) => "PortSelection",
            Self::ConnectionFailed(_) => "ConnectionFailed",
            Self::FileRead { .. } => "FileReadError",
            Self::FileTooLarge { .. } => "FileTooLarge",
            Self::Archive(_) => "InvalidArchive",
            Self::ArchiveEntryMissing { .. } => "ArchiveEntryMissing",
            Self::UnknownRole(_) => "UnknownRole",
            Self::FlashWrite(_) => "FlashWriteError",
            Self::Unsupported(_) => "Unsupported",
        }
    }
}
