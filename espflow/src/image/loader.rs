//! Reading image files and filling the registry.
//!
//! Two loading strategies share the [`ImageSource`] trait:
//!
//! - [`ManualFiles`]: one file per role, read as-is.
//! - [`ArchiveBundle`]: a zip bundle holding every role's image.
//!
//! Both produce a [`LoadReport`] describing what was loaded and what is
//! still missing.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::image::archive::{self, MissingEntry};
use crate::image::{ImageRegistry, ImageRole};

/// Largest image accepted, in bytes (16 MiB, the largest ESP32 flash).
pub const MAX_IMAGE_SIZE: u64 = 16 * 1024 * 1024;

/// Read a file into memory exactly as stored.
///
/// Files over [`MAX_IMAGE_SIZE`] are rejected before reading.
pub fn read_binary(path: &Path) -> Result<Vec<u8>> {
    let file_err = |source| Error::FileRead {
        path: path.to_path_buf(),
        source,
    };

    let size = fs::metadata(path).map_err(file_err)?.len();
    if size > MAX_IMAGE_SIZE {
        return Err(Error::FileTooLarge {
            name: path.display().to_string(),
            size,
            limit: MAX_IMAGE_SIZE,
        });
    }

    let data = fs::read(path).map_err(file_err)?;
    debug!("Read {} ({} bytes)", path.display(), data.len());
    Ok(data)
}

/// One image stored in the registry by a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    /// Role filled.
    pub role: ImageRole,
    /// Flash offset of the role.
    pub address: u32,
    /// Size in bytes.
    pub size: usize,
    /// File path or archive entry the bytes came from.
    pub source: String,
}

/// Outcome of loading images into a registry.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Images stored, in load order.
    pub loaded: Vec<LoadedImage>,
    /// Bundle entries that were expected but absent.
    pub missing: Vec<MissingEntry>,
}

impl LoadReport {
    /// Whether the load left no expected entry missing.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Convert missing entries into an [`Error::ArchiveEntryMissing`].
    pub fn missing_error(&self) -> Option<Error> {
        if self.missing.is_empty() {
            None
        } else {
            Some(Error::ArchiveEntryMissing {
                entries: self.missing.iter().map(|m| m.entry.clone()).collect(),
            })
        }
    }
}

/// A strategy for acquiring images.
pub trait ImageSource {
    /// Load images into `registry`.
    fn load_into(&self, registry: &mut ImageRegistry) -> Result<LoadReport>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

fn store(
    registry: &mut ImageRegistry,
    role: ImageRole,
    data: Vec<u8>,
    source: String,
) -> Result<LoadedImage> {
    let size = data.len();
    let image = registry.set_image(role, data, source.clone())?;
    Ok(LoadedImage {
        role,
        address: image.address(),
        size,
        source,
    })
}

/// Individually selected files, one per role.
#[derive(Debug, Clone, Default)]
pub struct ManualFiles {
    files: Vec<(ImageRole, PathBuf)>,
}

impl ManualFiles {
    /// Create an empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file for a role.
    #[must_use]
    pub fn with(mut self, role: ImageRole, path: impl Into<PathBuf>) -> Self {
        self.files.push((role, path.into()));
        self
    }

    /// Selected files.
    pub fn files(&self) -> &[(ImageRole, PathBuf)] {
        &self.files
    }
}

impl ImageSource for ManualFiles {
    fn load_into(&self, registry: &mut ImageRegistry) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        for (role, path) in &self.files {
            // Reject foreign roles before touching the file.
            if registry.get(*role).is_none() {
                return Err(Error::UnknownRole(*role));
            }
            let data = read_binary(path)?;
            let loaded = store(registry, *role, data, path.display().to_string())?;
            info!(
                "Loaded [0x{:X}] {} ({} bytes)",
                loaded.address, loaded.source, loaded.size
            );
            report.loaded.push(loaded);
        }
        Ok(report)
    }

    fn describe(&self) -> String {
        let names: Vec<String> = self
            .files
            .iter()
            .map(|(_, p)| p.display().to_string())
            .collect();
        names.join(", ")
    }
}

/// A zip bundle holding every image of the layout.
///
/// Loading a bundle clears the registry first: a bundle is a complete set,
/// so images from an earlier bundle must not survive.
#[derive(Debug, Clone)]
pub struct ArchiveBundle {
    path: PathBuf,
}

impl ArchiveBundle {
    /// Create a bundle source for a file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Bundle path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageSource for ArchiveBundle {
    fn load_into(&self, registry: &mut ImageRegistry) -> Result<LoadReport> {
        let bytes = read_binary(&self.path)?;
        let contents = archive::extract_images(&bytes, registry.layout().slots())?;

        registry.reset();
        let mut report = LoadReport {
            missing: contents.missing,
            ..LoadReport::default()
        };
        for image in contents.images {
            let loaded = store(registry, image.role, image.data, image.entry)?;
            info!(
                "Loaded [0x{:X}] {} ({} bytes)",
                loaded.address, loaded.source, loaded.size
            );
            report.loaded.push(loaded);
        }
        Ok(report)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
