//! Image bundles packaged as zip archives.
//!
//! A bundle carries one entry per layout slot, looked up by file name
//! (`bootloader.bin`, `partitions.bin`, `firmware.bin`). Entries may sit in
//! a sub-directory; only the final path component is compared, ignoring case.
//! Absent entries do not fail extraction: each one is reported as a
//! [`MissingEntry`] so the caller can decide how to proceed.

use std::io::{Cursor, Read};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::image::loader::MAX_IMAGE_SIZE;
use crate::image::{ImageRole, ImageSlot};

/// An expected entry that was not found in the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingEntry {
    /// Role the entry would have filled.
    pub role: ImageRole,
    /// Expected entry name.
    pub entry: String,
}

/// One image extracted from a bundle.
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    /// Role the entry fills.
    pub role: ImageRole,
    /// Full entry path inside the archive.
    pub entry: String,
    /// Decompressed contents.
    pub data: Vec<u8>,
}

/// Result of extracting a bundle.
#[derive(Debug, Clone, Default)]
pub struct ArchiveContents {
    /// Entries found, in slot order.
    pub images: Vec<ExtractedImage>,
    /// Entries that were expected but absent.
    pub missing: Vec<MissingEntry>,
}

impl ArchiveContents {
    /// Whether every expected entry was present.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

fn entry_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Extract the entries named by `slots` from zip-encoded `bytes`.
pub fn extract_images(bytes: &[u8], slots: &[ImageSlot]) -> Result<ArchiveContents> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    debug!("Bundle has {} entries", archive.len());

    // Map each slot to the index of its entry, first match wins.
    let mut found: Vec<Option<usize>> = vec![None; slots.len()];
    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }
        let name = entry_file_name(file.name());
        trace!("Entry {index}: {}", file.name());

        for (slot, hit) in slots.iter().zip(found.iter_mut()) {
            if hit.is_none() && name.eq_ignore_ascii_case(&slot.file_name) {
                *hit = Some(index);
            }
        }
    }

    let mut contents = ArchiveContents::default();
    for (slot, hit) in slots.iter().zip(found) {
        let Some(index) = hit else {
            debug!("Bundle has no {}", slot.file_name);
            contents.missing.push(MissingEntry {
                role: slot.role,
                entry: slot.file_name.clone(),
            });
            continue;
        };

        let mut file = archive.by_index(index)?;
        let entry = file.name().to_string();
        if file.size() > MAX_IMAGE_SIZE {
            return Err(Error::FileTooLarge {
                name: entry,
                size: file.size(),
                limit: MAX_IMAGE_SIZE,
            });
        }

        // Sizes in the central directory are untrusted; cap the actual read too.
        let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.by_ref()
            .take(MAX_IMAGE_SIZE + 1)
            .read_to_end(&mut data)?;
        if data.len() as u64 > MAX_IMAGE_SIZE {
            return Err(Error::FileTooLarge {
                name: entry,
                size: data.len() as u64,
                limit: MAX_IMAGE_SIZE,
            });
        }

        debug!("Extracted {entry} ({} bytes) for {}", data.len(), slot.role);
        contents.images.push(ExtractedImage {
            role: slot.role,
            entry,
            data,
        });
    }

    Ok(contents)
}
