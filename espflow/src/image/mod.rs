//! Flash images, their layout and the registry tracking which are loaded.
//!
//! An [`ImageLayout`] fixes which roles a session expects and the flash
//! offset of each one. The [`ImageRegistry`] is created from a layout and
//! records the bytes loaded for every role; flashing is only allowed once
//! every role has bytes ([`ImageRegistry::is_complete`]).
//!
//! ## Layouts
//!
//! ```text
//! three-part              single
//! +--------+---------+    +-------------+---------+
//! | 0x0    | boot    |    | <app addr>  | app     |
//! | 0x8000 | parts   |    +-------------+---------+
//! | 0x10000| app     |
//! +--------+---------+
//! ```

pub mod archive;
pub mod loader;

use std::fmt;

use log::debug;

use crate::engine::FlashSegment;
use crate::error::{Error, Result};

/// Flash offset of the second-stage bootloader on ESP32.
pub const BOOTLOADER_ADDRESS: u32 = 0x0;

/// Flash offset of the partition table.
pub const PARTITION_TABLE_ADDRESS: u32 = 0x8000;

/// Flash offset of the factory application.
pub const APPLICATION_ADDRESS: u32 = 0x10000;

/// Logical image slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageRole {
    /// Second-stage bootloader.
    Bootloader,
    /// Partition table.
    PartitionTable,
    /// Application firmware.
    Application,
}

impl ImageRole {
    /// Human-readable label used in progress lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bootloader => "Bootloader",
            Self::PartitionTable => "Partitions",
            Self::Application => "Firmware",
        }
    }

    /// Conventional file name of this image inside a bundle.
    pub fn bundle_file_name(&self) -> &'static str {
        match self {
            Self::Bootloader => "bootloader.bin",
            Self::PartitionTable => "partitions.bin",
            Self::Application => "firmware.bin",
        }
    }

    /// Default flash offset in the three-part layout.
    pub fn default_address(&self) -> u32 {
        match self {
            Self::Bootloader => BOOTLOADER_ADDRESS,
            Self::PartitionTable => PARTITION_TABLE_ADDRESS,
            Self::Application => APPLICATION_ADDRESS,
        }
    }

    /// Parse a role from a user-supplied name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bootloader" | "boot" => Some(Self::Bootloader),
            "partitions" | "partition-table" | "partition_table" => Some(Self::PartitionTable),
            "firmware" | "application" | "app" => Some(Self::Application),
            _ => None,
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One role bound to its flash offset and bundle entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSlot {
    /// Image role.
    pub role: ImageRole,
    /// Absolute flash offset.
    pub address: u32,
    /// Entry name looked up in bundles.
    pub file_name: String,
}

impl ImageSlot {
    /// Create a slot using the role's conventional bundle name.
    pub fn new(role: ImageRole, address: u32) -> Self {
        Self {
            role,
            address,
            file_name: role.bundle_file_name().to_string(),
        }
    }
}

/// The set of roles a session expects, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    slots: Vec<ImageSlot>,
}

impl ImageLayout {
    /// Bootloader, partition table and application at 0x0, 0x8000, 0x10000.
    pub fn three_part() -> Self {
        Self {
            slots: [
                ImageRole::Bootloader,
                ImageRole::PartitionTable,
                ImageRole::Application,
            ]
            .into_iter()
            .map(|role| ImageSlot::new(role, role.default_address()))
            .collect(),
        }
    }

    /// A single application image at `address`.
    pub fn single(address: u32) -> Self {
        Self {
            slots: vec![ImageSlot::new(ImageRole::Application, address)],
        }
    }

    /// All slots in configuration order.
    pub fn slots(&self) -> &[ImageSlot] {
        &self.slots
    }

    /// Look up the slot for a role.
    pub fn slot(&self, role: ImageRole) -> Option<&ImageSlot> {
        self.slots.iter().find(|s| s.role == role)
    }
}

impl Default for ImageLayout {
    fn default() -> Self {
        Self::three_part()
    }
}

/// One binary destined for a fixed flash offset.
#[derive(Debug, Clone)]
pub struct FlashImage {
    slot: ImageSlot,
    bytes: Option<Vec<u8>>,
    source: Option<String>,
}

impl FlashImage {
    fn empty(slot: ImageSlot) -> Self {
        Self {
            slot,
            bytes: None,
            source: None,
        }
    }

    /// Image role.
    pub fn role(&self) -> ImageRole {
        self.slot.role
    }

    /// Flash offset.
    pub fn address(&self) -> u32 {
        self.slot.address
    }

    /// Bundle entry name for this image.
    pub fn file_name(&self) -> &str {
        &self.slot.file_name
    }

    /// Loaded bytes, if any.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    /// Where the bytes came from (file path or archive entry).
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Whether bytes have been loaded.
    pub fn is_loaded(&self) -> bool {
        self.bytes.is_some()
    }

    /// Loaded size in bytes (0 when absent).
    pub fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, Vec::len)
    }

    /// Whether no bytes are loaded or the image is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds the images awaited for a session.
#[derive(Debug, Clone)]
pub struct ImageRegistry {
    layout: ImageLayout,
    images: Vec<FlashImage>,
}

impl ImageRegistry {
    /// Create an empty registry for a layout.
    pub fn new(layout: ImageLayout) -> Self {
        let images = layout
            .slots()
            .iter()
            .cloned()
            .map(FlashImage::empty)
            .collect();
        Self { layout, images }
    }

    /// The layout this registry was built from.
    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    /// Store bytes for a role, replacing any previous buffer.
    pub fn set_image(
        &mut self,
        role: ImageRole,
        bytes: Vec<u8>,
        source: impl Into<String>,
    ) -> Result<&FlashImage> {
        let image = self
            .images
            .iter_mut()
            .find(|i| i.role() == role)
            .ok_or(Error::UnknownRole(role))?;

        debug!(
            "Loaded {} ({} bytes) for 0x{:X}",
            role,
            bytes.len(),
            image.address()
        );
        image.bytes = Some(bytes);
        image.source = Some(source.into());
        Ok(image)
    }

    /// True iff every role in the layout has bytes.
    pub fn is_complete(&self) -> bool {
        !self.images.is_empty() && self.images.iter().all(FlashImage::is_loaded)
    }

    /// Clear every role.
    pub fn reset(&mut self) {
        for image in &mut self.images {
            image.bytes = None;
            image.source = None;
        }
    }

    /// Replace the layout (input mode switch); all roles start empty.
    pub fn switch_layout(&mut self, layout: ImageLayout) {
        *self = Self::new(layout);
    }

    /// Look up an image by role.
    pub fn get(&self, role: ImageRole) -> Option<&FlashImage> {
        self.images.iter().find(|i| i.role() == role)
    }

    /// All images in configuration order.
    pub fn images(&self) -> &[FlashImage] {
        &self.images
    }

    /// Roles that still have no bytes.
    pub fn missing_roles(&self) -> Vec<ImageRole> {
        self.images
            .iter()
            .filter(|i| !i.is_loaded())
            .map(FlashImage::role)
            .collect()
    }

    /// Loaded images as (address, bytes) segments sorted by ascending address.
    pub fn to_ordered_list(&self) -> Vec<FlashSegment<'_>> {
        let mut segments: Vec<FlashSegment<'_>> = self
            .images
            .iter()
            .filter_map(|image| {
                image.bytes().map(|data| FlashSegment {
                    role: image.role(),
                    address: image.address(),
                    data,
                })
            })
            .collect();
        segments.sort_by_key(|s| s.address);
        segments
    }

    /// Total number of loaded bytes.
    pub fn total_bytes(&self) -> usize {
        self.images.iter().map(FlashImage::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_part_layout_addresses() {
        let layout = ImageLayout::three_part();
        let addrs: Vec<u32> = layout.slots().iter().map(|s| s.address).collect();
        assert_eq!(addrs, vec![0x0, 0x8000, 0x10000]);
        assert_eq!(
            layout.slot(ImageRole::Application).map(|s| s.file_name.as_str()),
            Some("firmware.bin")
        );
    }

    #[test]
    fn test_role_from_name() {
        assert_eq!(ImageRole::from_name("BOOT"), Some(ImageRole::Bootloader));
        assert_eq!(
            ImageRole::from_name("partition-table"),
            Some(ImageRole::PartitionTable)
        );
        assert_eq!(ImageRole::from_name("app"), Some(ImageRole::Application));
        assert_eq!(ImageRole::from_name("ota"), None);
    }

    #[test]
    fn test_registry_complete_only_when_all_roles_set() {
        let mut registry = ImageRegistry::new(ImageLayout::three_part());
        assert!(!registry.is_complete());

        registry.set_image(ImageRole::Application, vec![3; 8], "a").unwrap();
        registry.set_image(ImageRole::Bootloader, vec![1; 8], "b").unwrap();
        assert!(!registry.is_complete());
        assert_eq!(registry.missing_roles(), vec![ImageRole::PartitionTable]);

        registry.set_image(ImageRole::PartitionTable, vec![2; 8], "p").unwrap();
        assert!(registry.is_complete());
    }

    #[test]
    fn test_set_image_replaces_previous_buffer() {
        let mut registry = ImageRegistry::new(ImageLayout::single(0x0));
        registry.set_image(ImageRole::Application, vec![1; 4], "old.bin").unwrap();
        registry.set_image(ImageRole::Application, vec![2; 2], "new.bin").unwrap();

        let image = registry.get(ImageRole::Application).unwrap();
        assert_eq!(image.bytes(), Some(&[2u8, 2][..]));
        assert_eq!(image.source(), Some("new.bin"));
    }

    #[test]
    fn test_set_image_rejects_role_outside_layout() {
        let mut registry = ImageRegistry::new(ImageLayout::single(0x1000));
        let err = registry
            .set_image(ImageRole::Bootloader, vec![0; 4], "boot.bin")
            .unwrap_err();
        assert!(matches!(err, Error::UnknownRole(ImageRole::Bootloader)));
    }

    #[test]
    fn test_reset_clears_all_roles() {
        let mut registry = ImageRegistry::new(ImageLayout::three_part());
        for role in [
            ImageRole::Bootloader,
            ImageRole::PartitionTable,
            ImageRole::Application,
        ] {
            registry.set_image(role, vec![0xAA; 16], "x").unwrap();
        }
        assert!(registry.is_complete());

        registry.reset();
        assert!(!registry.is_complete());
        assert_eq!(registry.total_bytes(), 0);
        assert_eq!(registry.missing_roles().len(), 3);
    }

    #[test]
    fn test_ordered_list_sorted_regardless_of_assignment_order() {
        let mut registry = ImageRegistry::new(ImageLayout::three_part());
        registry.set_image(ImageRole::Application, vec![3], "fw").unwrap();
        registry.set_image(ImageRole::PartitionTable, vec![2], "pt").unwrap();
        registry.set_image(ImageRole::Bootloader, vec![1], "bl").unwrap();

        let list = registry.to_ordered_list();
        let addrs: Vec<u32> = list.iter().map(|s| s.address).collect();
        assert_eq!(addrs, vec![0x0, 0x8000, 0x10000]);
        assert_eq!(list[0].data, &[1u8][..]);
        assert_eq!(list[2].role, ImageRole::Application);
    }

    #[test]
    fn test_single_layout_ordered_list() {
        let mut registry = ImageRegistry::new(ImageLayout::single(0x2000));
        registry.set_image(ImageRole::Application, vec![9; 3], "app").unwrap();
        let list = registry.to_ordered_list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].address, 0x2000);
    }

    #[test]
    fn test_switch_layout_starts_empty() {
        let mut registry = ImageRegistry::new(ImageLayout::single(0x0));
        registry.set_image(ImageRole::Application, vec![1], "a").unwrap();
        registry.switch_layout(ImageLayout::three_part());
        assert_eq!(registry.images().len(), 3);
        assert!(registry.images().iter().all(|i| !i.is_loaded()));
    }
}
