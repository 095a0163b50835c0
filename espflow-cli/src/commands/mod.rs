//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod inspect;
pub(crate) mod ports;

use {
    crate::{CliError, config::Config, parse_hex_u32},
    clap::Args,
    espflow::{
        ArchiveBundle, ImageLayout, ImageRole, ImageSource, ManualFiles,
        image::APPLICATION_ADDRESS,
    },
    rust_i18n::t,
    std::path::PathBuf,
};

/// Where the images come from.
///
/// Exactly one mode is used: the three separate files, a zip bundle or a
/// single application image.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct ImageArgs {
    /// Bootloader image, written at 0x0.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["bundle", "image"])]
    pub(crate) bootloader: Option<PathBuf>,

    /// Partition table image, written at 0x8000.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["bundle", "image"])]
    pub(crate) partitions: Option<PathBuf>,

    /// Application firmware image, written at 0x10000.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["bundle", "image"])]
    pub(crate) firmware: Option<PathBuf>,

    /// Zip bundle holding bootloader.bin, partitions.bin and firmware.bin.
    #[arg(long, value_name = "ZIP", conflicts_with = "image")]
    pub(crate) bundle: Option<PathBuf>,

    /// Single application image.
    #[arg(long, value_name = "FILE")]
    pub(crate) image: Option<PathBuf>,

    /// Flash address of --image (hex, default 0x10000).
    #[arg(long, value_parser = parse_hex_u32, requires = "image")]
    pub(crate) address: Option<u32>,
}

/// Layout plus the loader that fills it.
pub(crate) struct ImageSelection {
    pub(crate) layout: ImageLayout,
    pub(crate) source: Box<dyn ImageSource>,
}

impl ImageArgs {
    /// Resolve the arguments into a layout and a loading strategy.
    pub(crate) fn select(&self, config: &Config) -> Result<ImageSelection, CliError> {
        if let Some(bundle) = &self.bundle {
            return Ok(ImageSelection {
                layout: ImageLayout::three_part(),
                source: Box::new(ArchiveBundle::new(bundle)),
            });
        }

        if let Some(image) = &self.image {
            let address = self
                .address
                .or(config.flash.app_address)
                .unwrap_or(APPLICATION_ADDRESS);
            return Ok(ImageSelection {
                layout: ImageLayout::single(address),
                source: Box::new(ManualFiles::new().with(ImageRole::Application, image)),
            });
        }

        let files = [
            (ImageRole::Bootloader, &self.bootloader),
            (ImageRole::PartitionTable, &self.partitions),
            (ImageRole::Application, &self.firmware),
        ];
        if files.iter().all(|(_, path)| path.is_none()) {
            return Err(CliError::Usage(t!("images.none_selected").to_string()));
        }

        let source = files
            .into_iter()
            .filter_map(|(role, path)| path.as_ref().map(|p| (role, p)))
            .fold(ManualFiles::new(), |files, (role, path)| files.with(role, path));

        Ok(ImageSelection {
            layout: ImageLayout::three_part(),
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_requires_some_image() {
        let err = ImageArgs::default()
            .select(&Config::default())
            .err()
            .expect("expected usage error");
        assert!(matches!(err, CliError::Usage(_)));
    }

    #[test]
    fn test_select_bundle_uses_three_part_layout() {
        let args = ImageArgs {
            bundle: Some(PathBuf::from("build.zip")),
            ..ImageArgs::default()
        };
        let selection = args.select(&Config::default()).unwrap();
        assert_eq!(selection.layout, ImageLayout::three_part());
        assert!(selection.source.describe().contains("build.zip"));
    }

    #[test]
    fn test_select_single_image_address_precedence() {
        let mut config = Config::default();
        let args = ImageArgs {
            image: Some(PathBuf::from("app.bin")),
            ..ImageArgs::default()
        };

        let selection = args.select(&config).unwrap();
        assert_eq!(selection.layout, ImageLayout::single(APPLICATION_ADDRESS));

        config.flash.app_address = Some(0x20000);
        let selection = args.select(&config).unwrap();
        assert_eq!(selection.layout, ImageLayout::single(0x20000));

        let args = ImageArgs {
            address: Some(0x30000),
            ..args
        };
        let selection = args.select(&config).unwrap();
        assert_eq!(selection.layout, ImageLayout::single(0x30000));
    }

    #[test]
    fn test_select_partial_manual_files() {
        let args = ImageArgs {
            bootloader: Some(PathBuf::from("boot.bin")),
            firmware: Some(PathBuf::from("app.bin")),
            ..ImageArgs::default()
        };
        let selection = args.select(&Config::default()).unwrap();
        assert_eq!(selection.layout, ImageLayout::three_part());
        assert_eq!(selection.source.describe(), "boot.bin, app.bin");
    }
}
