//! Configuration file support for espflow.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ESPFLOW_*)
//! 3. Local config file (./espflow.toml or ./espflow_ports.toml)
//! 4. Global config file (~/.config/espflow/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
const LOCAL_CONFIG: &str = "espflow.toml";

/// Local ports file name.
const LOCAL_PORTS: &str = "espflow_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Progress log step in percent.
    pub checkpoint: Option<u8>,
    /// Erase the whole chip before writing.
    #[serde(default)]
    pub erase_all: bool,
    /// Offset used in single-image mode.
    pub app_address: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        if let Some(ports_config) = Self::load_ports_config() {
            config.port = ports_config;
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    fn load_ports_file(path: &Path) -> Option<PortConfig> {
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => {
                debug!("Loaded ports config from {}", path.display());
                Some(config)
            },
            Err(e) => {
                warn!("Failed to parse ports file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Load ports configuration, local file first.
    fn load_ports_config() -> Option<PortConfig> {
        Self::load_ports_file(Path::new(LOCAL_PORTS)).or_else(|| {
            Self::global_config_dir().and_then(|dir| Self::load_ports_file(&dir.join("ports.toml")))
        })
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "espflow").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        self.port.usb_device.extend(other.port.usb_device);

        if other.flash.checkpoint.is_some() {
            self.flash.checkpoint = other.flash.checkpoint;
        }
        if other.flash.erase_all {
            self.flash.erase_all = true;
        }
        if other.flash.app_address.is_some() {
            self.flash.app_address = other.flash.app_address;
        }
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        // Local file when the project already has one, global otherwise
        let path = if Path::new(LOCAL_PORTS).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS)
        };

        self.port.usb_device.push(device);

        let content = toml::to_string_pretty(&self.port)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}
