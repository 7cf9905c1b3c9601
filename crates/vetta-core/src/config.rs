//! Configuration management for the flashing pipeline
//!
//! A project keeps its settings in `.vetta/flash.yaml`. Every key is
//! optional; anything left out falls back to the values the ESP8266 board
//! has always been flashed with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Directory (relative to the project root) holding tool configuration
pub const CONFIG_DIR: &str = ".vetta";

/// Name of the pipeline configuration file inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "flash.yaml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to write config {}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize config")]
    Encode(#[from] serde_yaml::Error),

    #[error("Invalid flash address: {0}")]
    InvalidAddress(String),

    #[error("IDF_PATH is not set - export it or set idf_path in .vetta/flash.yaml")]
    IdfPathMissing,

    #[error("IDF_PATH does not point to a directory: {}", .0.display())]
    IdfPathInvalid(PathBuf),

    #[error("Required tool not found in PATH: {0}")]
    ToolNotFound(String),
}

/// An address or offset in device flash, written as hex (`0x8000`) or decimal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "AddressRepr", into = "String")]
pub struct FlashAddress(pub u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<AddressRepr> for FlashAddress {
    type Error = ConfigError;

    fn try_from(repr: AddressRepr) -> Result<Self, Self::Error> {
        match repr {
            AddressRepr::Number(n) => Ok(Self(n)),
            AddressRepr::Text(s) => s.parse(),
        }
    }
}

impl From<FlashAddress> for String {
    fn from(addr: FlashAddress) -> Self {
        addr.to_string()
    }
}

impl FromStr for FlashAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => trimmed.parse::<u32>(),
        };

        parsed
            .map(Self)
            .map_err(|_| ConfigError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for FlashAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Full pipeline configuration for one firmware project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Project name; the application image is `<build_dir>/<project>.bin`
    pub project: String,
    /// ESP8266 RTOS SDK checkout (falls back to `$IDF_PATH`)
    pub idf_path: Option<PathBuf>,
    /// Python interpreter used to run esptool.py and spiffsgen.py
    pub python: String,
    /// Build output directory, relative to the project root
    pub build_dir: PathBuf,
    /// Parallel make jobs (defaults to the number of CPUs)
    pub jobs: Option<usize>,
    /// CPPFLAGS exported to the firmware build only
    pub cppflags: String,
    /// Attach the serial monitor after flashing
    pub monitor: bool,
    pub serial: SerialConfig,
    pub chip: ChipConfig,
    /// Source directory the SPIFFS image is generated from
    pub spiffs_image_dir: PathBuf,
    /// SPIFFS partition; `null` disables the image build and flash
    pub spiffs: Option<SpiffsConfig>,
    pub secret: SecretConfig,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            project: "vetta-esp8266".to_string(),
            idf_path: None,
            python: "python".to_string(),
            build_dir: PathBuf::from("build"),
            jobs: None,
            cppflags: "-DSPIFFS_OBJ_META_LEN=4 -DSPIFFS_ALIGNED_OBJECT_INDEX_TABLES=4".to_string(),
            monitor: true,
            serial: SerialConfig::default(),
            chip: ChipConfig::default(),
            spiffs_image_dir: PathBuf::from("spiffs_image"),
            spiffs: Some(SpiffsConfig::default()),
            secret: SecretConfig::default(),
        }
    }
}

/// Serial connection used for flashing and monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: 74880,
        }
    }
}

/// Chip and flash parameters handed to esptool.py
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChipConfig {
    pub chip: String,
    pub flash_mode: String,
    pub flash_freq: String,
    pub flash_size: String,
    pub bootloader_offset: FlashAddress,
    pub partition_table_offset: FlashAddress,
    pub app_offset: FlashAddress,
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            chip: "esp8266".to_string(),
            flash_mode: "dio".to_string(),
            flash_freq: "80m".to_string(),
            flash_size: "4MB".to_string(),
            bootloader_offset: FlashAddress(0x0),
            partition_table_offset: FlashAddress(0x8000),
            app_offset: FlashAddress(0x10000),
        }
    }
}

/// SPIFFS partition parameters for spiffsgen.py
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiffsConfig {
    pub offset: FlashAddress,
    /// Image size in bytes; must match the partition table
    pub size: FlashAddress,
    pub page_size: Option<u32>,
    pub block_size: Option<u32>,
    /// Must agree with `SPIFFS_OBJ_META_LEN` in the firmware build
    pub meta_len: Option<u32>,
    /// Must agree with `SPIFFS_ALIGNED_OBJECT_INDEX_TABLES`
    pub aligned_obj_ix_tables: bool,
}

impl Default for SpiffsConfig {
    fn default() -> Self {
        Self {
            offset: FlashAddress(0x300000),
            size: FlashAddress(0x100000),
            page_size: Some(256),
            block_size: Some(4096),
            meta_len: Some(4),
            aligned_obj_ix_tables: true,
        }
    }
}

/// AP password generation and storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretConfig {
    pub length: usize,
    pub alphabet: String,
    /// Byte appended to both secret files; `null` writes the bare password
    pub terminator: Option<u8>,
    /// Save a QR code PNG of the password next to the archived copy
    pub qrdump: bool,
    /// File name used in both the SPIFFS source dir and the archive dir
    pub filename: String,
    /// Where a copy of every generated password is kept for the operator
    pub archive_dir: PathBuf,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            length: 8,
            alphabet: "0123456789".to_string(),
            terminator: Some(0),
            qrdump: true,
            filename: "ap.txt".to_string(),
            archive_dir: PathBuf::from("secrets"),
        }
    }
}

impl FlashConfig {
    /// Path of the config file for a project root
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load config from file, using defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse config from a YAML document
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty or comment-only file is a valid "all defaults" config
        if content.lines().all(|l| {
            let l = l.trim();
            l.is_empty() || l.starts_with('#')
        }) {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
