//! Lane configuration
//!
//! Resolution order:
//! 1. Built-in defaults (see [`defaults`])
//! 2. Config file: `--config`, else `$PIXIE_LANE_CONFIG`, else
//!    `./pixie-lane.toml` when present
//! 3. CLI flags, applied by the caller after loading
//!
//! Every field is optional in the file.

pub mod defaults;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::KnownDevice;
use crate::timeout::{TimeoutConfig, TimeoutValidationError};

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "PIXIE_LANE_CONFIG";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pixie-lane.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    /// Directory holding per-job workspaces.
    pub build_root: PathBuf,

    pub toolchain: ToolchainConfig,

    pub flasher: FlasherConfig,

    pub timeouts: TimeoutConfig,

    /// Extra known devices, tried after the built-in table.
    #[serde(rename = "device")]
    pub devices: Vec<KnownDevice>,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            build_root: PathBuf::from(defaults::BUILD_ROOT),
            toolchain: ToolchainConfig::default(),
            flasher: FlasherConfig::default(),
            timeouts: TimeoutConfig::default(),
            devices: Vec::new(),
        }
    }
}

/// Compiler toolchain settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler CLI executable.
    pub cli: String,
    /// Platform id that must be installed (e.g. "esp32:esp32").
    pub platform: String,
    /// Board passed to every compile.
    pub fqbn: String,
    /// Board-manager index URLs used by the install steps.
    pub additional_urls: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cli: defaults::TOOLCHAIN_CLI.to_string(),
            platform: defaults::PLATFORM.to_string(),
            fqbn: defaults::FQBN.to_string(),
            additional_urls: vec![defaults::ESP32_INDEX_URL.to_string()],
        }
    }
}

/// Flasher settings. These must match the partition layout the board's
/// images are built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlasherConfig {
    /// Executable that launches the flasher.
    pub program: String,
    /// Arguments placed before the flasher's own options.
    pub program_args: Vec<String>,
    pub chip: String,
    pub baud: u32,
    pub before: String,
    pub after: String,
    pub flash_mode: String,
    pub flash_freq: String,
    pub flash_size: String,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            program: defaults::FLASHER_PROGRAM.to_string(),
            program_args: defaults::FLASHER_PROGRAM_ARGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            chip: defaults::CHIP.to_string(),
            baud: defaults::BAUD,
            before: defaults::BEFORE.to_string(),
            after: defaults::AFTER.to_string(),
            flash_mode: defaults::FLASH_MODE.to_string(),
            flash_freq: defaults::FLASH_FREQ.to_string(),
            flash_size: defaults::FLASH_SIZE.to_string(),
        }
    }
}

/// Errors that can occur when loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid timeouts: {0}")]
    Timeouts(#[from] TimeoutValidationError),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl LaneConfig {
    /// Resolve the config file to use and load it, or fall back to defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Self::load(Path::new(&path));
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: LaneConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeouts.validate()?;

        if self.build_root.as_os_str().is_empty() {
            return Err(invalid("build_root", "must not be empty"));
        }
        if self.toolchain.cli.trim().is_empty() {
            return Err(invalid("toolchain.cli", "must not be empty"));
        }
        if !self
            .toolchain
            .fqbn
            .starts_with(&format!("{}:", self.toolchain.platform))
        {
            return Err(invalid(
                "toolchain.fqbn",
                &format!(
                    "'{}' does not belong to platform '{}'",
                    self.toolchain.fqbn, self.toolchain.platform
                ),
            ));
        }
        if self.flasher.program.trim().is_empty() {
            return Err(invalid("flasher.program", "must not be empty"));
        }
        if self.flasher.baud == 0 {
            return Err(invalid("flasher.baud", "must be greater than 0"));
        }

        for (index, device) in self.devices.iter().enumerate() {
            if device.name.trim().is_empty() {
                return Err(invalid(&format!("device[{}].name", index), "must not be empty"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
