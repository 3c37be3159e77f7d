//! Application configuration.
//!
//! Cache locations, the on-disk layout of configuration trees and the service
//! bus bridge, loaded from YAML files or environment variables.

use std::path::PathBuf;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "configurator.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CONFIGURATOR_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CONFIGURATOR";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "CONFIGURATOR_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stamp cache locations.
    pub cache: CacheConfig,
    /// Where configuration trees live.
    pub layout: LayoutConfig,
    /// Service bus bridge.
    pub transport: TransportConfig,
}

/// Stamp cache locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Directory holding one stamp file per applied artifact.
    pub stamp_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/cache/configurator"),
            stamp_dir: PathBuf::from("/var/cache/configurator/_stamps"),
        }
    }
}

/// Filesystem layout of configuration trees.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Shared tree scanned at boot.
    pub root_base_dir: PathBuf,
    /// Install root of third-party packages.
    pub third_party_base: PathBuf,
    /// Install root of system packages.
    pub system_base: PathBuf,
    /// Offset of the package tree below an install root.
    pub palm_offset: PathBuf,
    /// Present once first use has completed.
    pub first_use_flag: PathBuf,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            root_base_dir: PathBuf::from("/etc/palm/"),
            third_party_base: PathBuf::from("/media/cryptofs/apps/"),
            system_base: PathBuf::from("/"),
            palm_offset: PathBuf::from("usr/palm/"),
            first_use_flag: PathBuf::from("/var/luna/preferences/ran-firstuse"),
        }
    }
}

/// Service bus bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub base_url: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8090".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `configurator.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
