//! Configuration loading and parsing

use anyhow::{Context, Result};
use can_stream_core::StreamConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
///
/// ```toml
/// [catalog]
/// dbc_files = ["powertrain.dbc"]
///
/// [input]
/// path = "trace.log"
/// realtime = true
///
/// [stream]
/// window = "60s"
/// refresh_hz = 10
/// signals = ["EngineSpeed", "VehicleSpeed"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub dbc_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InputConfig {
    /// candump log to replay; `None` or "-" reads stdin
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub realtime: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Stop after this many refresh ticks
    pub max_ticks: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl InputConfig {
    /// Path of the log file, or `None` for stdin
    pub fn file(&self) -> Option<&Path> {
        self.path
            .as_deref()
            .filter(|path| path.as_os_str() != "-")
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    for dbc in &config.catalog.dbc_files {
        if !dbc.exists() {
            log::warn!("DBC file listed in {:?} does not exist: {:?}", path, dbc);
        }
    }

    Ok(config)
}
