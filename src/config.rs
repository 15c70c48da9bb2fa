//! Configuration for the keepsake session engine.
//!
//! All settings live in a single TOML file. Every field has a default so a
//! missing or partial config file is never fatal.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepsakeConfig {
    pub audio: AudioConfig,
    pub memory: MemoryConfig,
    pub transport: TransportConfig,
}

/// Audio capture and playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz (the rate sent to the remote agent).
    pub input_sample_rate: u32,
    /// Playback sample rate in Hz (the rate the agent sends back).
    pub output_sample_rate: u32,
    /// Number of capture channels (1 = mono).
    pub input_channels: u16,
    /// Fixed capture block size in frames. 2048 frames at 16kHz is a
    /// ~128ms latency budget per outbound frame.
    pub capture_block_frames: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            input_channels: 1,
            capture_block_frames: 2048,
            input_device: None,
            output_device: None,
        }
    }
}

/// Memory vault configuration.
///
/// The vault is persisted to two blob keys (primary and backup) that are
/// kept value-identical after every successful write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Vault root directory (None = `<data_dir>/vault`).
    pub root_dir: Option<PathBuf>,
    /// Primary blob key.
    pub primary_key: String,
    /// Backup blob key.
    pub backup_key: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            primary_key: "memory_symbols.json".into(),
            backup_key: "memory_symbols.backup.json".into(),
        }
    }
}

impl MemoryConfig {
    /// Resolved vault root directory.
    #[must_use]
    pub fn root(&self) -> PathBuf {
        self.root_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("vault"))
    }
}

/// Transport configuration for the live agent connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket URL of the live agent endpoint.
    pub url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9731/live".into(),
        }
    }
}

impl KeepsakeConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Load configuration from the given path, or defaults if the file does
    /// not exist or cannot be parsed.
    #[must_use]
    pub fn load_or_default(path: &std::path::Path) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(SessionError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!("ignoring unreadable config at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Save configuration to a TOML file, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config file path: `<config_dir>/keepsake/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        if let Some(dir) = std::env::var_os("KEEPSAKE_CONFIG_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        dirs::config_dir()
            .map(|d| d.join("keepsake"))
            .unwrap_or_else(|| PathBuf::from("/tmp/keepsake-config"))
            .join("config.toml")
    }
}

/// Application data root directory.
///
/// Resolves to `dirs::data_dir()/keepsake/` by default. Override with the
/// `KEEPSAKE_DATA_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("KEEPSAKE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("keepsake"))
        .unwrap_or_else(|| PathBuf::from("/tmp/keepsake-data"))
}
