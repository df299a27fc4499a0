use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::export::ExportConfig;
use crate::sink::{SinkConfig, SinkMode};
use crate::upload::UploadConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Event bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Events a subscriber may fall behind before it starts skipping.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_event_capacity() -> usize {
    256
}

/// Local storage backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("invoicer-data")
}

/// Sanitized config for API responses (local paths and commands hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub export: ExportConfig,
    pub events: EventsConfig,
    pub sink: SanitizedSinkConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSinkConfig {
    pub mode: SinkMode,
    pub share_grace_secs: u64,
    pub download_dir_configured: bool,
    pub reveal_command_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            upload: config.upload.clone(),
            export: config.export.clone(),
            events: config.events.clone(),
            sink: SanitizedSinkConfig {
                mode: config.sink.mode,
                share_grace_secs: config.sink.share_grace_secs,
                download_dir_configured: config.sink.download_dir.is_some(),
                reveal_command_configured: config.sink.reveal_command.is_some(),
            },
        }
    }
}
