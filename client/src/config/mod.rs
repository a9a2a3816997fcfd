//! Configuration management

use anyhow::{Context, Result};
use protocol::{WireRevision, AES_BLOCK_SIZE, CLIENT_VERSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest CRC retry budget accepted from configuration
pub const MAX_CRC_RETRIES: u32 = 10;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout_sec")]
    pub connect_timeout_sec: u64,
    #[serde(default = "default_receive_timeout_sec")]
    pub receive_timeout_sec: u64,
    #[serde(default = "default_header_timeout_sec")]
    pub header_timeout_sec: u64,
    #[serde(default = "default_upload_timeout_sec")]
    pub upload_timeout_sec: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default = "default_wire_revision")]
    pub wire_revision: String,
    #[serde(default = "default_crc_retries")]
    pub crc_retries: u32,
    /// Ciphertext bytes carried by one SEND_FILE packet
    #[serde(default = "default_max_packet_content")]
    pub max_packet_content: usize,
    #[serde(default = "default_true")]
    pub await_confirmation_ack: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    #[serde(default = "default_transfer_info")]
    pub transfer_info: PathBuf,
    #[serde(default = "default_private_key")]
    pub private_key: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_connect_timeout_sec() -> u64 {
    30
}

fn default_receive_timeout_sec() -> u64 {
    30
}

fn default_header_timeout_sec() -> u64 {
    10
}

fn default_upload_timeout_sec() -> u64 {
    300
}

fn default_version() -> u8 {
    CLIENT_VERSION
}

fn default_wire_revision() -> String {
    WireRevision::default().to_string()
}

fn default_crc_retries() -> u32 {
    1
}

fn default_max_packet_content() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_transfer_info() -> PathBuf {
    PathBuf::from("transfer.info")
}

fn default_private_key() -> PathBuf {
    PathBuf::from("priv.key")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_sec: default_connect_timeout_sec(),
            receive_timeout_sec: default_receive_timeout_sec(),
            header_timeout_sec: default_header_timeout_sec(),
            upload_timeout_sec: default_upload_timeout_sec(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            wire_revision: default_wire_revision(),
            crc_retries: default_crc_retries(),
            max_packet_content: default_max_packet_content(),
            await_confirmation_ack: default_true(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            transfer_info: default_transfer_info(),
            private_key: default_private_key(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_sec)
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout_sec)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_sec)
    }
}

impl ProtocolConfig {
    pub fn wire_revision(&self) -> Result<WireRevision> {
        self.wire_revision
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file: {:?}", path.as_ref()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let network = &self.network;
        if network.connect_timeout_sec == 0
            || network.receive_timeout_sec == 0
            || network.header_timeout_sec == 0
            || network.upload_timeout_sec == 0
        {
            anyhow::bail!("network timeouts must be greater than zero");
        }

        self.protocol.wire_revision()?;

        if self.protocol.crc_retries > MAX_CRC_RETRIES {
            anyhow::bail!(
                "crc_retries must be at most {}, got {}",
                MAX_CRC_RETRIES,
                self.protocol.crc_retries
            );
        }

        let packet = self.protocol.max_packet_content;
        if packet == 0 || packet % AES_BLOCK_SIZE != 0 {
            anyhow::bail!(
                "max_packet_content must be a nonzero multiple of {}, got {}",
                AES_BLOCK_SIZE,
                packet
            );
        }

        if self.logging.level.trim().is_empty() {
            anyhow::bail!("logging.level must not be empty");
        }

        Ok(())
    }
}
