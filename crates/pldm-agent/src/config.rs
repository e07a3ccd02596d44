//! Configuration loading

use anyhow::{Context, Result};
use pldm_discovery::{AgentConfig, SerialReaderConfig};
use pldm_mctp::{FruOptions, ReadTiming, WalkOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Seconds between topology scans
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Snapshot written by the configurator
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Seconds between status log lines
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            snapshot_path: default_snapshot_path(),
            status_interval_secs: default_status_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/tmp/pdr_and_fru_records.json")
}

fn default_status_interval() -> u64 {
    10
}

/// Redfish server the resource tree is served from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    /// Base URL to reach the server on. A wildcard bind address is reached via loopback.
    pub fn base_url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "localhost",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    5
}

/// Quick FRU metadata probe before full reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_probe_idle")]
    pub idle_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_probe_timeout(),
            idle_ms: default_probe_idle(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_probe_idle() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Overall read deadline for full reads
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Silence after which a read is considered complete
    #[serde(default = "default_idle_gap")]
    pub idle_gap_ms: u64,
    /// Root of the sysfs device tree to scan
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    /// Run full inventory reads on the polling task (experimental)
    #[serde(default)]
    pub experimental_inline_io: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
            idle_gap_ms: default_idle_gap(),
            sysfs_root: default_sysfs_root(),
            experimental_inline_io: false,
        }
    }
}

fn default_baud_rate() -> u32 {
    pldm_mctp::DEFAULT_BAUD_RATE
}

fn default_read_timeout() -> u64 {
    2000
}

fn default_idle_gap() -> u64 {
    200
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/devices")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Drop per-part CRC-32 trailers some firmware appends to FRU table parts
    #[serde(default = "default_true")]
    pub strip_fragment_checksum: bool,
    #[serde(default = "default_pdr_retries")]
    pub pdr_retries: u32,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            strip_fragment_checksum: true,
            pdr_retries: default_pdr_retries(),
            max_records: default_max_records(),
        }
    }
}

fn default_pdr_retries() -> u32 {
    3
}

fn default_max_records() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            poll_interval: Duration::from_secs(self.agent.poll_interval_secs.max(1)),
            status_interval: Duration::from_secs(self.agent.status_interval_secs),
            probe_enabled: self.probe.enabled,
        }
    }

    pub fn reader_config(&self) -> SerialReaderConfig {
        SerialReaderConfig {
            baud_rate: self.serial.baud_rate,
            probe_timing: ReadTiming::new(
                Duration::from_millis(self.probe.timeout_ms),
                Duration::from_millis(self.probe.idle_ms),
            ),
            read_timing: self.read_timing(),
            fru: self.fru_options(),
            inline_io: self.serial.experimental_inline_io,
        }
    }

    pub fn read_timing(&self) -> ReadTiming {
        ReadTiming::new(
            Duration::from_millis(self.serial.read_timeout_ms),
            Duration::from_millis(self.serial.idle_gap_ms),
        )
    }

    pub fn fru_options(&self) -> FruOptions {
        FruOptions {
            strip_fragment_checksum: self.transfer.strip_fragment_checksum,
        }
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            retries: self.transfer.pdr_retries,
            max_records: self.transfer.max_records,
            ..Default::default()
        }
    }
}

/// Load configuration from file. A missing file gives defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
