//! Receiver configuration
//!
//! Loaded from `receiver.toml` in the platform config directory, or from an
//! explicit path. A missing file yields the defaults.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::transport::Interface;

const CONFIG_FILE: &str = "receiver.toml";

/// Where chunks come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Unicast,
    Multicast,
    SharedMemory,
    Capture,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Multicast
    }
}

/// Which backend plays the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    /// Interleaved PCM to stdout
    Raw,
    /// Blocking writes to an audio device, reopened per format
    Device,
    /// Realtime callback at the device's own rate
    Realtime,
}

impl Default for OutputKind {
    fn default() -> Self {
        Self::Device
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub port: u16,
    /// Local interface, an IPv4 address or a name such as `eth0`; any
    /// interface when unset. Live capture needs a name.
    pub interface: Option<String>,
    pub multicast_group: Ipv4Addr,
    /// Shared memory file, e.g. `/dev/shm/ivshmem`
    pub shmem_path: Option<PathBuf>,
    /// `.pcap` file to replay; captures live on `interface` when unset
    pub capture_path: Option<PathBuf>,
    /// Sleep between shared-memory polls
    pub poll_interval_ms: u64,
    /// Longest a transport waits before reporting idle
    pub idle_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            port: DEFAULT_PORT,
            interface: None,
            multicast_group: DEFAULT_MULTICAST_GROUP,
            shmem_path: None,
            capture_path: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn interface(&self) -> Interface {
        Interface::parse(self.interface.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub kind: OutputKind,
    /// Output device name; the default device when unset
    pub device: Option<String>,
    /// Buffering between the stream and the device
    pub target_latency_ms: u32,
    /// Connect realtime ports to physical outputs
    pub auto_connect: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: OutputKind::default(),
            device: None,
            target_latency_ms: DEFAULT_LATENCY_MS,
            auto_connect: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    /// Platform path of `receiver.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "pcm-stream-receiver")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, or the platform path when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from an explicit path; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the receiver cannot start with
    pub fn validate(&self) -> Result<()> {
        match self.transport.kind {
            TransportKind::SharedMemory if self.transport.shmem_path.is_none() => {
                return Err(Error::Config("shared-memory transport needs shmem_path".into()));
            }
            TransportKind::Capture
                if self.transport.capture_path.is_none()
                    && !matches!(self.transport.interface(), Interface::Name(_)) =>
            {
                return Err(Error::Config(
                    "capture transport needs capture_path or an interface name".into(),
                ));
            }
            TransportKind::Multicast if !self.transport.multicast_group.is_multicast() => {
                return Err(Error::Config(format!(
                    "{} is not a multicast address",
                    self.transport.multicast_group
                )));
            }
            _ => {}
        }
        if self.output.target_latency_ms == 0 {
            return Err(Error::Config("target_latency_ms must be positive".into()));
        }
        if self.transport.idle_timeout_ms == 0 {
            return Err(Error::Config("idle_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.transport.port, 4010);
        assert_eq!(config.transport.multicast_group, Ipv4Addr::new(239, 255, 77, 77));
        assert_eq!(config.transport.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.output.target_latency_ms, 50);
        assert!(config.output.auto_connect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[transport]\nkind = \"shared-memory\"\nshmem_path = \"/dev/shm/ivshmem\"\n\n[output]\nkind = \"realtime\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.transport.kind, TransportKind::SharedMemory);
        assert_eq!(config.transport.shmem_path, Some(PathBuf::from("/dev/shm/ivshmem")));
        assert_eq!(config.transport.port, 4010);
        assert_eq!(config.output.kind, OutputKind::Realtime);
        assert_eq!(config.output.target_latency_ms, 50);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = AppConfig::default();
        config.transport.kind = TransportKind::Unicast;
        config.transport.interface = Some("192.168.1.10".into());
        config.output.device = Some("Speakers".into());

        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.transport.interface(),
            Interface::Address(Ipv4Addr::new(192, 168, 1, 10))
        );
    }

    #[test]
    fn test_interface_by_name() {
        let mut config = AppConfig::default();
        config.transport.interface = Some("eth0".into());
        assert_eq!(config.transport.interface(), Interface::Name("eth0".into()));
        assert_eq!(AppConfig::default().transport.interface(), Interface::Any);
    }

    #[test]
    fn test_capture_live_or_replay() {
        let mut config = AppConfig::default();
        config.transport.kind = TransportKind::Capture;
        config.transport.interface = Some("192.168.1.10".into());
        assert!(config.validate().is_err());

        config.transport.interface = Some("macvtap0".into());
        assert!(config.validate().is_ok());

        config.transport.interface = None;
        config.transport.capture_path = Some(PathBuf::from("stream.pcap"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_validate_rejects_incomplete() {
        let mut config = AppConfig::default();
        config.transport.kind = TransportKind::Capture;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.output.target_latency_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transport.multicast_group = Ipv4Addr::new(10, 0, 0, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[transport]\nport = \"many\"\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(Error::Config(_))));
    }
}
