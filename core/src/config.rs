// core/src/config.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::journal_engine::DEFAULT_JOURNAL_CAPACITY;
use crate::session_manager::DEFAULT_MAX_SESSIONS;

/// Konfigurace serveru, načítaná z TOML souboru.
///
/// Every field has a default so a partial (or empty) file is valid.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Name sent in ACCEPT replies and advertised over mDNS.
    pub service_name: String,
    pub log_level: Option<String>,
    pub poll_interval_ms: u64,
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub inbound: InboundConfig,
    pub hardware: HardwareConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub control_port: u16,
    pub data_port: u16,
    pub local_port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    /// Idle seconds before a session is dropped, 0 keeps sessions forever.
    pub timeout_secs: u64,
    pub journal_capacity: usize,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct InboundConfig {
    /// File that receives raw MIDI from remote peers.
    pub midi_file: Option<PathBuf>,
    /// Octal permission string used when creating `midi_file`.
    pub file_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct HardwareConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "rtpmidi".to_string(),
            log_level: None,
            poll_interval_ms: 5,
            network: NetworkConfig::default(),
            session: SessionConfig::default(),
            inbound: InboundConfig::default(),
            hardware: HardwareConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            control_port: 5004,
            data_port: 5005,
            local_port: 5006,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            timeout_secs: 180,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let n = &self.network;
        if n.control_port == n.data_port
            || n.control_port == n.local_port
            || n.data_port == n.local_port
        {
            anyhow::bail!(
                "control, data and local ports must differ (got {}, {}, {})",
                n.control_port,
                n.data_port,
                n.local_port
            );
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if let Some(mode) = &self.inbound.file_mode {
            u32::from_str_radix(mode, 8)
                .with_context(|| format!("file_mode {mode:?} is not an octal number"))?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session.timeout_secs)
    }

    /// Parsed `inbound.file_mode`, defaulting to 0640.
    pub fn file_mode(&self) -> u32 {
        self.inbound
            .file_mode
            .as_deref()
            .and_then(|m| u32::from_str_radix(m, 8).ok())
            .unwrap_or(0o640)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.network.control_port, 5004);
        assert_eq!(config.file_mode(), 0o640);
    }

    #[test]
    fn partial_sections_override_defaults() {
        let config = Config::from_toml_str(
            r#"
            service_name = "studio"
            [network]
            control_port = 6004
            data_port = 6005
            [session]
            timeout_secs = 0
            [inbound]
            midi_file = "/tmp/in.midi"
            file_mode = "0600"
            "#,
        )
        .unwrap();
        assert_eq!(config.service_name, "studio");
        assert_eq!(config.network.local_port, 5006);
        assert!(config.session_timeout().is_zero());
        assert_eq!(config.file_mode(), 0o600);
        assert_eq!(config.session.max_sessions, DEFAULT_MAX_SESSIONS);
    }

    #[test]
    fn clashing_ports_are_rejected() {
        let err = Config::from_toml_str("[network]\ncontrol_port = 5005\n").unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn bad_file_mode_is_rejected() {
        assert!(Config::from_toml_str("[inbound]\nfile_mode = \"rwx\"\n").is_err());
    }

    #[test]
    fn load_from_file_reads_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = 20").unwrap();
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.poll_interval().as_millis(), 20);

        let missing = Config::load_from_file("/definitely/not/here.toml").unwrap_err();
        assert!(missing.to_string().contains("Failed to read"));
    }
}
