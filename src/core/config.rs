//! Session and transport configuration
//!
//! Everything the core would otherwise take from process-wide state
//! (timeouts, keys, device paths) lives here and is passed in explicitly.
//! Both structs load from TOML or JSON and are validated before use.

use crate::core::cache::DEFAULT_CACHE_CAPACITY;
use crate::core::classifier::DEFAULT_DEMO_PATTERNS;
use crate::core::codec::DEFAULT_PREVIEW_BYTES;
use crate::core::error::{CardError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Factory default key A of MIFARE Classic media
pub const DEFAULT_KEY_A: [u8; 6] = [0xFF; 6];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SessionConfig {
    /// Budget for one codec operation, including its retry
    #[validate(range(min = 1, max = 600_000))]
    pub op_timeout_ms: u64,

    /// How long a presence probe may wait for a medium
    #[validate(range(min = 1, max = 60_000))]
    pub presence_timeout_ms: u64,

    /// Polling period for presence and removal waits
    #[validate(range(min = 10, max = 10_000))]
    pub poll_interval_ms: u64,

    /// Pause after a transport reset before re-probing
    #[validate(range(max = 10_000))]
    pub recovery_settle_ms: u64,

    #[validate(range(min = 1, max = 65_536))]
    pub cache_capacity: usize,

    #[validate(range(min = 1, max = 4_096))]
    pub preview_bytes: usize,

    /// Rewrite a sample block with its own contents during writability checks
    pub probe_writes: bool,

    #[validate(length(min = 1))]
    pub demo_patterns: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            op_timeout_ms: 30_000,
            presence_timeout_ms: 3_000,
            poll_interval_ms: 500,
            recovery_settle_ms: 200,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            preview_bytes: DEFAULT_PREVIEW_BYTES,
            probe_writes: false,
            demo_patterns: DEFAULT_DEMO_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recovery_settle(&self) -> Duration {
        Duration::from_millis(self.recovery_settle_ms)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_validated(path.as_ref())
    }
}

/// Settings handed to a transport at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TransportConfig {
    /// Reader connection string or dump file path
    #[validate(length(min = 1))]
    pub device: String,

    /// Key A used to authenticate each sector
    pub key_a: [u8; 6],

    #[validate(range(min = 1, max = 60_000))]
    pub io_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            device: "card.mfd".to_string(),
            key_a: DEFAULT_KEY_A,
            io_timeout_ms: 3_000,
        }
    }
}

impl TransportConfig {
    pub fn new(device: impl Into<String>) -> Self {
        TransportConfig {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_validated(path.as_ref())
    }
}

fn load_validated<T: DeserializeOwned + Validate>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    let config: T = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .map_err(|e| CardError::Config(format!("{}: {}", path.display(), e)))?,
        _ => toml::from_str(&contents)?,
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_validate() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config =
            SessionConfig::from_toml_str("op_timeout_ms = 5000\nprobe_writes = true\n").unwrap();
        assert_eq!(config.op_timeout(), Duration::from_secs(5));
        assert!(config.probe_writes);
        assert_eq!(config.preview_bytes, DEFAULT_PREVIEW_BYTES);
        assert_eq!(config.demo_patterns.len(), 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SessionConfig::from_toml_str("cache_capacity = 0").unwrap_err();
        assert!(matches!(err, CardError::Config(_)));

        let err = SessionConfig::from_toml_str("demo_patterns = []").unwrap_err();
        assert!(matches!(err, CardError::Config(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = SessionConfig::from_toml_str("op_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, CardError::Config(_)));
    }

    #[test]
    fn test_transport_key_from_toml() {
        let config = TransportConfig::from_toml_str(
            "device = \"/tmp/card.mfd\"\nkey_a = [160, 161, 162, 163, 164, 165]\n",
        )
        .unwrap();
        assert_eq!(config.device, "/tmp/card.mfd");
        assert_eq!(config.key_a, [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
        assert_eq!(config.io_timeout_ms, 3_000);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{\"op_timeout_ms\": 1500, \"cache_capacity\": 64}}").unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.op_timeout_ms, 1500);
        assert_eq!(config.cache_capacity, 64);
    }

    #[test]
    fn test_load_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "device = \"reader0\"").unwrap();

        let config = TransportConfig::load(file.path()).unwrap();
        assert_eq!(config.device, "reader0");
        assert_eq!(config.key_a, DEFAULT_KEY_A);
    }
}
