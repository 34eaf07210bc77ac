//! Configuration management for regenbox.
//!
//! Every tunable of the transport and discovery layers lives in a plain
//! struct with a `Default` impl, so constructors receive explicit values and
//! nothing is process-global. The daemon layers environment variable
//! overrides on top of the defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::LinkConfig;

/// Terminator byte ending every regenbox frame.
pub const DEFAULT_TERMINATOR: u8 = 0xFF;

/// Main configuration structure for the daemon.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Device path; when unset the port is found by discovery
    pub device: Option<String>,

    /// Link settings used to open the port
    pub serial: LinkConfig,

    /// Transport tuning
    pub transport: TransportSettings,

    /// Discovery tuning
    pub discovery: DiscoverySettings,

    /// Connection watcher tuning
    pub watch: WatchSettings,
}

/// Transport configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportSettings {
    /// Byte that ends a frame
    pub terminator: u8,

    /// Read timeout applied to each `read()` call
    pub read_timeout: Duration,

    /// Write timeout applied to each `write()` call
    pub write_timeout: Duration,

    /// Largest frame assembled before it is delivered regardless of terminator
    pub max_frame_len: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            max_frame_len: 32,
        }
    }
}

/// Discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiscoverySettings {
    /// Read and write timeout while a candidate is being probed
    pub probe_timeout: Duration,

    /// Payload of the frame sent to a candidate to check it answers
    pub probe_request: Vec<u8>,

    /// Ask for exclusive access to candidate ports
    #[serde(default)]
    pub exclusive: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(50),
            probe_request: vec![0x00],
            exclusive: false,
        }
    }
}

/// Connection watcher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatchSettings {
    /// Time between two liveness probes
    pub interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Defaults overridden by `REGENBOX_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup("REGENBOX_DEVICE").filter(|d| !d.is_empty()) {
            self.device = Some(device);
        }
        if let Some(baud) = parse::<u32>(&lookup, "REGENBOX_BAUD_RATE")? {
            self.serial.baud_rate = baud;
        }
        if let Some(ms) = parse::<u64>(&lookup, "REGENBOX_TIMEOUT_MS")? {
            self.transport.read_timeout = Duration::from_millis(ms);
            self.transport.write_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "REGENBOX_PROBE_TIMEOUT_MS")? {
            self.discovery.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, "REGENBOX_WATCH_INTERVAL_SECS")? {
            self.watch.interval = Duration::from_secs(secs);
        }
        Ok(self)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn overrides(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::default().with_overrides(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.device, None);
        assert_eq!(config.serial, LinkConfig::default());
        assert_eq!(config.transport.read_timeout, Duration::from_secs(1));
        assert_eq!(config.transport.write_timeout, Duration::from_secs(1));
        assert_eq!(config.transport.terminator, DEFAULT_TERMINATOR);
        assert_eq!(config.discovery.probe_timeout, Duration::from_millis(50));
        assert!(!config.discovery.exclusive);
    }

    #[test]
    fn no_overrides_keeps_defaults() {
        assert_eq!(overrides(&[]).unwrap(), Config::default());
    }

    #[test]
    fn applies_overrides() {
        let config = overrides(&[
            ("REGENBOX_DEVICE", "/dev/ttyUSB3"),
            ("REGENBOX_BAUD_RATE", "115200"),
            ("REGENBOX_TIMEOUT_MS", "250"),
            ("REGENBOX_PROBE_TIMEOUT_MS", " 20 "),
            ("REGENBOX_WATCH_INTERVAL_SECS", "30"),
        ])
        .unwrap();

        assert_eq!(config.device.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.transport.read_timeout, Duration::from_millis(250));
        assert_eq!(config.transport.write_timeout, Duration::from_millis(250));
        assert_eq!(config.discovery.probe_timeout, Duration::from_millis(20));
        assert_eq!(config.watch.interval, Duration::from_secs(30));
    }

    #[test]
    fn empty_device_means_discovery() {
        let config = overrides(&[("REGENBOX_DEVICE", "")]).unwrap();
        assert_eq!(config.device, None);
    }

    #[test_case("REGENBOX_BAUD_RATE", "fast" ; "baud rate")]
    #[test_case("REGENBOX_TIMEOUT_MS", "-1" ; "negative timeout")]
    #[test_case("REGENBOX_PROBE_TIMEOUT_MS", "" ; "empty probe timeout")]
    #[test_case("REGENBOX_WATCH_INTERVAL_SECS", "1.5" ; "fractional interval")]
    fn rejects_malformed_values(key: &str, value: &str) {
        match overrides(&[(key, value)]) {
            Err(Error::Config(msg)) => assert!(msg.starts_with(key), "{}", msg),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
