//! Process configuration: base multicast CIDR, port, interface selection.
//! JSON loading pattern grounded on `TING-HiuYu-Remote-Mic/src/lang.rs`.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::iface::InterfaceSelector;
use crate::pool::{MulticastPool, DEFAULT_PORT};

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_base_cidr() -> (Ipv4Addr, u8) {
    (Ipv4Addr::new(239, 0, 0, 0), 16)
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(5)
}

/// The three parameters spec.md names (base CIDR, port, interface set)
/// plus the operational knobs they imply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_cidr")]
    pub base_cidr: (Ipv4Addr, u8),

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub interfaces: InterfaceSelector,

    #[serde(default)]
    pub link_local: bool,

    #[serde(default = "default_monitor_interval", with = "duration_secs")]
    pub address_monitor_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_cidr: default_base_cidr(),
            port: default_port(),
            interfaces: InterfaceSelector::default(),
            link_local: false,
            address_monitor_interval: default_monitor_interval(),
        }
    }
}

impl Config {
    /// Load from a JSON file; any field absent from the file falls back to
    /// its default.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(Error::ConfigIo)?;
        serde_json::from_str(&raw).map_err(Error::Config)
    }

    /// The multicast pool this configuration describes.
    pub fn pool(&self) -> MulticastPool {
        let (base, prefix_len) = self.base_cidr;
        MulticastPool::new(base, prefix_len, self.port)
    }

    /// Apply `link_local` to an `All` selector; `Named` selectors are
    /// returned unchanged since link-local filtering only applies to the
    /// "every interface" case.
    pub fn resolved_selector(&self) -> InterfaceSelector {
        match &self.interfaces {
            InterfaceSelector::All { .. } => InterfaceSelector::All {
                include_link_local: self.link_local,
            },
            named @ InterfaceSelector::Named(_) => named.clone(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// The process-wide default configuration, installed once and read many
/// times thereafter. Mirrors the one-time-init/read-many pattern the
/// teacher uses for its active language table.
static ACTIVE: OnceCell<Config> = OnceCell::new();

/// Install `config` as the process-wide active configuration. A no-op if
/// one was already installed.
pub fn install(config: Config) {
    let _ = ACTIVE.set(config);
}

/// The active configuration, or the default if none was installed.
pub fn active() -> Config {
    ACTIVE.get().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let c = Config::default();
        assert_eq!(c.port, DEFAULT_PORT);
        assert_eq!(c.base_cidr, (Ipv4Addr::new(239, 0, 0, 0), 16));
        assert_eq!(c.address_monitor_interval, Duration::from_secs(5));
        assert!(!c.link_local);
    }

    #[test]
    fn from_file_fills_in_defaults_for_missing_fields() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("multicast-bus-config-test-{:?}.json", std::thread::current().id()));
        fs::write(&path, r#"{"port": 2000}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.port, 2000);
        assert_eq!(config.base_cidr, default_base_cidr());
    }

    #[test]
    fn from_file_missing_path_is_config_io_error() {
        let err = Config::from_file("/nonexistent/path/does-not-exist.json").unwrap_err();
        assert!(matches!(err, Error::ConfigIo(_)));
    }

    #[test]
    fn resolved_selector_applies_link_local_flag_to_all_variant() {
        let mut config = Config::default();
        config.link_local = true;
        match config.resolved_selector() {
            InterfaceSelector::All { include_link_local } => assert!(include_link_local),
            InterfaceSelector::Named(_) => panic!("expected All"),
        }
    }
}
