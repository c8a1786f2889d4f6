use std::collections::BTreeMap;
use std::path::Path;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::{API_PREFIX, PORT_API, PORT_HLS, PORT_WEBRTC};

/// Largest second count that still fits a millisecond-precision `chrono::Duration`
pub const MAX_DURATION_SECS: u64 = i64::MAX as u64 / 1000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Mount point of the edge routes
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// A server is routable only while its last heartbeat is younger than this
    #[serde(default = "default_fresh_after")]
    pub fresh_after_secs: u64,
    /// A server whose last heartbeat is at least this old is removed by the sweep
    #[serde(default = "default_expire_after")]
    pub expire_after_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,
    #[serde(default = "default_region")]
    pub default_region: String,
    /// A preferred server is honoured only below this load
    #[serde(default = "default_preferred_load_ceiling")]
    pub preferred_load_ceiling: f64,
    #[serde(default = "default_ports")]
    pub default_ports: BTreeMap<String, u16>,
}

fn default_listen() -> String {
    "[::]:3001".to_string()
}

fn default_prefix() -> String {
    API_PREFIX.to_string()
}

fn default_fresh_after() -> u64 {
    300
}

fn default_expire_after() -> u64 {
    600
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_capacity() -> u32 {
    100
}

fn default_region() -> String {
    "default".to_string()
}

fn default_preferred_load_ceiling() -> f64 {
    80.0
}

fn default_ports() -> BTreeMap<String, u16> {
    BTreeMap::from([
        (PORT_HLS.to_string(), 8080),
        (PORT_WEBRTC.to_string(), 3333),
        (PORT_API.to_string(), 8081),
    ])
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            prefix: default_prefix(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            fresh_after_secs: default_fresh_after(),
            expire_after_secs: default_expire_after(),
            cleanup_interval_secs: default_cleanup_interval(),
            default_capacity: default_capacity(),
            default_region: default_region(),
            preferred_load_ceiling: default_preferred_load_ceiling(),
            default_ports: default_ports(),
        }
    }
}

/// Parse a `role=port` list such as `hls=8080,webrtc=3333`
fn parse_ports(value: &str) -> Result<BTreeMap<String, u16>> {
    let mut ports = BTreeMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((role, port)) = entry.split_once('=') else {
            bail!("expected role=port, got '{}'", entry);
        };
        let role = role.trim();
        if role.is_empty() {
            bail!("empty port role in '{}'", entry);
        }
        let port = port
            .trim()
            .parse::<u16>()
            .with_context(|| format!("bad port for '{}'", role))?;
        ports.insert(role.to_string(), port);
    }
    Ok(ports)
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply `EDGE_*` environment overrides on top of file or default values
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(listen) = lookup("EDGE_LISTEN") {
            self.api.listen = listen;
        }
        if let Some(prefix) = lookup("EDGE_API_PREFIX") {
            self.api.prefix = prefix;
        }

        let secs = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|v| v.parse::<u64>().with_context(|| format!("Invalid {}: {}", key, v)))
                .transpose()
        };

        if let Some(v) = secs("EDGE_FRESH_AFTER_SECS")? {
            self.fleet.fresh_after_secs = v;
        }
        if let Some(v) = secs("EDGE_EXPIRE_AFTER_SECS")? {
            self.fleet.expire_after_secs = v;
        }
        if let Some(v) = secs("EDGE_CLEANUP_INTERVAL_SECS")? {
            self.fleet.cleanup_interval_secs = v;
        }
        if let Some(v) = lookup("EDGE_DEFAULT_PORTS") {
            self.fleet.default_ports = parse_ports(&v)
                .with_context(|| format!("Invalid EDGE_DEFAULT_PORTS: {}", v))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fleet = &self.fleet;
        for (name, secs) in [
            ("fleet.fresh_after_secs", fleet.fresh_after_secs),
            ("fleet.expire_after_secs", fleet.expire_after_secs),
            ("fleet.cleanup_interval_secs", fleet.cleanup_interval_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                bail!("{} ({}) must not exceed {}", name, secs, MAX_DURATION_SECS);
            }
        }
        if fleet.fresh_after_secs == 0 {
            bail!("fleet.fresh_after_secs must be greater than zero");
        }
        if fleet.expire_after_secs < fleet.fresh_after_secs {
            bail!(
                "fleet.expire_after_secs ({}) must not be shorter than fleet.fresh_after_secs ({})",
                fleet.expire_after_secs,
                fleet.fresh_after_secs
            );
        }
        if fleet.cleanup_interval_secs == 0 {
            bail!("fleet.cleanup_interval_secs must be greater than zero");
        }
        let prefix = &self.api.prefix;
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            bail!("api.prefix must look like '/edge': {}", prefix);
        }
        Ok(())
    }
}
