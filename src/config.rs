//! Configuration file support for the DX spot feed.
//!
//! Loads settings from `~/.config/dx-spot-feed/config.toml` on Linux
//! (or platform-appropriate location on other OSes).

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::{ClientConfig, MAX_EXTRA_COMMANDS, SourceKind};
use crate::feed::FeedConfig;
use crate::geo::LatLng;
use crate::prefix::{DEFAULT_PREFIX_URL, PrefixResolverConfig};
use crate::spot::LabelStyle;

/// Default DX cluster node.
pub const DEFAULT_CLUSTER_HOST: &str = "dxc.nc7j.com";
pub const DEFAULT_CLUSTER_PORT: u16 = 7373;

/// Default WSJT-X UDP port.
pub const DEFAULT_WSJTX_PORT: u16 = 2237;

/// Where spots come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub host: String,
    pub port: u16,
    /// Join `host` as an IPv4 multicast group (wsjtx only).
    pub multicast: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Cluster,
            host: DEFAULT_CLUSTER_HOST.to_string(),
            port: DEFAULT_CLUSTER_PORT,
            multicast: false,
        }
    }
}

/// Station location in degrees.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpotsConfig {
    pub capacity: usize,
    pub visible_rows: usize,
}

impl Default for SpotsConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            visible_rows: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_connects_per_hour: u32,
    pub retry_delay_secs: u64,
    pub idle_heartbeat_secs: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connects_per_hour: 10,
            retry_delay_secs: 60,
            idle_heartbeat_secs: 600,
            connect_timeout_secs: 10,
            read_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefixesConfig {
    pub url: String,
    pub refresh_hours: u64,
    /// A fetched table must have more rows than this to be installed.
    pub min_rows: usize,
}

impl Default for PrefixesConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PREFIX_URL.to_string(),
            refresh_hours: 24,
            min_rows: 1000,
        }
    }
}

/// Display preferences passed through to snapshot consumers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub label: LabelStyle,
    pub show_path: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity sent at cluster login, usually your call sign.
    pub login: String,

    /// Extra commands sent after login.
    pub commands: Vec<String>,

    /// Print statistics every N seconds (0 disables).
    pub stats_interval: u64,

    pub source: SourceConfig,
    pub station: StationConfig,
    pub spots: SpotsConfig,
    pub limits: LimitsConfig,
    pub prefixes: PrefixesConfig,
    pub display: DisplayConfig,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            login: "N0CALL".to_string(),
            commands: Vec::new(),
            stats_interval: 300,
            source: SourceConfig::default(),
            station: StationConfig::default(),
            spots: SpotsConfig::default(),
            limits: LimitsConfig::default(),
            prefixes: PrefixesConfig::default(),
            display: DisplayConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dx-spot-feed/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.commands.len() > MAX_EXTRA_COMMANDS {
            bail!(
                "At most {} extra login commands are allowed, got {}",
                MAX_EXTRA_COMMANDS,
                self.commands.len()
            );
        }
        if self.spots.capacity == 0 {
            bail!("spots.capacity must be at least 1");
        }
        if self.spots.visible_rows == 0 {
            bail!("spots.visible_rows must be at least 1");
        }
        if !(-90.0..=90.0).contains(&self.station.lat) || !(-180.0..=180.0).contains(&self.station.lng)
        {
            bail!(
                "Station location {}, {} is out of range",
                self.station.lat,
                self.station.lng
            );
        }
        if self.source.multicast {
            let group: Ipv4Addr = self
                .source
                .host
                .parse()
                .with_context(|| format!("Multicast host {} is not an IPv4 address", self.source.host))?;
            if !group.is_multicast() {
                bail!("{} is not a multicast group address", group);
            }
        }
        if self.login.trim().is_empty() && self.source.kind == SourceKind::Cluster {
            bail!("A login identity is required for cluster sources");
        }
        Ok(())
    }

    /// Build the feed settings these options describe.
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            client: ClientConfig {
                kind: self.source.kind,
                host: self.source.host.clone(),
                port: self.source.port,
                multicast: self.source.multicast,
                login: self.login.clone(),
                commands: self.commands.clone(),
                station: LatLng::from_degrees(self.station.lat, self.station.lng),
                max_connects_per_hour: self.limits.max_connects_per_hour,
                connect_timeout: Duration::from_secs(self.limits.connect_timeout_secs),
                read_timeout: Duration::from_secs(self.limits.read_timeout_secs),
            },
            prefixes: PrefixResolverConfig {
                url: self.prefixes.url.clone(),
                refresh_interval: Duration::from_secs(self.prefixes.refresh_hours * 3600),
                min_rows: self.prefixes.min_rows,
                ..Default::default()
            },
            capacity: self.spots.capacity,
            visible_rows: self.spots.visible_rows,
            retry_delay: Duration::from_secs(self.limits.retry_delay_secs),
            idle_heartbeat: Duration::from_secs(self.limits.idle_heartbeat_secs),
            label_style: self.display.label,
            show_path: self.display.show_path,
        }
    }
}
