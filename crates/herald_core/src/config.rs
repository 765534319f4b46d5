//! Static configuration handed to the core at startup.
//!
//! Every section deserializes with defaults, so a partial file is valid.
//! [`HeraldConfig::validate`] catches what serde cannot: empty ids,
//! unparsable durations, invalid time formats, and mode/platform mismatches.

use crate::adapter::{PlatformKind, PluginMode};
use crate::error::ConfigError;
use crate::types::PlayerId;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
}

/// This process's place in the topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique id of this process; also the backend id the proxy uses for it.
    #[serde(default = "default_process_id")]
    pub process_id: String,
    #[serde(default)]
    pub platform: PlatformKind,
    #[serde(default)]
    pub mode: PluginMode,
    /// Processes that receive this one's replication frames.
    #[serde(default)]
    pub peers: Vec<String>,
    /// In `backend` mode, render local-scope events on this backend too.
    #[serde(default)]
    pub backend_local_render: bool,
}

fn default_process_id() -> String {
    "herald-1".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            process_id: default_process_id(),
            platform: PlatformKind::default(),
            mode: PluginMode::default(),
            peers: Vec::new(),
            backend_local_render: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Record directory for the file store. Several processes may share it.
    #[serde(default = "default_data_dir")]
    pub data_dir: Option<PathBuf>,
    /// Lock files older than this are considered abandoned.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

fn default_data_dir() -> Option<PathBuf> {
    Some(PathBuf::from("data/players"))
}

fn default_stale_lock_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Period of the full-snapshot rebroadcast, e.g. "5m". "0" disables it.
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: String,
    #[serde(default = "default_max_store_retries")]
    pub max_store_retries: u32,
    /// Upper bound on draining queued frames at shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_snapshot_interval() -> String {
    "5m".to_string()
}

fn default_max_store_retries() -> u32 {
    crate::coordinator::DEFAULT_MAX_STORE_RETRIES
}

fn default_shutdown_timeout_ms() -> u64 {
    2000
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: default_snapshot_interval(),
            max_store_retries: default_max_store_retries(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl ReplicationConfig {
    pub fn snapshot_interval(&self) -> Result<Option<Duration>, ConfigError> {
        let interval = parse_duration(&self.snapshot_interval)?;
        Ok((!interval.is_zero()).then_some(interval))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// One template: a single string or a list of variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateEntry {
    Single(String),
    Variants(Vec<String>),
}

impl TemplateEntry {
    pub fn variants(&self) -> &[String] {
        match self {
            TemplateEntry::Single(text) => std::slice::from_ref(text),
            TemplateEntry::Variants(list) => list,
        }
    }
}

impl From<&str> for TemplateEntry {
    fn from(text: &str) -> Self {
        TemplateEntry::Single(text.to_string())
    }
}

/// Message templates and their rendering options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesConfig {
    /// Template key -> template. See [`crate::templates::keys`].
    #[serde(default = "default_templates")]
    pub templates: BTreeMap<String, TemplateEntry>,
    /// Backend id -> display name for `{server}` and friends.
    #[serde(default)]
    pub server_aliases: BTreeMap<String, String>,
    /// Absence after which a join counts as "returning", e.g. "7d".
    #[serde(default)]
    pub returning_after: Option<String>,
    #[serde(default = "default_time_format")]
    pub time_format: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Player UUID -> template key, applied when the record carries none.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

fn default_templates() -> BTreeMap<String, TemplateEntry> {
    [
        ("join", "{player} joined the network"),
        ("leave", "{player} left the network"),
        ("first-join", "Welcome {player} to the network for the first time!"),
        ("switch", "{player} moved from {from} to {to}"),
    ]
    .into_iter()
    .map(|(key, text)| (key.to_string(), TemplateEntry::from(text)))
    .collect()
}

fn default_time_format() -> String {
    "%H:%M".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            templates: default_templates(),
            server_aliases: BTreeMap::new(),
            returning_after: None,
            time_format: default_time_format(),
            date_format: default_date_format(),
            overrides: BTreeMap::new(),
        }
    }
}

impl MessagesConfig {
    pub fn returning_after(&self) -> Result<Option<Duration>, ConfigError> {
        self.returning_after.as_deref().map(parse_duration).transpose()
    }

    pub fn overrides(&self) -> Result<BTreeMap<PlayerId, String>, ConfigError> {
        self.overrides
            .iter()
            .map(|(id, key)| {
                id.parse::<PlayerId>()
                    .map(|id| (id, key.clone()))
                    .map_err(|_| ConfigError::InvalidOverrideId(id.clone()))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.returning_after()?;
        self.overrides()?;
        validate_time_format("time_format", &self.time_format)?;
        validate_time_format("date_format", &self.date_format)?;
        Ok(())
    }
}

impl HeraldConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let node = &self.node;
        if node.process_id.trim().is_empty() {
            return Err(ConfigError::EmptyProcessId);
        }
        if node.peers.iter().any(|peer| *peer == node.process_id) {
            return Err(ConfigError::SelfPeer(node.process_id.clone()));
        }
        if !node.mode.fits(node.platform) {
            return Err(ConfigError::ModeMismatch {
                mode: node.mode.to_string(),
                platform: node.platform.to_string(),
            });
        }
        if self.store.backend == StoreBackend::File && self.store.data_dir.is_none() {
            return Err(ConfigError::MissingDataDir);
        }
        self.replication.snapshot_interval()?;
        self.messages.validate()
    }

    /// Mode after resolving `auto` against the platform and peers.
    pub fn effective_mode(&self) -> PluginMode {
        self.node.mode.resolve(self.node.platform, !self.node.peers.is_empty())
    }
}

/// Parses durations like `90`, `30m`, `1d12h` or `1d 2h 30m 15s`.
/// Bare digits are seconds.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(text.to_string());
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if compact.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = compact.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in compact.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return Err(invalid()),
        };
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

fn validate_time_format(field: &'static str, format: &str) -> Result<(), ConfigError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::InvalidTimeFormat {
            field,
            format: format.to_string(),
        });
    }
    Ok(())
}
