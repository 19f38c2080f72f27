use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "./tailrelay.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(skip)]
    pub(crate) path: PathBuf,
    // Registry of socat relays
    #[serde(deserialize_with = "path_or_default", default = "default_relays_file")]
    pub(crate) relays_file: PathBuf,
    // Registry of caddy proxies and their server slots
    #[serde(deserialize_with = "path_or_default", default = "default_proxies_file")]
    pub(crate) proxies_file: PathBuf,
    // Relay executable, looked up in PATH unless absolute
    #[serde(deserialize_with = "string_or_default", default = "default_relay_binary")]
    pub(crate) relay_binary: String,
    #[serde(deserialize_with = "string_or_default", default = "default_caddy_api_url")]
    pub(crate) caddy_api_url: String,
    #[serde(deserialize_with = "monitor_interval_or_default", default = "default_monitor_interval_secs")]
    pub(crate) monitor_interval_secs: u64,
    #[serde(deserialize_with = "stop_attempts_or_default", default = "default_stop_attempts")]
    pub(crate) stop_attempts: u32,
    #[serde(deserialize_with = "stop_poll_interval_or_default", default = "default_stop_poll_interval_ms")]
    pub(crate) stop_poll_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

impl AppConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().with_extension("json"),
            relays_file: default_relays_file(),
            proxies_file: default_proxies_file(),
            relay_binary: default_relay_binary(),
            caddy_api_url: default_caddy_api_url(),
            monitor_interval_secs: default_monitor_interval_secs(),
            stop_attempts: default_stop_attempts(),
            stop_poll_interval_ms: default_stop_poll_interval_ms(),
        }
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn relays_file(&self) -> &Path {
        &self.relays_file
    }

    pub fn proxies_file(&self) -> &Path {
        &self.proxies_file
    }

    pub fn relay_binary(&self) -> &str {
        if self.relay_binary.trim().is_empty() { "socat" } else { &self.relay_binary }
    }

    pub fn caddy_api_url(&self) -> &str {
        &self.caddy_api_url
    }

    pub fn monitor_interval(&self) -> Duration {
        match self.monitor_interval_secs {
            0 => Duration::from_secs(default_monitor_interval_secs()),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn stop_attempts(&self) -> u32 {
        self.stop_attempts.max(1)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    // Fills fields that were present but unusable with their defaults.
    pub(crate) fn normalize(&mut self) {
        if self.relays_file.as_os_str().is_empty() {
            self.relays_file = default_relays_file();
        }
        if self.proxies_file.as_os_str().is_empty() {
            self.proxies_file = default_proxies_file();
        }
        if self.caddy_api_url.trim().is_empty() {
            self.caddy_api_url = default_caddy_api_url();
        }
    }

    pub fn set_relay_binary(&mut self, binary: impl Into<String>) {
        self.relay_binary = binary.into();
    }

    pub fn set_caddy_api_url(&mut self, url: impl Into<String>) {
        self.caddy_api_url = url.into();
    }
}

impl Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?;
        writeln!(f, "{}", json)
    }
}

// Helper functions for deserialization
fn string_or_default<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match String::deserialize(deserializer) {
        Ok(s) => Ok(s),
        Err(e) => {
            warn!("Failed to deserialize string value: {}, using default", e);
            Ok(String::default())
        }
    }
}

fn path_or_default<'de, D>(deserializer: D) -> std::result::Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    match String::deserialize(deserializer) {
        Ok(s) if !s.trim().is_empty() => Ok(PathBuf::from(s)),
        Ok(_) => Ok(PathBuf::new()),
        Err(e) => {
            warn!("Failed to deserialize path value: {}, using default", e);
            Ok(PathBuf::new())
        }
    }
}

fn number_or<'de, D, T>(deserializer: D, field: &str, fallback: fn() -> T) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Display,
{
    match T::deserialize(deserializer) {
        Ok(n) => Ok(n),
        Err(e) => {
            let fallback = fallback();
            warn!("Failed to deserialize {}: {}, using default {}", field, e, fallback);
            Ok(fallback)
        }
    }
}

fn monitor_interval_or_default<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    number_or(deserializer, "monitor_interval_secs", default_monitor_interval_secs)
}

fn stop_attempts_or_default<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    number_or(deserializer, "stop_attempts", default_stop_attempts)
}

fn stop_poll_interval_or_default<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    number_or(deserializer, "stop_poll_interval_ms", default_stop_poll_interval_ms)
}

fn default_relays_file() -> PathBuf {
    PathBuf::from("./data/relays.json")
}

fn default_proxies_file() -> PathBuf {
    PathBuf::from("./data/proxies.json")
}

fn default_relay_binary() -> String {
    "socat".to_string()
}

fn default_caddy_api_url() -> String {
    "http://localhost:2019".to_string()
}

fn default_monitor_interval_secs() -> u64 {
    10
}

fn default_stop_attempts() -> u32 {
    5
}

fn default_stop_poll_interval_ms() -> u64 {
    200
}
