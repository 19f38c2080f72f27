use crate::config::types::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::utils::validation::is_empty_or_whitespace;
use anyhow::Result;
use log::{debug, error, trace, warn};
use std::path::Path;

impl AppConfig {
    /// Resolve the config path from a command line argument, falling back to the default location
    pub fn resolve_config_path(arg: Option<String>) -> String {
        #[allow(clippy::collapsible_if)]
        if let Some(s) = arg {
            if !is_empty_or_whitespace(&s) {
                return s;
            }
        }
        DEFAULT_CONFIG_PATH.to_string()
    }

    /// Load configuration from a file, writing defaults when it is missing or unreadable
    pub async fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading config from: {}", path.display());
        let config = if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(mut cfg) => {
                    cfg.path = path.to_owned();
                    cfg.normalize();
                    cfg
                }
                Err(e) => {
                    error!("Failed to parse config file: {}", e);
                    // Keep the corrupted file around for inspection
                    let mut corruptions = 1;
                    let mut backup_path = path.with_extension(format!("corrupted.{}", corruptions));
                    while backup_path.exists() {
                        corruptions += 1;
                        backup_path = path.with_extension(format!("corrupted.{}", corruptions));
                    }
                    tokio::fs::rename(path, &backup_path).await?;

                    warn!("Config file corrupted (moved to {}), using default config", backup_path.display());
                    Self::save_default(path).await?
                }
            }
        } else {
            warn!("Config file not found, using default config");
            Self::save_default(path).await?
        };
        trace!("Loaded config: {:#?}", config);
        Ok(config)
    }

    /// Save the configuration to its file
    pub async fn save(&self) -> Result<()> {
        debug!("Saving config to: {}", self.path.display());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Save a default configuration to the specified path and return it
    pub async fn save_default(path: impl AsRef<Path>) -> Result<Self> {
        debug!("Saving default config to: {}", path.as_ref().display());
        let mut config = Self::new(path.as_ref());
        config.path = path.as_ref().to_owned();
        config.save().await?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(AppConfig::resolve_config_path(Some("/etc/tailrelay.json".into())), "/etc/tailrelay.json");
        assert_eq!(AppConfig::resolve_config_path(Some("   ".into())), DEFAULT_CONFIG_PATH);
        assert_eq!(AppConfig::resolve_config_path(None), DEFAULT_CONFIG_PATH);
    }

    #[tokio::test]
    async fn test_missing_config_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tailrelay.json");

        let config = AppConfig::try_load(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.get_path(), path.as_path());
        assert_eq!(config.relay_binary(), "socat");
    }

    #[tokio::test]
    async fn test_corrupted_config_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tailrelay.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let config = AppConfig::try_load(&path).await.unwrap();
        assert_eq!(config.caddy_api_url(), "http://localhost:2019");
        assert!(dir.path().join("tailrelay.corrupted.1").exists());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_saved_config_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tailrelay.json");
        let mut config = AppConfig::new(&path);
        config.set_relay_binary("/usr/bin/socat");
        config.set_caddy_api_url("http://caddy:2019");
        config.save().await.unwrap();

        let loaded = AppConfig::try_load(&path).await.unwrap();
        assert_eq!(loaded.relay_binary(), "/usr/bin/socat");
        assert_eq!(loaded.caddy_api_url(), "http://caddy:2019");
    }
}
