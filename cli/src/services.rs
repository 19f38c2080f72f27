use std::sync::Arc;
use tailrelay::{AppConfig, Autostart, CaddyClient, ProxyManager, ProxyRegistry, RelayRegistry, Supervisor};

/// The core objects every command works with, wired from one configuration.
pub struct Services {
    pub supervisor: Arc<Supervisor>,
    pub proxies: Arc<ProxyManager>,
}

impl Services {
    pub fn from_config(config: &AppConfig) -> Self {
        let relays = Arc::new(RelayRegistry::new(config.relays_file()));
        let proxies = Arc::new(ProxyRegistry::new(config.proxies_file()));
        let supervisor = Arc::new(Supervisor::from_config(config, relays));
        let proxies = Arc::new(ProxyManager::new(proxies, CaddyClient::new(config.caddy_api_url())));
        Self { supervisor, proxies }
    }

    pub fn autostart(&self) -> Autostart {
        Autostart::new(self.proxies.clone(), self.supervisor.clone())
    }
}
