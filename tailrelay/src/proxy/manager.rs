use crate::error::{ProxyError, RegistryError};
use crate::proxy::client::{CaddyClient, RemoteServer};
use crate::registry::{ProxyRecord, ProxyRegistry};
use crate::utils::validation::is_empty_or_whitespace;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SERVER_PREFIX: &str = "srv";

/// Partial update of a proxy. Only the provided fields are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyPatch {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub target: Option<String>,
    pub autostart: Option<bool>,
}

impl ProxyPatch {
    pub fn apply(self, record: &mut ProxyRecord) {
        if let Some(hostname) = self.hostname {
            record.hostname = hostname;
        }
        if let Some(port) = self.port {
            record.port = port;
        }
        if let Some(target) = self.target {
            record.target = target;
        }
        if let Some(autostart) = self.autostart {
            record.autostart = autostart;
        }
    }
}

/// A proxy record and whether caddy currently serves its slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyStatus {
    pub proxy: ProxyRecord,
    pub live: bool,
}

/// Keeps proxy records and their caddy server slots in step.
pub struct ProxyManager {
    registry: Arc<ProxyRegistry>,
    client: CaddyClient,
}

impl ProxyManager {
    pub fn new(registry: Arc<ProxyRegistry>, client: CaddyClient) -> Self {
        Self { registry, client }
    }

    pub fn registry(&self) -> &Arc<ProxyRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &CaddyClient {
        &self.client
    }

    /// The lowest `srvN` that neither caddy nor the registry has ever used.
    pub async fn allocate_server_name(&self) -> Result<String, ProxyError> {
        let remote = self.client.list_servers().await?;
        let local = self.registry.known_server_names().await?;
        let name = (0u64..)
            .map(|n| format!("{}{}", SERVER_PREFIX, n))
            .find(|name| !remote.contains_key(name) && !local.contains(name))
            .unwrap_or_default();
        debug!("Allocated server name {}", name);
        Ok(name)
    }

    /// Register a proxy under a fresh slot and publish it when enabled. The record is
    /// kept even when publishing fails.
    pub async fn add_proxy(&self, mut record: ProxyRecord) -> Result<ProxyRecord, ProxyError> {
        if is_empty_or_whitespace(&record.id) {
            record.id = format!("{}-{}", record.hostname, record.port);
        }
        record.validate()?;
        match self.registry.get(&record.id).await {
            Ok(_) => return Err(RegistryError::Duplicate(record.id).into()),
            Err(RegistryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        record.server_name = self.allocate_server_name().await?;
        self.registry.claim_slot(&record.server_name, &record.id).await?;
        let record = self.registry.insert(record).await?;
        if record.enabled {
            self.sync_proxy(&record).await?;
        }
        Ok(record)
    }

    pub async fn get_proxy(&self, id: &str) -> Result<ProxyRecord, ProxyError> {
        Ok(self.registry.get(id).await?)
    }

    pub async fn list_proxies(&self) -> Result<Vec<ProxyRecord>, ProxyError> {
        Ok(self.registry.load().await?)
    }

    /// Every record with its live state. A failed listing reports everything as not live.
    pub async fn statuses(&self) -> Result<Vec<ProxyStatus>, ProxyError> {
        let records = self.registry.load().await?;
        let remote = match self.client.list_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                warn!("Could not list caddy servers: {}", e);
                Default::default()
            }
        };
        Ok(records
            .into_iter()
            .map(|proxy| {
                let live = remote.contains_key(&proxy.server_name);
                ProxyStatus { proxy, live }
            })
            .collect())
    }

    pub async fn update_proxy(&self, id: &str, patch: ProxyPatch) -> Result<ProxyRecord, ProxyError> {
        let record = self.registry.update(id, |p| patch.apply(p)).await?;
        self.sync_proxy(&record).await?;
        Ok(record)
    }

    /// Retract the route, then forget the record. The slot name stays reserved.
    pub async fn delete_proxy(&self, id: &str) -> Result<ProxyRecord, ProxyError> {
        let record = self.registry.get(id).await?;
        self.client.delete_server(&record.server_name).await?;
        Ok(self.registry.remove(id).await?)
    }

    pub async fn toggle_proxy(&self, id: &str) -> Result<ProxyRecord, ProxyError> {
        let current = self.registry.get(id).await?;
        let record = self.registry.set_enabled(id, !current.enabled).await?;
        info!("Proxy {} is now {}", id, if record.enabled { "enabled" } else { "disabled" });
        self.sync_proxy(&record).await?;
        Ok(record)
    }

    /// Make caddy match the record: enabled publishes the route, disabled retracts it.
    pub async fn sync_proxy(&self, record: &ProxyRecord) -> Result<(), ProxyError> {
        if record.enabled {
            self.client.ensure_servers_path().await?;
            self.client.upsert_server(&record.server_name, &CaddyClient::server_config(record)).await?;
            info!("Published proxy {} as {} ({}:{} -> {})", record.id, record.server_name, record.hostname, record.port, record.target);
        } else {
            self.client.delete_server(&record.server_name).await?;
            info!("Retracted proxy {} ({})", record.id, record.server_name);
        }
        Ok(())
    }

    /// Adopt caddy servers that no record claims, so they are managed and their names
    /// are never handed out again. Returns how many were imported.
    pub async fn migrate_existing(&self) -> Result<usize, ProxyError> {
        let remote = self.client.list_servers().await?;
        let known = self.registry.known_server_names().await?;

        let mut imported = 0;
        for (name, server) in remote.iter().filter(|(name, _)| !known.contains(*name)) {
            let Some(parsed) = RemoteServer::parse(server) else {
                warn!("Skipping caddy server {}: no host matcher, listen port or upstream", name);
                continue;
            };

            let base_id = format!("{}-{}", parsed.hostname, parsed.port);
            let id = match self.registry.get(&base_id).await {
                Err(RegistryError::NotFound(_)) => base_id,
                Ok(_) => format!("{}-{}", base_id, name),
                Err(e) => return Err(e.into()),
            };

            let mut record = ProxyRecord::new(id, parsed.hostname, parsed.port, parsed.target);
            record.autostart = true;
            record.server_name = name.clone();
            match self.registry.insert(record).await {
                Ok(record) => {
                    info!("Imported caddy server {} as proxy {}", name, record.id);
                    imported += 1;
                }
                Err(e) => warn!("Skipping caddy server {}: {}", name, e),
            }
        }
        if imported > 0 {
            info!("Imported {} existing caddy server(s)", imported);
        }
        Ok(imported)
    }
}
