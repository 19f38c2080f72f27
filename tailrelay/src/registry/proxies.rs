use crate::error::RegistryError;
use crate::registry::{read_document, write_document};
use crate::utils::validation::{is_empty_or_whitespace, validate_hostname_chars, validate_port_range, validate_upstream};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// A reverse proxy route served by caddy under its own server slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub id: String,
    pub hostname: String,
    /// Port caddy listens on for this route
    pub port: u16,
    /// Upstream as host:port
    pub target: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub autostart: bool,
    /// Caddy server slot, assigned on add and never changed afterwards
    #[serde(default)]
    pub server_name: String,
}

impl ProxyRecord {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>, port: u16, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            port,
            target: target.into(),
            enabled: true,
            autostart: false,
            server_name: String::new(),
        }
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if is_empty_or_whitespace(&self.id) {
            return Err(RegistryError::Invalid("proxy id must not be empty".to_string()));
        }
        if !validate_hostname_chars(&self.hostname) {
            return Err(RegistryError::Invalid(format!("invalid hostname '{}'", self.hostname)));
        }
        validate_port_range(self.port).map_err(|e| RegistryError::Invalid(format!("port: {}", e)))?;
        validate_upstream(&self.target).map_err(RegistryError::Invalid)?;
        Ok(())
    }
}

/// Bookkeeping for an allocated server slot. Released slots stay in the table so the
/// name is never handed out again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub proxy_id: String,
    #[serde(default)]
    pub released: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProxyDocument {
    #[serde(default)]
    proxies: Vec<ProxyRecord>,
    #[serde(default)]
    servers: BTreeMap<String, SlotInfo>,
}

pub struct ProxyRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProxyRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_owned(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<ProxyDocument, RegistryError> {
        read_document(&self.path).await
    }

    pub async fn load(&self) -> Result<Vec<ProxyRecord>, RegistryError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.proxies)
    }

    pub async fn get(&self, id: &str) -> Result<ProxyRecord, RegistryError> {
        self.load()
            .await?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn slots(&self) -> Result<BTreeMap<String, SlotInfo>, RegistryError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.servers)
    }

    /// Every server name this registry has ever handed out or adopted.
    pub async fn known_server_names(&self) -> Result<BTreeSet<String>, RegistryError> {
        let _guard = self.lock.lock().await;
        let doc = self.read().await?;
        let mut names: BTreeSet<String> = doc.servers.into_keys().collect();
        names.extend(doc.proxies.into_iter().map(|p| p.server_name).filter(|n| !n.is_empty()));
        Ok(names)
    }

    /// Store a new record and claim its server slot in the same write.
    pub async fn insert(&self, record: ProxyRecord) -> Result<ProxyRecord, RegistryError> {
        record.validate()?;
        if is_empty_or_whitespace(&record.server_name) {
            return Err(RegistryError::Invalid(format!("proxy {} has no server name", record.id)));
        }

        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        if doc.proxies.iter().any(|p| p.id == record.id) {
            return Err(RegistryError::Duplicate(record.id));
        }
        let claimed_by_record = doc
            .servers
            .get(&record.server_name)
            .is_some_and(|slot| !slot.released && slot.proxy_id == record.id);
        if (doc.servers.contains_key(&record.server_name) && !claimed_by_record)
            || doc.proxies.iter().any(|p| p.server_name == record.server_name)
        {
            return Err(RegistryError::Duplicate(record.server_name));
        }
        info!("Adding proxy {}: {}:{} -> {} ({})", record.id, record.hostname, record.port, record.target, record.server_name);
        doc.servers.insert(record.server_name.clone(), SlotInfo { proxy_id: record.id.clone(), released: false });
        doc.proxies.push(record.clone());
        write_document(&self.path, &doc).await?;
        Ok(record)
    }

    /// Reserve `name` for `proxy_id` ahead of inserting the record. Fails if the name was
    /// ever handed out before.
    pub async fn claim_slot(&self, name: &str, proxy_id: &str) -> Result<(), RegistryError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        if doc.servers.contains_key(name) || doc.proxies.iter().any(|p| p.server_name == name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        debug!("Claiming server slot {} for proxy {}", name, proxy_id);
        doc.servers.insert(name.to_string(), SlotInfo { proxy_id: proxy_id.to_string(), released: false });
        write_document(&self.path, &doc).await
    }

    /// Apply `f` to the record `id` and persist it. The id and server name are fixed.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<ProxyRecord, RegistryError>
    where
        F: FnOnce(&mut ProxyRecord),
    {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        let record = doc.proxies.iter_mut().find(|p| p.id == id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let mut updated = record.clone();
        f(&mut updated);
        if updated.id != record.id || updated.server_name != record.server_name {
            return Err(RegistryError::Invalid(format!("proxy {} cannot change its id or server name", id)));
        }
        updated.validate()?;
        *record = updated.clone();
        write_document(&self.path, &doc).await?;
        debug!("Updated proxy {}", id);
        Ok(updated)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<ProxyRecord, RegistryError> {
        self.update(id, |p| p.enabled = enabled).await
    }

    /// Remove the record and mark its slot released.
    pub async fn remove(&self, id: &str) -> Result<ProxyRecord, RegistryError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        let index = doc.proxies.iter().position(|p| p.id == id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let removed = doc.proxies.remove(index);
        doc.servers
            .entry(removed.server_name.clone())
            .and_modify(|slot| slot.released = true)
            .or_insert_with(|| {
                warn!("Proxy {} had no slot entry for {}, recording it as released", id, removed.server_name);
                SlotInfo { proxy_id: removed.id.clone(), released: true }
            });
        write_document(&self.path, &doc).await?;
        info!("Removed proxy {} (slot {} released)", id, removed.server_name);
        Ok(removed)
    }
}
