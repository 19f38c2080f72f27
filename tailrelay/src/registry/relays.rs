use crate::error::RegistryError;
use crate::registry::{read_document, write_document};
use crate::utils::validation::{is_empty_or_whitespace, validate_port_range};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// A socat relay: listen on `listen_port`, forward every connection to `target_host:target_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySpec {
    pub id: String,
    pub listen_port: u16,
    pub target_host: String,
    pub target_port: u16,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub autostart: bool,
    /// Last PID the supervisor spawned for this relay, 0 when none. Only a claim:
    /// it is re-verified before being trusted.
    #[serde(default)]
    pub pid: i32,
}

impl RelaySpec {
    pub fn new(id: impl Into<String>, listen_port: u16, target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            id: id.into(),
            listen_port,
            target_host: target_host.into(),
            target_port,
            enabled: true,
            autostart: false,
            pid: 0,
        }
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if is_empty_or_whitespace(&self.id) {
            return Err(RegistryError::Invalid("relay id must not be empty".to_string()));
        }
        validate_port_range(self.listen_port).map_err(|e| RegistryError::Invalid(format!("listen port: {}", e)))?;
        if is_empty_or_whitespace(&self.target_host) {
            return Err(RegistryError::Invalid("target host must not be empty".to_string()));
        }
        validate_port_range(self.target_port).map_err(|e| RegistryError::Invalid(format!("target port: {}", e)))?;
        Ok(())
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

/// Partial update of a relay. Only the provided fields are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayPatch {
    pub listen_port: Option<u16>,
    pub target_host: Option<String>,
    pub target_port: Option<u16>,
    pub autostart: Option<bool>,
}

impl RelayPatch {
    pub fn apply(self, relay: &mut RelaySpec) {
        if let Some(port) = self.listen_port {
            relay.listen_port = port;
        }
        if let Some(host) = self.target_host {
            relay.target_host = host;
        }
        if let Some(port) = self.target_port {
            relay.target_port = port;
        }
        if let Some(autostart) = self.autostart {
            relay.autostart = autostart;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listen_port.is_none() && self.target_host.is_none() && self.target_port.is_none() && self.autostart.is_none()
    }
}

/// Ordered, file-backed list of relays.
pub struct RelayRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RelayRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_owned(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Vec<RelaySpec>, RegistryError> {
        let _guard = self.lock.lock().await;
        read_document(&self.path).await
    }

    pub async fn get(&self, id: &str) -> Result<RelaySpec, RegistryError> {
        self.load()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn add(&self, mut spec: RelaySpec) -> Result<RelaySpec, RegistryError> {
        spec.validate()?;
        // A freshly registered relay has no process yet
        spec.pid = 0;

        let _guard = self.lock.lock().await;
        let mut relays: Vec<RelaySpec> = read_document(&self.path).await?;
        if relays.iter().any(|r| r.id == spec.id) {
            return Err(RegistryError::Duplicate(spec.id));
        }
        info!("Adding relay {}: :{} -> {}", spec.id, spec.listen_port, spec.target());
        relays.push(spec.clone());
        write_document(&self.path, &relays).await?;
        Ok(spec)
    }

    /// Apply `f` to the relay `id` and persist it. The id itself cannot be changed.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<RelaySpec, RegistryError>
    where
        F: FnOnce(&mut RelaySpec),
    {
        let _guard = self.lock.lock().await;
        let mut relays: Vec<RelaySpec> = read_document(&self.path).await?;
        let relay = relays.iter_mut().find(|r| r.id == id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let mut updated = relay.clone();
        f(&mut updated);
        if updated.id != id {
            return Err(RegistryError::Invalid(format!("relay id cannot change ({} -> {})", id, updated.id)));
        }
        updated.validate()?;
        *relay = updated.clone();
        write_document(&self.path, &relays).await?;
        Ok(updated)
    }

    pub async fn remove(&self, id: &str) -> Result<RelaySpec, RegistryError> {
        let _guard = self.lock.lock().await;
        let mut relays: Vec<RelaySpec> = read_document(&self.path).await?;
        let index = relays.iter().position(|r| r.id == id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let removed = relays.remove(index);
        write_document(&self.path, &relays).await?;
        info!("Removed relay {}", id);
        Ok(removed)
    }

    pub async fn set_pid(&self, id: &str, pid: i32) -> Result<RelaySpec, RegistryError> {
        debug!("Recording PID {} for relay {}", pid, id);
        self.update(id, |r| r.pid = pid).await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<RelaySpec, RegistryError> {
        self.update(id, |r| r.enabled = enabled).await
    }

    /// Clear the stored PID only if it still is `expected`, so a PID written by a
    /// concurrent start is not lost. Returns whether the entry was cleared.
    pub async fn clear_pid_if(&self, id: &str, expected: i32) -> Result<bool, RegistryError> {
        let mut cleared = false;
        self.update(id, |r| {
            if r.pid == expected {
                r.pid = 0;
                cleared = true;
            }
        })
        .await?;
        Ok(cleared)
    }
}
