// Registry module
//
// File-backed stores for the two domains. Each store is an explicit object that
// callers share, and every mutation is a read-modify-persist cycle on one entry.
// - relays: socat relay specs plus their last known PID
// - proxies: caddy proxy records plus the server slot allocation table

pub mod proxies;
pub mod relays;

pub use proxies::{ProxyRecord, ProxyRegistry, SlotInfo};
pub use relays::{RelayPatch, RelayRegistry, RelaySpec};

use crate::error::RegistryError;
use log::trace;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read a registry document; a missing or blank file is an empty registry.
pub(crate) async fn read_document<T>(path: &Path) -> Result<T, RegistryError>
where
    T: DeserializeOwned + Default,
{
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            trace!("Registry {} does not exist yet", path.display());
            return Ok(T::default());
        }
        Err(source) => return Err(RegistryError::Io { path: path.to_owned(), source }),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|source| RegistryError::Parse { path: path.to_owned(), source })
}

/// Persist a registry document by writing a sibling temp file and renaming it into place.
pub(crate) async fn write_document<T>(path: &Path, value: &T) -> Result<(), RegistryError>
where
    T: Serialize,
{
    let io_err = |source| RegistryError::Io { path: path.to_owned(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let content = serde_json::to_vec_pretty(value).map_err(|e| io_err(std::io::Error::other(e)))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    trace!("Persisted registry {}", path.display());
    Ok(())
}
