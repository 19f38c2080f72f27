use std::path::PathBuf;
use thiserror::Error;

/// Failures of the file-backed registries.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to access registry file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("entry already exists: {0}")]
    Duplicate(String),

    #[error("invalid entry: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay {id} already running with PID {pid}")]
    AlreadyRunning { id: String, pid: i32 },

    #[error("relay {0} is disabled")]
    AlreadyDisabled(String),

    #[error("failed to signal process {pid}: {source}")]
    SignalFailed {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Any non-2xx answer from the admin API that is not the "nothing configured yet" case.
    #[error("caddy API {method} {path} returned {status}: {body}")]
    Remote {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    #[error("caddy API request failed: {0}")]
    Transport(#[from] hyper::Error),

    #[error("caddy API {method} {path} timed out")]
    Timeout { method: String, path: String },

    #[error("invalid caddy API request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("invalid JSON from caddy API: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
