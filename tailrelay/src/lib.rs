//! Core of tailrelay: a supervisor for `socat` relay processes and a
//! reconciler that keeps Caddy's live route table in line with the local
//! proxy registry.

pub mod autostart;
pub mod config;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod relay;
pub mod utils;

pub use autostart::Autostart;
pub use config::AppConfig;
pub use error::{ProxyError, RegistryError, RelayError};
pub use proxy::{CaddyClient, ProxyManager};
pub use registry::{ProxyRecord, ProxyRegistry, RelayRegistry, RelaySpec};
pub use relay::{BatchReport, RelayMonitor, Supervisor};
