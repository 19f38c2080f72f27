// Proxy module
//
// Caddy-backed reverse proxy routes:
// - client: the admin API calls (list, ensure path, upsert, delete)
// - manager: registry operations that keep records and server slots in step

pub mod client;
pub mod manager;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{CaddyClient, RemoteServer};
pub use manager::{ProxyManager, ProxyPatch, ProxyStatus};
