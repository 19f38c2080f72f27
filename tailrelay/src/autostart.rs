//! Boot-time reconciliation: bring caddy and the relay processes in line with the
//! autostart policy stored in the registries.

use crate::error::{ProxyError, RelayError};
use crate::proxy::ProxyManager;
use crate::relay::{BatchReport, Supervisor};
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct Autostart {
    proxies: Arc<ProxyManager>,
    supervisor: Arc<Supervisor>,
}

impl Autostart {
    pub fn new(proxies: Arc<ProxyManager>, supervisor: Arc<Supervisor>) -> Self {
        Self { proxies, supervisor }
    }

    /// Set every proxy's `enabled` to its `autostart` flag, then publish the enabled
    /// ones and retract the rest. Individual failures are counted, never fatal.
    pub async fn initialize_proxies(&self) -> Result<BatchReport, ProxyError> {
        let registry = self.proxies.registry();
        let mut records = registry.load().await?;
        info!("Initializing {} proxy route(s)", records.len());

        let mut report = BatchReport::default();
        for record in records.iter_mut() {
            if record.enabled != record.autostart {
                debug!("Proxy {}: enabled {} -> {}", record.id, record.enabled, record.autostart);
            }
            record.enabled = record.autostart;
            if let Err(e) = registry.set_enabled(&record.id, record.autostart).await {
                warn!("Failed to persist enabled flag for proxy {}: {}", record.id, e);
            }
        }

        // Without a listing every disabled slot is retracted, which is harmless when absent
        let live: Option<BTreeSet<String>> = match self.proxies.client().list_servers().await {
            Ok(servers) => Some(servers.into_keys().collect()),
            Err(e) => {
                warn!("Could not list caddy servers, retracting every disabled proxy: {}", e);
                None
            }
        };

        for record in &records {
            if !record.enabled && live.as_ref().is_some_and(|live| !live.contains(&record.server_name)) {
                debug!("Proxy {} is disabled and not live", record.id);
                report.skipped += 1;
                continue;
            }
            match self.proxies.sync_proxy(record).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    error!("Failed to reconcile proxy {}: {}", record.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Proxy initialization complete: {} reconciled, {} failed, {} skipped",
            report.succeeded, report.failed, report.skipped
        );
        Ok(report)
    }

    pub async fn initialize_relays(&self) -> Result<BatchReport, RelayError> {
        self.supervisor.start_all().await
    }

    /// Full boot sequence. Every failure is logged and the boot goes on.
    pub async fn initialize(&self) {
        info!("Running autostart");
        if let Err(e) = self.proxies.migrate_existing().await {
            warn!("Failed to import existing caddy servers: {}", e);
        }
        if let Err(e) = self.initialize_proxies().await {
            warn!("Failed to initialize proxies: {}", e);
        }
        if let Err(e) = self.initialize_relays().await {
            warn!("Failed to initialize relays: {}", e);
        }
        info!("Autostart finished");
    }
}
