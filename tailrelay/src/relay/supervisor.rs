use crate::config::AppConfig;
use crate::error::RelayError;
use crate::registry::{RelayPatch, RelayRegistry, RelaySpec};
use crate::relay::process::{ProcessLauncher, UnixProcesses};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A relay together with what was observed about its process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub relay: RelaySpec,
    pub running: bool,
}

/// Outcome of a bulk operation. Individual failures never abort the batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// How long `stop` waits for a relay to exit before escalating to SIGKILL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self { attempts: 5, interval: Duration::from_millis(200) }
    }
}

/// Owns the lifecycle of socat relay processes and their PID bookkeeping.
pub struct Supervisor {
    registry: Arc<RelayRegistry>,
    launcher: Arc<dyn ProcessLauncher>,
    binary: String,
    stop_policy: StopPolicy,
}

impl Supervisor {
    pub fn new(registry: Arc<RelayRegistry>, binary: impl Into<String>) -> Self {
        Self::with_launcher(registry, binary, Arc::new(UnixProcesses))
    }

    pub fn with_launcher(registry: Arc<RelayRegistry>, binary: impl Into<String>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self { registry, launcher, binary: binary.into(), stop_policy: StopPolicy::default() }
    }

    pub fn from_config(config: &AppConfig, registry: Arc<RelayRegistry>) -> Self {
        Self::new(registry, config.relay_binary())
            .with_stop_policy(StopPolicy { attempts: config.stop_attempts(), interval: config.stop_poll_interval() })
    }

    pub fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<RelayRegistry> {
        &self.registry
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// socat arguments: listen on the relay port, fork per connection, reuse the address.
    pub fn relay_args(relay: &RelaySpec) -> Vec<String> {
        vec![
            format!("tcp-listen:{},fork,reuseaddr", relay.listen_port),
            format!("tcp:{}:{}", relay.target_host, relay.target_port),
        ]
    }

    /// A PID counts as a running relay only if the process answers the liveness probe,
    /// is a process rather than a thread, is not a zombie and is named like the relay binary.
    pub fn is_running(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        let handle = self.launcher.handle(pid);
        handle.is_alive() && handle.matches_expected_identity(&self.binary)
    }

    async fn clear_pid(&self, relay: &mut RelaySpec) {
        relay.pid = 0;
        if let Err(e) = self.registry.set_pid(&relay.id, 0).await {
            warn!("Failed to clear PID for relay {} in registry: {}", relay.id, e);
        }
    }

    pub async fn start(&self, relay: &mut RelaySpec) -> Result<(), RelayError> {
        debug!(
            "Start requested for relay {} (listen={}, target={})",
            relay.id,
            relay.listen_port,
            relay.target()
        );

        if !relay.enabled {
            warn!("Attempted to start disabled relay {}", relay.id);
            return Err(RelayError::AlreadyDisabled(relay.id.clone()));
        }

        if relay.pid != 0 {
            if self.is_running(relay.pid) {
                warn!("Relay {} already running with PID {}", relay.id, relay.pid);
                return Err(RelayError::AlreadyRunning { id: relay.id.clone(), pid: relay.pid });
            }
            info!("Clearing stale PID {} for relay {} before starting", relay.pid, relay.id);
            self.clear_pid(relay).await;
        }

        let args = Self::relay_args(relay);
        debug!("Starting {} {}", self.binary, args.join(" "));
        let pid = self.launcher.spawn(&self.binary, &args).map_err(|source| {
            error!("Failed to start relay {} on port {}: {}", relay.id, relay.listen_port, source);
            RelayError::Spawn { binary: self.binary.clone(), source }
        })?;

        // The process is up whether or not the bookkeeping succeeds
        relay.pid = pid;
        if let Err(e) = self.registry.set_pid(&relay.id, pid).await {
            warn!("Failed to record PID {} for relay {}: {}", pid, relay.id, e);
        }

        info!("Started relay {} (PID {}): 0.0.0.0:{} -> {}", relay.id, pid, relay.listen_port, relay.target());
        Ok(())
    }

    pub async fn stop(&self, relay: &mut RelaySpec) -> Result<(), RelayError> {
        debug!("Stop requested for relay {} (PID {})", relay.id, relay.pid);

        if relay.pid == 0 {
            debug!("Relay {} has no PID, already stopped", relay.id);
            return Ok(());
        }

        let pid = relay.pid;
        if !self.is_running(pid) {
            debug!("Process {} for relay {} is already gone, clearing PID", pid, relay.id);
            self.clear_pid(relay).await;
            return Ok(());
        }

        let handle = self.launcher.handle(pid);
        debug!("Sending SIGTERM to process group {}", pid);
        if let Err(e) = handle.terminate(true) {
            if !self.is_running(pid) {
                debug!("Signalling {} failed ({}) but it is no longer running", pid, e);
                self.clear_pid(relay).await;
                return Ok(());
            }
            error!("Failed to stop relay {} (PID {}): {}", relay.id, pid, e);
            return Err(RelayError::SignalFailed { pid, source: e });
        }

        let attempts = self.stop_policy.attempts.max(1);
        for attempt in 1..=attempts {
            if !self.is_running(pid) {
                debug!("Process {} terminated", pid);
                break;
            }
            if attempt == attempts {
                warn!("Process {} did not terminate gracefully, sending SIGKILL", pid);
                if let Err(e) = handle.terminate(false) {
                    // Bounded failure: the PID is cleared below and the process may be orphaned
                    warn!("SIGKILL for process {} failed: {}", pid, e);
                }
            }
            tokio::time::sleep(self.stop_policy.interval).await;
        }

        self.clear_pid(relay).await;
        info!("Stopped relay {} (was PID {})", relay.id, pid);
        Ok(())
    }

    pub async fn restart(&self, relay: &mut RelaySpec) -> Result<(), RelayError> {
        debug!("Restart requested for relay {}", relay.id);
        if relay.pid != 0 {
            if let Err(e) = self.stop(relay).await {
                warn!("Failed to stop relay {} during restart: {}", relay.id, e);
            }
        }
        self.start(relay).await
    }

    /// Clear stale PIDs, then start every relay marked autostart. Starting forces `enabled`.
    pub async fn start_all(&self) -> Result<BatchReport, RelayError> {
        let mut relays = self.registry.load().await.map_err(|e| {
            error!("Failed to load relays from {}: {}", self.registry.path().display(), e);
            e
        })?;

        let mut stale = 0;
        for relay in relays.iter_mut().filter(|r| r.pid != 0) {
            if !self.is_running(relay.pid) {
                info!("Clearing stale PID {} for relay {}", relay.pid, relay.id);
                match self.registry.clear_pid_if(&relay.id, relay.pid).await {
                    Ok(_) => {
                        relay.pid = 0;
                        stale += 1;
                    }
                    Err(e) => warn!("Failed to clear stale PID for relay {}: {}", relay.id, e),
                }
            }
        }
        if stale > 0 {
            info!("Cleared {} stale PID(s)", stale);
        }

        let mut report = BatchReport::default();
        for relay in relays.iter_mut() {
            if !relay.autostart {
                debug!("Skipping relay {} (autostart disabled)", relay.id);
                report.skipped += 1;
                continue;
            }
            if !relay.enabled {
                relay.enabled = true;
                if let Err(e) = self.registry.set_enabled(&relay.id, true).await {
                    warn!("Failed to persist enabled flag for relay {}: {}", relay.id, e);
                }
            }
            match self.start(relay).await {
                Ok(()) => report.succeeded += 1,
                Err(RelayError::AlreadyRunning { pid, .. }) => {
                    info!("Relay {} is already running with PID {}", relay.id, pid);
                    report.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to start relay {}: {}", relay.id, e);
                    report.failed += 1;
                }
            }
        }

        info!("Start all complete: {} started, {} failed, {} skipped", report.succeeded, report.failed, report.skipped);
        Ok(report)
    }

    pub async fn stop_all(&self) -> Result<BatchReport, RelayError> {
        let mut relays = self.registry.load().await.map_err(|e| {
            error!("Failed to load relays from {}: {}", self.registry.path().display(), e);
            e
        })?;

        let mut report = BatchReport::default();
        for relay in relays.iter_mut() {
            if relay.pid == 0 {
                debug!("Skipping relay {} (no PID)", relay.id);
                report.skipped += 1;
                continue;
            }
            match self.stop(relay).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    error!("Failed to stop relay {}: {}", relay.id, e);
                    report.failed += 1;
                }
            }
        }

        info!("Stop all complete: {} stopped, {} failed", report.succeeded, report.failed);
        Ok(report)
    }

    pub async fn restart_all(&self) -> Result<BatchReport, RelayError> {
        info!("Restarting all relays");
        if let Err(e) = self.stop_all().await {
            warn!("Error stopping relays during restart: {}", e);
        }
        self.start_all().await
    }

    /// Every relay with its observed state. Stale PIDs found along the way are cleared.
    pub async fn status(&self) -> Result<Vec<RelayStatus>, RelayError> {
        let relays = self.registry.load().await?;
        let mut statuses = self.observe(relays);
        self.repair(&mut statuses).await;
        Ok(statuses)
    }

    /// Repair pass without reporting, used by the monitor. Returns how many PIDs were cleared.
    pub async fn sweep(&self) -> Result<usize, RelayError> {
        let relays = self.registry.load().await?;
        let mut statuses = self.observe(relays);
        Ok(self.repair(&mut statuses).await)
    }

    /// Check every stored PID against the process table. Does not touch the registry.
    pub fn observe(&self, relays: Vec<RelaySpec>) -> Vec<RelayStatus> {
        relays
            .into_iter()
            .map(|relay| {
                let running = relay.pid != 0 && self.is_running(relay.pid);
                RelayStatus { relay, running }
            })
            .collect()
    }

    /// Clear the registry PID of every observed relay that holds a PID but is not running.
    pub async fn repair(&self, statuses: &mut [RelayStatus]) -> usize {
        let mut cleaned = 0;
        for status in statuses.iter_mut().filter(|s| !s.running && s.relay.pid != 0) {
            let relay = &mut status.relay;
            info!("Detected dead process for relay {} (PID {}), cleaning up", relay.id, relay.pid);
            match self.registry.clear_pid_if(&relay.id, relay.pid).await {
                Ok(true) => {
                    relay.pid = 0;
                    cleaned += 1;
                }
                Ok(false) => debug!("PID for relay {} changed since it was observed, leaving it", relay.id),
                Err(e) => warn!("Failed to clear PID for relay {}: {}", relay.id, e),
            }
        }
        if cleaned > 0 {
            info!("Cleaned up {} dead process(es)", cleaned);
        }
        cleaned
    }

    pub async fn start_relay(&self, id: &str) -> Result<RelaySpec, RelayError> {
        let mut relay = self.registry.get(id).await?;
        self.start(&mut relay).await?;
        Ok(relay)
    }

    pub async fn stop_relay(&self, id: &str) -> Result<RelaySpec, RelayError> {
        let mut relay = self.registry.get(id).await?;
        self.stop(&mut relay).await?;
        Ok(relay)
    }

    pub async fn restart_relay(&self, id: &str) -> Result<RelaySpec, RelayError> {
        let mut relay = self.registry.get(id).await?;
        self.restart(&mut relay).await?;
        Ok(relay)
    }

    /// Register a relay and start it right away when it is enabled.
    pub async fn add_relay(&self, spec: RelaySpec) -> Result<RelaySpec, RelayError> {
        let mut relay = self.registry.add(spec).await?;
        if relay.enabled {
            self.start(&mut relay).await?;
        }
        Ok(relay)
    }

    /// Apply `patch`; a relay that was running is restarted so the new settings take effect.
    pub async fn update_relay(&self, id: &str, patch: RelayPatch) -> Result<RelaySpec, RelayError> {
        let current = self.registry.get(id).await?;
        let was_running = current.pid != 0 && self.is_running(current.pid);

        let mut relay = self.registry.update(id, |r| patch.apply(r)).await?;
        if was_running {
            self.restart(&mut relay).await?;
        }
        Ok(relay)
    }

    /// Stop the relay's process, then forget the relay.
    pub async fn remove_relay(&self, id: &str) -> Result<RelaySpec, RelayError> {
        let mut relay = self.registry.get(id).await?;
        self.stop(&mut relay).await?;
        Ok(self.registry.remove(id).await?)
    }

    /// Enabling starts the relay, disabling stops it first.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<RelaySpec, RelayError> {
        if enabled {
            let mut relay = self.registry.set_enabled(id, true).await?;
            if !(relay.pid != 0 && self.is_running(relay.pid)) {
                self.start(&mut relay).await?;
            }
            Ok(relay)
        } else {
            let mut relay = self.registry.get(id).await?;
            self.stop(&mut relay).await?;
            Ok(self.registry.set_enabled(id, false).await?)
        }
    }

    pub async fn toggle_relay(&self, id: &str) -> Result<RelaySpec, RelayError> {
        let relay = self.registry.get(id).await?;
        self.set_enabled(id, !relay.enabled).await
    }
}
