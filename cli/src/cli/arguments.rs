use crate::services::Services;
use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{error, info, warn};
use tailrelay::proxy::ProxyPatch;
use tailrelay::registry::RelayPatch;
use tailrelay::relay::{BatchReport, RelayStatus};
use tailrelay::{AppConfig, ProxyRecord, RelaySpec};

/// CLI-specific wrapper for RelaySpec with clap Args support
#[derive(Debug, Clone, Args)]
pub struct RelayArgs {
    #[arg(short = 'l', long = "listen-port", help = "Local port socat listens on")]
    pub listen_port: u16,

    #[arg(short = 't', long = "target-host", help = "Host to forward connections to")]
    pub target_host: String,

    #[arg(short = 'p', long = "target-port", help = "Port to forward connections to")]
    pub target_port: u16,

    #[arg(short = 'a', long = "autostart", default_value = "false", help = "Start this relay when tailrelay boots")]
    pub autostart: bool,

    #[arg(short = 'd', long = "disabled", default_value = "false", help = "Register the relay without starting it")]
    pub disabled: bool,
}

impl RelayArgs {
    pub fn into_spec(self, id: String) -> RelaySpec {
        let mut spec = RelaySpec::new(id, self.listen_port, self.target_host, self.target_port);
        spec.autostart = self.autostart;
        spec.enabled = !self.disabled;
        spec
    }
}

/// CLI-specific wrapper for ProxyRecord with clap Args support
#[derive(Debug, Clone, Args)]
pub struct ProxyArgs {
    #[arg(short = 'i', long = "id", help = "Proxy id, defaults to <hostname>-<port>")]
    pub id: Option<String>,

    #[arg(short = 'P', long = "port", help = "Port caddy listens on for this host")]
    pub port: u16,

    #[arg(short = 't', long = "target", help = "Upstream to proxy to, as host:port")]
    pub target: String,

    #[arg(short = 'a', long = "autostart", default_value = "false", help = "Publish this proxy when tailrelay boots")]
    pub autostart: bool,

    #[arg(short = 'd', long = "disabled", default_value = "false", help = "Register the proxy without publishing it")]
    pub disabled: bool,
}

impl ProxyArgs {
    pub fn into_record(self, hostname: String) -> ProxyRecord {
        let mut record = ProxyRecord::new(self.id.unwrap_or_default(), hostname, self.port, self.target);
        record.autostart = self.autostart;
        record.enabled = !self.disabled;
        record
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "tailrelay", about, author, version, long_about = None, propagate_version = true)]
pub struct TailrelayArguments {
    #[arg(short = 'c', long = "config", help = "Path to the configuration file")]
    pub(crate) config_path: Option<String>,
    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: Option<TailrelayCommands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TailrelayCommands {
    #[clap(name = "serve", about = "Run autostart, supervise relays and wait for a shutdown signal (default)")]
    Serve,
    #[clap(name = "relays", about = "Manage socat relays")]
    Relays {
        #[clap(subcommand)]
        command: RelayCommands,
    },
    #[clap(name = "proxies", about = "Manage caddy proxy routes")]
    Proxies {
        #[clap(subcommand)]
        command: ProxyCommands,
    },
    #[clap(name = "config", about = "Manage the configuration file")]
    Config {
        #[clap(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum RelayCommands {
    #[clap(name = "add", about = "Add a relay and start it unless disabled")]
    Add {
        id: String,
        #[clap(flatten)]
        relay: RelayArgs,
    },
    #[clap(name = "update", about = "Update a relay (partial), restarting it if it runs")]
    Update {
        id: String,
        #[clap(flatten)]
        patch: UpdateRelayOptions,
    },
    #[clap(name = "remove", about = "Stop and remove a relay")]
    Remove { id: String },
    #[clap(name = "list", about = "List all relays")]
    List,
    #[clap(name = "status", about = "Show which relays are running")]
    Status,
    #[clap(name = "start", about = "Start a relay")]
    Start { id: String },
    #[clap(name = "stop", about = "Stop a relay")]
    Stop { id: String },
    #[clap(name = "restart", about = "Restart a relay")]
    Restart { id: String },
    #[clap(name = "toggle", about = "Enable or disable a relay")]
    Toggle { id: String },
    #[clap(name = "start-all", about = "Start every relay marked autostart")]
    StartAll,
    #[clap(name = "stop-all", about = "Stop every running relay")]
    StopAll,
    #[clap(name = "restart-all", about = "Stop every relay, then start the autostart ones")]
    RestartAll,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProxyCommands {
    #[clap(name = "add", about = "Add a proxy route and publish it unless disabled")]
    Add {
        hostname: String,
        #[clap(flatten)]
        proxy: ProxyArgs,
    },
    #[clap(name = "update", about = "Update a proxy route (partial)")]
    Update {
        id: String,
        #[clap(flatten)]
        patch: UpdateProxyOptions,
    },
    #[clap(name = "remove", about = "Retract and remove a proxy route")]
    Remove { id: String },
    #[clap(name = "list", about = "List all proxy routes")]
    List,
    #[clap(name = "show", about = "Show a proxy route")]
    Show { id: String },
    #[clap(name = "toggle", about = "Enable or disable a proxy route")]
    Toggle { id: String },
    #[clap(name = "sync", about = "Push one proxy route (or all of them) to caddy")]
    Sync { id: Option<String> },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    #[clap(name = "show", about = "Show the current configuration")]
    Show,
    #[clap(name = "show-path", about = "Show the path to the configuration file")]
    ShowPath,
    #[clap(name = "relay-binary", about = "Set the relay binary (socat by default)")]
    RelayBinary { binary: String },
    #[clap(name = "caddy-url", about = "Set the caddy admin API address")]
    CaddyUrl { url: String },
}

// Optional fields for partial updates. Only provided flags will be applied.
#[derive(Args, Debug, Clone, Default)]
pub struct UpdateRelayOptions {
    /// Local listen port
    #[arg(short = 'l', long = "listen-port")]
    pub listen_port: Option<u16>,
    /// Target host
    #[arg(short = 't', long = "target-host")]
    pub target_host: Option<String>,
    /// Target port
    #[arg(short = 'p', long = "target-port")]
    pub target_port: Option<u16>,

    /// Start this relay on boot
    #[arg(short = 'a', long = "autostart", action = ArgAction::SetTrue, conflicts_with = "no_autostart")]
    pub autostart: bool,
    /// Do not start this relay on boot
    #[arg(long = "no-autostart", action = ArgAction::SetTrue)]
    pub no_autostart: bool,
}

impl From<UpdateRelayOptions> for RelayPatch {
    fn from(o: UpdateRelayOptions) -> Self {
        RelayPatch {
            listen_port: o.listen_port,
            target_host: o.target_host,
            target_port: o.target_port,
            autostart: autostart_flag(o.autostart, o.no_autostart),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct UpdateProxyOptions {
    /// Hostname caddy matches on
    #[arg(short = 'H', long = "hostname")]
    pub hostname: Option<String>,
    /// Port caddy listens on
    #[arg(short = 'P', long = "port")]
    pub port: Option<u16>,
    /// Upstream as host:port
    #[arg(short = 't', long = "target")]
    pub target: Option<String>,

    /// Publish this proxy on boot
    #[arg(short = 'a', long = "autostart", action = ArgAction::SetTrue, conflicts_with = "no_autostart")]
    pub autostart: bool,
    /// Do not publish this proxy on boot
    #[arg(long = "no-autostart", action = ArgAction::SetTrue)]
    pub no_autostart: bool,
}

impl From<UpdateProxyOptions> for ProxyPatch {
    fn from(o: UpdateProxyOptions) -> Self {
        ProxyPatch { hostname: o.hostname, port: o.port, target: o.target, autostart: autostart_flag(o.autostart, o.no_autostart) }
    }
}

fn autostart_flag(on: bool, off: bool) -> Option<bool> {
    if on {
        Some(true)
    } else if off {
        Some(false)
    } else {
        None
    }
}

fn print_relay(relay: &RelaySpec, running: Option<bool>) {
    let state = match (relay.enabled, running) {
        (_, Some(true)) => format!("\x1b[1;32mrunning (PID {})\x1b[0m", relay.pid),
        (_, Some(false)) => "\x1b[1;31mstopped\x1b[0m".to_string(),
        (true, None) => "enabled".to_string(),
        (false, None) => "disabled".to_string(),
    };
    println!(
        "\x1b[1;36m{}\x1b[0m: \x1b[1;33m:{}\x1b[0m -> \x1b[1;32m{}\x1b[0m [{}]{}",
        relay.id,
        relay.listen_port,
        relay.target(),
        state,
        if relay.autostart { " autostart" } else { "" }
    );
}

fn print_proxy(proxy: &ProxyRecord, live: Option<bool>) {
    println!(
        "\x1b[1;36m{}\x1b[0m: \x1b[1;33m{}:{}\x1b[0m -> \x1b[1;32m{}\x1b[0m/\x1b[1;35m{}\x1b[0m [{}{}]{}",
        proxy.id,
        proxy.hostname,
        proxy.port,
        proxy.target,
        proxy.server_name,
        if proxy.enabled { "enabled" } else { "disabled" },
        match live {
            Some(true) => ", live",
            Some(false) => ", not live",
            None => "",
        },
        if proxy.autostart { " autostart" } else { "" }
    );
}

fn print_report(action: &str, report: &BatchReport) {
    println!("{}: {} succeeded, {} failed, {} skipped", action, report.succeeded, report.failed, report.skipped);
}

impl TailrelayArguments {
    /// Whether this invocation runs the daemon rather than a one-shot command.
    pub fn is_serve(&self) -> bool {
        matches!(self.command, None | Some(TailrelayCommands::Serve))
    }

    pub async fn handle_arguments(&self, config: &mut AppConfig) -> Result<()> {
        let Some(command) = &self.command else { return Ok(()) };
        let services = Services::from_config(config);
        match command {
            TailrelayCommands::Serve => {}

            // ---
            // Relays subcommand
            // ---
            TailrelayCommands::Relays { command } => {
                let supervisor = &services.supervisor;
                match command {
                    RelayCommands::Add { id, relay } => {
                        let relay = supervisor.add_relay(relay.clone().into_spec(id.clone())).await?;
                        info!("Added relay {}", relay.id);
                        print_relay(&relay, None);
                    }
                    RelayCommands::Update { id, patch } => {
                        let patch: RelayPatch = patch.clone().into();
                        if patch.is_empty() {
                            warn!("Nothing to update for relay {}", id);
                        } else {
                            let relay = supervisor.update_relay(id, patch).await?;
                            info!("Updated relay {}", id);
                            print_relay(&relay, None);
                        }
                    }
                    RelayCommands::Remove { id } => {
                        supervisor.remove_relay(id).await?;
                        info!("Removed relay {}", id);
                    }
                    RelayCommands::List => {
                        for relay in supervisor.registry().load().await? {
                            print_relay(&relay, None);
                        }
                    }
                    RelayCommands::Status => {
                        for RelayStatus { relay, running } in supervisor.status().await? {
                            print_relay(&relay, Some(running));
                        }
                    }
                    RelayCommands::Start { id } => {
                        let relay = supervisor.start_relay(id).await?;
                        print_relay(&relay, Some(true));
                    }
                    RelayCommands::Stop { id } => {
                        let relay = supervisor.stop_relay(id).await?;
                        print_relay(&relay, Some(false));
                    }
                    RelayCommands::Restart { id } => {
                        let relay = supervisor.restart_relay(id).await?;
                        print_relay(&relay, Some(true));
                    }
                    RelayCommands::Toggle { id } => {
                        let relay = supervisor.toggle_relay(id).await?;
                        print_relay(&relay, Some(relay.pid != 0));
                    }
                    RelayCommands::StartAll => print_report("Start all", &supervisor.start_all().await?),
                    RelayCommands::StopAll => print_report("Stop all", &supervisor.stop_all().await?),
                    RelayCommands::RestartAll => print_report("Restart all", &supervisor.restart_all().await?),
                }
            }

            // ---
            // Proxies subcommand
            // ---
            TailrelayCommands::Proxies { command } => {
                let proxies = &services.proxies;
                match command {
                    ProxyCommands::Add { hostname, proxy } => {
                        let record = proxies.add_proxy(proxy.clone().into_record(hostname.clone())).await?;
                        info!("Added proxy {} as {}", record.id, record.server_name);
                        print_proxy(&record, None);
                    }
                    ProxyCommands::Update { id, patch } => {
                        let record = proxies.update_proxy(id, patch.clone().into()).await?;
                        info!("Updated proxy {}", id);
                        print_proxy(&record, None);
                    }
                    ProxyCommands::Remove { id } => {
                        proxies.delete_proxy(id).await?;
                        info!("Removed proxy {}", id);
                    }
                    ProxyCommands::List => {
                        for status in proxies.statuses().await? {
                            print_proxy(&status.proxy, Some(status.live));
                        }
                    }
                    ProxyCommands::Show { id } => match proxies.get_proxy(id).await {
                        Ok(record) => {
                            print_proxy(&record, None);
                            println!("{}", serde_json::to_string_pretty(&tailrelay::CaddyClient::server_config(&record))?);
                        }
                        Err(e) => error!("Proxy not found: {} ({})", id, e),
                    },
                    ProxyCommands::Toggle { id } => {
                        let record = proxies.toggle_proxy(id).await?;
                        print_proxy(&record, None);
                    }
                    ProxyCommands::Sync { id: Some(id) } => {
                        let record = proxies.get_proxy(id).await?;
                        proxies.sync_proxy(&record).await?;
                        info!("Synced proxy {}", id);
                    }
                    ProxyCommands::Sync { id: None } => {
                        let mut report = BatchReport::default();
                        for record in proxies.list_proxies().await? {
                            match proxies.sync_proxy(&record).await {
                                Ok(()) => report.succeeded += 1,
                                Err(e) => {
                                    error!("Failed to sync proxy {}: {}", record.id, e);
                                    report.failed += 1;
                                }
                            }
                        }
                        print_report("Sync", &report);
                    }
                }
            }

            // ---
            // Config subcommand
            // ---
            TailrelayCommands::Config { command } => match command {
                ConfigCommands::Show => {
                    println!("{}", config);
                }
                ConfigCommands::ShowPath => {
                    println!("{}", config.get_path().to_string_lossy())
                }
                ConfigCommands::RelayBinary { binary } => {
                    config.set_relay_binary(binary.clone());
                    config.save().await?;
                }
                ConfigCommands::CaddyUrl { url } => {
                    config.set_caddy_api_url(url.clone());
                    config.save().await?;
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_args_to_spec() {
        let args = RelayArgs {
            listen_port: 2222,
            target_host: "10.0.0.2".to_string(),
            target_port: 22,
            autostart: true,
            disabled: false,
        };

        let spec = args.into_spec("ssh".to_string());
        assert_eq!(spec.id, "ssh");
        assert_eq!(spec.listen_port, 2222);
        assert_eq!(spec.target(), "10.0.0.2:22");
        assert!(spec.autostart);
        assert!(spec.enabled);
        assert_eq!(spec.pid, 0);
    }

    #[test]
    fn test_relay_args_disabled() {
        let args = RelayArgs {
            listen_port: 2222,
            target_host: "10.0.0.2".to_string(),
            target_port: 22,
            autostart: false,
            disabled: true,
        };

        let spec = args.into_spec("ssh".to_string());
        assert!(!spec.enabled);
        assert!(!spec.autostart);
    }

    #[test]
    fn test_proxy_args_to_record() {
        let args = ProxyArgs { id: None, port: 8443, target: "localhost:9091".to_string(), autostart: true, disabled: false };

        let record = args.into_record("web.example.com".to_string());
        assert_eq!(record.id, "");
        assert_eq!(record.hostname, "web.example.com");
        assert_eq!(record.port, 8443);
        assert_eq!(record.target, "localhost:9091");
        assert!(record.enabled);
        assert!(record.autostart);
        assert!(record.server_name.is_empty());
    }

    #[test]
    fn test_update_relay_options_to_patch() {
        let options = UpdateRelayOptions {
            listen_port: Some(2223),
            target_host: None,
            target_port: Some(2022),
            autostart: false,
            no_autostart: true,
        };

        let patch: RelayPatch = options.into();
        assert_eq!(patch.listen_port, Some(2223));
        assert_eq!(patch.target_host, None);
        assert_eq!(patch.target_port, Some(2022));
        assert_eq!(patch.autostart, Some(false));
    }

    #[test]
    fn test_update_relay_options_no_changes() {
        let patch: RelayPatch = UpdateRelayOptions::default().into();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_update_proxy_options_to_patch() {
        let options = UpdateProxyOptions {
            hostname: Some("api.example.com".to_string()),
            port: None,
            target: Some("localhost:9000".to_string()),
            autostart: true,
            no_autostart: false,
        };

        let patch: ProxyPatch = options.into();
        assert_eq!(patch.hostname, Some("api.example.com".to_string()));
        assert_eq!(patch.port, None);
        assert_eq!(patch.target, Some("localhost:9000".to_string()));
        assert_eq!(patch.autostart, Some(true));
    }

    #[test]
    fn test_parse_relay_add() {
        let args = TailrelayArguments::try_parse_from([
            "tailrelay", "relays", "add", "ssh", "-l", "2222", "-t", "10.0.0.2", "-p", "22", "--autostart",
        ])
        .unwrap();
        assert!(!args.is_serve());
        match args.command {
            Some(TailrelayCommands::Relays { command: RelayCommands::Add { id, relay } }) => {
                assert_eq!(id, "ssh");
                assert_eq!(relay.listen_port, 2222);
                assert!(relay.autostart);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_command_is_serve() {
        assert!(TailrelayArguments::try_parse_from(["tailrelay"]).unwrap().is_serve());
        assert!(TailrelayArguments::try_parse_from(["tailrelay", "-v", "serve"]).unwrap().is_serve());
    }

    #[test]
    fn test_autostart_flags_conflict() {
        let result = TailrelayArguments::try_parse_from(["tailrelay", "relays", "update", "ssh", "--autostart", "--no-autostart"]);
        assert!(result.is_err());
    }
}
