//! IP Client Daemon
//!
//! Main entry point for the ipclientd daemon.
//! Provisions one interface and keeps it provisioned until interrupted.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle
//! - CM-6: Configuration Settings - TOML configuration and command line
//! - SI-4: System Monitoring - Real-time link state processing

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sonic_ipclientd::config_file::DEFAULT_CONFIG_PATH;
use sonic_ipclientd::{
    DetachedCollaboratorFactory, IpClient, IpClientConfig, IpClientDaemon, IpClientDeps,
    IpClientHandle, LinkAddress, LoggingCallbacks, NetlinkInterfaceController, NetlinkObserver,
    PacketSocketTransmitter, ProvisioningConfiguration, StaticIpv4Configuration, SystemClock,
    spawn_observer,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Ipv4Mode {
    Disabled,
    Dhcp,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Ipv6Mode {
    Disabled,
    LinkLocal,
    Slaac,
}

/// SONiC IP provisioning client
#[derive(Parser, Debug)]
#[command(name = "ipclientd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to provision
    #[arg(short = 'i', long)]
    interface: String,

    /// Daemon configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    #[arg(long, value_enum, default_value = "dhcp")]
    ipv4_mode: Ipv4Mode,

    #[arg(long, value_enum, default_value = "slaac")]
    ipv6_mode: Ipv6Mode,

    /// Static IPv4 address with prefix length, e.g. 192.0.2.10/24
    #[arg(long, required_if_eq("ipv4_mode", "static"))]
    static_address: Option<String>,

    /// Static IPv4 default gateway
    #[arg(long)]
    static_gateway: Option<Ipv4Addr>,

    /// Provisioning timeout in milliseconds, 0 disables it
    #[arg(long)]
    provisioning_timeout_ms: Option<u64>,

    /// Display name of the network, used for roam handling and diagnostics
    #[arg(long)]
    display_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = IpClientConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config))?;
    settings.validate().context("validating daemon configuration")?;

    // NIST: AU-3, AU-12 - Audit logging setup
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    init_logging(&level)?;

    info!(interface = %args.interface, "ipclientd: Starting IP provisioning daemon");

    match run_daemon(args, settings).await {
        Ok(()) => {
            info!("ipclientd: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "ipclientd: Daemon exiting with error");
            Err(e)
        }
    }
}

/// Initialize structured logging
///
/// # NIST Controls
/// - AU-3: Content of Audit Records - Structured format
/// - AU-9: Protection of Audit Information - Log to system journal
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set logger")?;
    Ok(())
}

fn provisioning_configuration(args: &Args) -> Result<ProvisioningConfiguration> {
    let mut config = ProvisioningConfiguration::default();

    match args.ipv4_mode {
        Ipv4Mode::Disabled => config = config.without_ipv4(),
        Ipv4Mode::Dhcp => {}
        Ipv4Mode::Static => {
            let address: LinkAddress = args
                .static_address
                .as_deref()
                .context("--static-address is required in static mode")?
                .parse()
                .context("parsing --static-address")?;
            config = config.with_static_ipv4(StaticIpv4Configuration {
                address,
                gateway: args.static_gateway,
                dns_servers: Vec::new(),
                domains: None,
            });
        }
    }

    config = match args.ipv6_mode {
        Ipv6Mode::Disabled => config.without_ipv6(),
        Ipv6Mode::LinkLocal => config.with_ipv6_link_local_only(),
        Ipv6Mode::Slaac => config,
    };

    if let Some(timeout_ms) = args.provisioning_timeout_ms {
        config = config.with_provisioning_timeout_ms(timeout_ms);
    }
    if let Some(name) = &args.display_name {
        config = config.with_display_name(name.clone());
    }
    Ok(config)
}

/// Main daemon loop
///
/// # NIST Controls
/// - SI-4: System Monitoring - Event loop for monitoring
/// - AC-3: Access Enforcement - Kernel sockets require privileges
async fn run_daemon(args: Args, settings: IpClientConfig) -> Result<()> {
    let config = provisioning_configuration(&args)?;
    config.validate().context("validating provisioning request")?;

    let (handle, commands) = IpClientHandle::channel();
    let clock = Arc::new(SystemClock::new());

    let controller = NetlinkInterfaceController::new(&args.interface)
        .with_context(|| format!("opening netlink for {}", args.interface))?;
    let observer = NetlinkObserver::new(&args.interface)
        .with_context(|| format!("subscribing to link state of {}", args.interface))?;

    let deps = IpClientDeps {
        controller: Box::new(controller),
        transmitter: Box::new(PacketSocketTransmitter::new()),
        factory: Box::new(DetachedCollaboratorFactory::new(Arc::new(handle.clone()))),
        callbacks: Arc::new(LoggingCallbacks),
        clock: clock.clone(),
    };
    let client = IpClient::new(&args.interface, settings, deps);
    let daemon = IpClientDaemon::new(client, commands, clock);
    info!("ipclientd: Initialized IP client");

    // NIST: AU-12 - Log shutdown events
    let shutdown = setup_signal_handlers(handle.clone());

    let observer_task = spawn_observer(observer, handle.clone());
    handle.start_provisioning(config);

    let client = daemon.run().await?;
    observer_task.abort();

    if shutdown.load(Ordering::Relaxed) {
        info!(reason = ?client.stop_reason(), "ipclientd: Graceful shutdown complete");
    }
    Ok(())
}

/// Setup signal handlers for graceful shutdown
///
/// # NIST Controls
/// - AU-12: Audit Record Generation - Log shutdown signals
fn setup_signal_handlers(handle: IpClientHandle) -> Arc<AtomicBool> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("ipclientd: Received SIGINT/SIGTERM");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
            handle.shutdown();
        }
    });

    shutdown_flag
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_ipclientd::{Ipv4ProvisioningMode, Ipv6ProvisioningMode};

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_modes() {
        let args = parse(&["ipclientd", "-i", "eth0"]);
        let config = provisioning_configuration(&args).unwrap();
        assert_eq!(config.ipv4_mode, Ipv4ProvisioningMode::Dhcp);
        assert_eq!(config.ipv6_mode, Ipv6ProvisioningMode::Slaac);
        assert_eq!(args.config, DEFAULT_CONFIG_PATH);
    }

    #[test]
    fn test_static_mode() {
        let args = parse(&[
            "ipclientd",
            "-i",
            "eth0",
            "--ipv4-mode",
            "static",
            "--static-address",
            "192.0.2.10/24",
            "--static-gateway",
            "192.0.2.1",
            "--ipv6-mode",
            "disabled",
        ]);
        let config = provisioning_configuration(&args).unwrap();
        assert_eq!(config.ipv4_mode, Ipv4ProvisioningMode::Static);
        assert_eq!(config.ipv6_mode, Ipv6ProvisioningMode::Disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_static_mode_requires_address() {
        assert!(Args::try_parse_from(["ipclientd", "-i", "eth0", "--ipv4-mode", "static"]).is_err());
    }

    #[test]
    fn test_shutdown_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        assert!(!flag.load(Ordering::Relaxed));
        flag.store(true, Ordering::Relaxed);
        assert!(flag.load(Ordering::Relaxed));
    }
}
