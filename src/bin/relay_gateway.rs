//! relay_gateway - camera relay gateway, startup mode
//!
//! This daemon:
//! 1. Loads configuration and the static device list (missing files are fatal)
//! 2. Authenticates with the backend and registers the device list
//! 3. Optionally runs one discovery cycle
//! 4. Renders the relay config and builds the PTZ session table
//! 5. Serves the Control Gateway and keeps discovering in the background
//! 6. Supervises the relay process until shutdown

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use camera_relay_gateway::{
    api::{ApiConfig, ApiServer},
    cycle::{ConfigRefresh, DiscoveryCycle, DiscoveryLoop},
    onvif::ControlCapability,
    ptz::{build_sessions, SessionTable, SharedSessions},
    relay::{
        config::load_template, RelayApiClient, RelayConfigWriter, RelaySupervisor,
        RenderedConfigOnly, SupervisorConfig, SupervisorOutcome, UpstreamRelay,
    },
    BackendClient, DeviceDirectory, DeviceList, GatewayConfig,
};

const RELAY_API_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Camera relay gateway (startup mode)")]
struct Args {
    /// JSON config file, applied before environment overrides.
    #[arg(long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Run ONVIF discovery at startup and in the background.
    #[arg(long)]
    discover: bool,

    /// Skip backend authentication and device registration.
    #[arg(long)]
    offline: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = GatewayConfig::load_from(args.config.as_deref())?;
    cfg.require_upstream()?;
    if args.discover {
        cfg.discovery.enabled = true;
    }

    let paths = cfg.paths.clone();
    let devices = DeviceList::load(&paths.device_list)?;
    log::info!(
        "{} device(s) in {}",
        devices.devices.len(),
        paths.device_list.display()
    );
    let template = load_template(&paths.base_template)?;
    if !paths.relay_binary.exists() {
        return Err(anyhow!(
            "relay binary not found at {}",
            paths.relay_binary.display()
        ));
    }

    if args.offline {
        log::warn!("offline mode: backend authentication skipped");
    } else {
        let backend = BackendClient::new(&cfg.backend_url, &cfg.api_key);
        let gateway_name = backend.authenticate(&cfg.local_api_url)?;
        log::info!("gateway '{}' reporting {}", gateway_name, cfg.local_api_url);
        backend.register_devices(&devices.devices);
    }

    let capability = ControlCapability::from_settings(&cfg.onvif);
    let writer = RelayConfigWriter::new(
        template,
        paths.rendered_config.clone(),
        UpstreamRelay::new(&cfg.relay_server, &cfg.api_key),
    );
    let refresh = ConfigRefresh {
        writer,
        static_sources: devices.relay_sources(),
    };

    let mut ptz_targets = devices.ptz_targets(&cfg.onvif.credentials);
    let discovery = if cfg.discovery.enabled {
        // The relay is not running yet; the first cycle's paths go into the
        // rendered config instead of the management API.
        let mut cycle =
            DiscoveryCycle::from_config(&cfg, &capability, Arc::new(RenderedConfigOnly));
        let report = cycle.run_once();
        log::info!(
            "startup discovery: {} candidate(s), {} camera(s) confirmed",
            report.candidates,
            report.confirmed
        );
        ptz_targets.extend(
            cycle
                .directory()
                .snapshot()
                .iter()
                .map(|entry| entry.ptz_target(&cfg.onvif.credentials)),
        );
        refresh.apply(cycle.directory())?;
        cycle.set_registrar(Arc::new(RelayApiClient::new(
            &cfg.relay_api_url,
            RELAY_API_TIMEOUT,
        )));
        Some(cycle)
    } else {
        refresh.apply(&DeviceDirectory::new())?;
        None
    };

    let sessions = match capability.connector() {
        Some(connector) => build_sessions(connector.as_ref(), &ptz_targets),
        None => {
            log::warn!("device control unavailable; PTZ disabled");
            SessionTable::default()
        }
    };
    log::info!("{} PTZ session(s) ready", sessions.len());
    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        SharedSessions::new(sessions),
    )
    .spawn()?;

    let (supervisor_tx, supervisor_rx) = mpsc::channel();
    let (discovery_tx, discovery_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = supervisor_tx.send(());
        let _ = discovery_tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    if let Some(cycle) = discovery {
        let discovery_loop = DiscoveryLoop::new(cycle, cfg.discovery.interval)
            .deferred()
            .with_refresh(refresh);
        std::thread::spawn(move || discovery_loop.run(discovery_rx));
    }

    let mut supervisor = RelaySupervisor::new(SupervisorConfig::new(
        &paths.relay_binary,
        &paths.rendered_config,
    ));
    let report = supervisor.run(&supervisor_rx)?;
    match report.outcome {
        SupervisorOutcome::Stopped => log::info!(
            "relay stopped cleanly after {} restart(s)",
            report.restart_count
        ),
        SupervisorOutcome::Terminated { forced } => log::info!(
            "relay terminated on shutdown (forced: {}, restarts: {})",
            forced,
            report.restart_count
        ),
    }
    api_handle.stop()?;
    Ok(())
}
