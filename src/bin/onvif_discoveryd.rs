//! onvif_discoveryd - continuous ONVIF discovery
//!
//! Repeats discovery cycles on a fixed interval and registers every newly
//! confirmed camera with the running relay's management API. Does not
//! start or supervise a relay of its own.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use camera_relay_gateway::{
    cycle::{DiscoveryCycle, DiscoveryLoop},
    onvif::ControlCapability,
    relay::RelayApiClient,
    GatewayConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Continuous ONVIF camera discovery")]
struct Args {
    /// JSON config file, applied before environment overrides.
    #[arg(long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between cycles; overrides DISCOVERY_INTERVAL.
    #[arg(long)]
    interval: Option<u64>,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = GatewayConfig::load_from(args.config.as_deref())?;
    if let Some(seconds) = args.interval {
        if seconds == 0 {
            return Err(anyhow!("--interval must be greater than zero"));
        }
        cfg.discovery.interval = Duration::from_secs(seconds);
    }

    let capability = ControlCapability::from_settings(&cfg.onvif);
    let registrar = Arc::new(RelayApiClient::new(&cfg.relay_api_url, cfg.onvif.timeout));
    let cycle = DiscoveryCycle::from_config(&cfg, &capability, registrar);
    log::info!(
        "onvif discovery: relay api {}, scan range {}, user {}",
        cfg.relay_api_url,
        cfg.discovery.scan_range.as_deref().unwrap_or("(none)"),
        cfg.onvif.credentials.username
    );

    let mut discovery_loop = DiscoveryLoop::new(cycle, cfg.discovery.interval);
    if args.once {
        discovery_loop.tick();
        return Ok(());
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    discovery_loop.run(rx);
    Ok(())
}
