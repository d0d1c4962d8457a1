//! discover_probe - one-shot ONVIF discovery report
//!
//! Runs WS-Discovery and an optional address-range scan, confirms every
//! candidate over ONVIF and prints what each camera reports. Registers
//! nothing.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use camera_relay_gateway::{
    discovery::{merge_candidates, MulticastDiscovery, ScanEngine},
    onvif::OnvifConnector,
    resolver::redact_uri,
    Credentials, Resolver,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe the local network for ONVIF cameras")]
struct Args {
    /// Address range to scan, e.g. 192.168.15.1-254. Multicast only if absent.
    #[arg(long = "range", env = "SCAN_RANGE")]
    range: Option<String>,

    #[arg(long, env = "ONVIF_USER", default_value = "admin")]
    user: String,

    #[arg(long, env = "ONVIF_PASSWORD", default_value = "")]
    password: String,

    /// WS-Discovery listen time in seconds.
    #[arg(long = "wsd-timeout", default_value_t = 5)]
    wsd_timeout: u64,

    /// Comma-separated ports to scan.
    #[arg(long, value_delimiter = ',', default_value = "80,8080,8899,2020,10080")]
    ports: Vec<u16>,

    #[arg(long, default_value_t = 60)]
    workers: usize,

    /// Per-probe connect timeout in milliseconds.
    #[arg(long, default_value_t = 1500)]
    probe_timeout_ms: u64,

    /// Show stream URIs with their embedded password.
    #[arg(long)]
    show_secrets: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let credentials = Credentials::new(args.user.clone(), args.password.clone());
    println!("user     : {}", credentials.username);
    println!(
        "password : {}",
        if credentials.password.is_empty() { "(empty)" } else { "***" }
    );
    println!("range    : {}", args.range.as_deref().unwrap_or("(not set)"));

    let mut passes =
        vec![MulticastDiscovery::new(Duration::from_secs(args.wsd_timeout)).discover_devices()];
    println!("[1] ws-discovery: {} endpoint(s)", passes[0].len());
    if let Some(range) = &args.range {
        let scan = ScanEngine::new(
            range.clone(),
            args.ports.clone(),
            args.workers.max(1),
            Duration::from_millis(args.probe_timeout_ms),
        )
        .scan();
        println!("[2] scan: {} open port(s)", scan.len());
        passes.push(scan);
    }
    let candidates = merge_candidates(passes);
    if candidates.is_empty() {
        println!("no devices found");
        println!("  - pass --range A.B.C.start-end to scan by address");
        println!("  - check that ONVIF is enabled on the camera");
        println!("  - multicast does not cross most container/VM networks");
        return Ok(());
    }

    println!("[3] checking {} candidate(s) over ONVIF", candidates.len());
    let resolver = Resolver::new(Arc::new(OnvifConnector::new(Duration::from_secs(10))));
    let mut cameras = Vec::new();
    for candidate in &candidates {
        match resolver.resolve(candidate, &credentials) {
            Some(device) => {
                println!("  {}:{} ({}) ONVIF camera", device.host, device.port, candidate.source);
                println!("     manufacturer : {}", device.vendor.manufacturer);
                println!("     model        : {}", device.vendor.model);
                println!("     firmware     : {}", device.vendor.firmware);
                println!("     serial       : {}", device.vendor.serial);
                let uri = if args.show_secrets {
                    device.stream_uri.clone()
                } else {
                    redact_uri(&device.stream_uri)
                };
                println!("     stream       : {}", uri);
                cameras.push(device);
            }
            None => println!("  {}:{} ({}) not ONVIF or auth failed", candidate.host, candidate.port, candidate.source),
        }
    }
    println!("{} camera(s) confirmed", cameras.len());
    Ok(())
}
