//! Connect-scan over an address range.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use super::{CandidateDiscovery, CandidateSource, DiscoveryCandidate};

/// Parses `A.B.C.start-end` into the inclusive list of addresses.
pub fn parse_address_range(range: &str) -> Result<Vec<Ipv4Addr>> {
    static RANGE: OnceLock<Regex> = OnceLock::new();
    let pattern = RANGE.get_or_init(|| {
        Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})-(\d{1,3})$")
            .expect("static range pattern")
    });
    let caps = pattern
        .captures(range.trim())
        .ok_or_else(|| anyhow!("invalid address range '{}' (expected A.B.C.start-end)", range))?;
    let octet = |i: usize| -> Result<u8> {
        caps[i]
            .parse::<u8>()
            .map_err(|_| anyhow!("octet '{}' out of range in '{}'", &caps[i], range))
    };
    let (a, b, c) = (octet(1)?, octet(2)?, octet(3)?);
    let (start, end) = (octet(4)?, octet(5)?);
    if start > end {
        return Err(anyhow!(
            "address range '{}' ends before it starts",
            range
        ));
    }
    Ok((start..=end).map(|d| Ipv4Addr::new(a, b, c, d)).collect())
}

/// Bounded worker pool probing every address x port pair.
#[derive(Clone, Debug)]
pub struct ScanEngine {
    pub range: String,
    pub ports: Vec<u16>,
    pub workers: usize,
    pub probe_timeout: Duration,
}

impl ScanEngine {
    pub fn new(range: impl Into<String>, ports: Vec<u16>, workers: usize, probe_timeout: Duration) -> Self {
        Self {
            range: range.into(),
            ports,
            workers,
            probe_timeout,
        }
    }

    /// Scans the configured range. A malformed range is reported and yields
    /// no candidates.
    pub fn scan(&self) -> Vec<DiscoveryCandidate> {
        let addrs = match parse_address_range(&self.range) {
            Ok(addrs) => addrs,
            Err(err) => {
                log::error!("scan skipped: {}", err);
                return Vec::new();
            }
        };
        log::info!(
            "scanning {} address(es) x {} port(s) in {} (workers={})",
            addrs.len(),
            self.ports.len(),
            self.range,
            self.workers
        );
        let found = probe_all(&addrs, &self.ports, self.workers, self.probe_timeout);
        log::info!("scan found {} open control port(s)", found.len());
        found
    }
}

impl CandidateDiscovery for ScanEngine {
    fn discover(&self) -> Vec<DiscoveryCandidate> {
        self.scan()
    }
}

/// Probes the full cross product and returns only pairs that accepted a
/// connection. Blocks until every probe settles.
pub fn probe_all(
    addrs: &[Ipv4Addr],
    ports: &[u16],
    workers: usize,
    timeout: Duration,
) -> Vec<DiscoveryCandidate> {
    let targets: Vec<SocketAddr> = addrs
        .iter()
        .flat_map(|addr| ports.iter().map(move |port| SocketAddr::from((*addr, *port))))
        .collect();
    if targets.is_empty() {
        return Vec::new();
    }

    let next = AtomicUsize::new(0);
    let found = Mutex::new(Vec::new());
    let workers = workers.clamp(1, targets.len());
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(target) = targets.get(idx) else {
                    break;
                };
                if TcpStream::connect_timeout(target, timeout).is_ok() {
                    log::debug!("open port {}", target);
                    let candidate = DiscoveryCandidate {
                        host: target.ip().to_string(),
                        port: target.port(),
                        source: CandidateSource::Scan,
                    };
                    match found.lock() {
                        Ok(mut found) => found.push(candidate),
                        Err(poisoned) => poisoned.into_inner().push(candidate),
                    }
                }
            });
        }
    });
    match found.into_inner() {
        Ok(found) => found,
        Err(poisoned) => poisoned.into_inner(),
    }
}
