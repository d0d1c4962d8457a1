//! One discovery cycle, and the loop that repeats it.
//!
//! A cycle runs both discovery passes, resolves candidates the directory has
//! not seen yet, registers confirmed devices with the relay and records the
//! successful ones. The loop is the directory's only writer and never runs
//! two cycles at once.

use anyhow::Result;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Credentials, GatewayConfig};
use crate::directory::{canonical_name, DeviceDirectory};
use crate::discovery::{merge_candidates, CandidateDiscovery, MulticastDiscovery, ScanEngine};
use crate::onvif::ControlCapability;
use crate::relay::{PathRegistrar, RelayConfigWriter, RelaySource};
use crate::resolver::{redact_uri, Resolver};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub skipped_known: usize,
    pub confirmed: usize,
    pub registered: usize,
    pub failed_registrations: usize,
}

pub struct DiscoveryCycle {
    multicast: Box<dyn CandidateDiscovery>,
    scan: Option<Box<dyn CandidateDiscovery>>,
    resolver: Option<Resolver>,
    registrar: Arc<dyn PathRegistrar>,
    credentials: Credentials,
    directory: DeviceDirectory,
}

impl DiscoveryCycle {
    /// `resolver: None` means no device-control capability; cycles then do
    /// nothing beyond logging.
    pub fn new(
        multicast: Box<dyn CandidateDiscovery>,
        scan: Option<Box<dyn CandidateDiscovery>>,
        resolver: Option<Resolver>,
        registrar: Arc<dyn PathRegistrar>,
        credentials: Credentials,
    ) -> Self {
        Self {
            multicast,
            scan,
            resolver,
            registrar,
            credentials,
            directory: DeviceDirectory::new(),
        }
    }

    pub fn from_config(
        cfg: &GatewayConfig,
        capability: &ControlCapability,
        registrar: Arc<dyn PathRegistrar>,
    ) -> Self {
        let settings = &cfg.discovery;
        let multicast = MulticastDiscovery::new(settings.multicast_timeout);
        let scan = settings.scan_range.as_ref().map(|range| {
            Box::new(ScanEngine::new(
                range.clone(),
                settings.scan_ports.clone(),
                settings.scan_workers,
                settings.probe_timeout,
            )) as Box<dyn CandidateDiscovery>
        });
        if scan.is_none() {
            log::info!("SCAN_RANGE not set; multicast discovery only");
        }
        let resolver = capability.connector().cloned().map(Resolver::new);
        Self::new(
            Box::new(multicast),
            scan,
            resolver,
            registrar,
            cfg.onvif.credentials.clone(),
        )
    }

    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    /// Later cycles register through `registrar`; the directory is kept.
    pub fn set_registrar(&mut self, registrar: Arc<dyn PathRegistrar>) {
        self.registrar = registrar;
    }

    pub fn run_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let Some(resolver) = self.resolver.as_ref() else {
            log::warn!("device control unavailable; discovery cycle skipped");
            return report;
        };

        let mut passes = vec![self.multicast.discover()];
        if let Some(scan) = &self.scan {
            passes.push(scan.discover());
        }
        let candidates = merge_candidates(passes);
        report.candidates = candidates.len();

        for candidate in &candidates {
            if self.directory.contains(&candidate.host, candidate.port) {
                report.skipped_known += 1;
                continue;
            }
            let Some(device) = resolver.resolve(candidate, &self.credentials) else {
                continue;
            };
            report.confirmed += 1;

            let name = canonical_name(&device.host);
            if self.directory.get(&name).is_some() {
                log::info!(
                    "{}:{} shares relay path {}; not registered again",
                    device.host,
                    device.port,
                    name
                );
                self.directory.register(device);
                continue;
            }
            match self.registrar.add_path(&name, &device.stream_uri) {
                Ok(()) => {
                    log::info!(
                        "registered {} -> {}",
                        name,
                        redact_uri(&device.stream_uri)
                    );
                    self.directory.register(device);
                    report.registered += 1;
                }
                Err(err) => {
                    log::warn!(
                        "registration of {} ({}:{}) failed, retrying next cycle: {:#}",
                        name,
                        device.host,
                        device.port,
                        err
                    );
                    report.failed_registrations += 1;
                }
            }
        }
        report
    }
}

/// Re-renders the relay config from the static devices plus the directory.
pub struct ConfigRefresh {
    pub writer: RelayConfigWriter,
    pub static_sources: Vec<RelaySource>,
}

impl ConfigRefresh {
    pub fn apply(&self, directory: &DeviceDirectory) -> Result<usize> {
        let mut sources = self.static_sources.clone();
        sources.extend(directory.snapshot().iter().map(|entry| entry.relay_source()));
        self.writer.write(&sources)
    }
}

pub struct DiscoveryLoop {
    cycle: DiscoveryCycle,
    interval: Duration,
    first_delay: Duration,
    refresh: Option<ConfigRefresh>,
}

impl DiscoveryLoop {
    pub fn new(cycle: DiscoveryCycle, interval: Duration) -> Self {
        Self {
            cycle,
            interval,
            first_delay: Duration::ZERO,
            refresh: None,
        }
    }

    /// Waits one full interval before the first cycle, for callers that
    /// already ran one.
    pub fn deferred(mut self) -> Self {
        self.first_delay = self.interval;
        self
    }

    pub fn with_refresh(mut self, refresh: ConfigRefresh) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Runs cycles until `shutdown` delivers a message or its sender is gone.
    pub fn run(mut self, shutdown: Receiver<()>) {
        log::info!("discovery loop started (interval {:?})", self.interval);
        let mut wait = self.first_delay;
        loop {
            if !wait.is_zero() {
                match shutdown.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            self.tick();
            wait = self.interval;
        }
        log::info!(
            "discovery loop stopped ({} device(s) known)",
            self.cycle.directory().len()
        );
    }

    /// One cycle plus the config refresh it may trigger.
    pub fn tick(&mut self) -> CycleReport {
        let report = self.cycle.run_once();
        log::info!(
            "discovery cycle: {} candidate(s), {} known, {} confirmed, {} registered, {} failed",
            report.candidates,
            report.skipped_known,
            report.confirmed,
            report.registered,
            report.failed_registrations
        );
        if report.registered > 0 {
            if let Some(refresh) = &self.refresh {
                if let Err(err) = refresh.apply(self.cycle.directory()) {
                    log::error!("relay config refresh failed: {:#}", err);
                }
            }
        }
        report
    }

    pub fn cycle(&self) -> &DiscoveryCycle {
        &self.cycle
    }
}
