//! Deduplicated set of confirmed devices, owned by the discovery loop.
//!
//! The directory has a single writer (one discovery cycle at a time) and no
//! internal locking. Entries are keyed by `(host, port)` and are never removed
//! for the lifetime of the process.

use std::collections::{BTreeMap, HashSet};

use crate::config::Credentials;
use crate::ptz::PtzTarget;
use crate::relay::config::RelaySource;
use crate::resolver::ConfirmedDevice;

/// Prefix marking directory entries that came from discovery.
pub const DISCOVERY_TAG: &str = "onvif-";

/// `onvif-` followed by the host with every non `[A-Za-z0-9]` character
/// replaced by `-`.
pub fn canonical_name(host: &str) -> String {
    let sanitized: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}{}", DISCOVERY_TAG, sanitized)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub canonical_name: String,
    pub device: ConfirmedDevice,
}

impl DirectoryEntry {
    pub fn relay_source(&self) -> RelaySource {
        RelaySource {
            name: self.canonical_name.clone(),
            is_camera: true,
            url: self.device.stream_uri.clone(),
        }
    }

    pub fn ptz_target(&self, credentials: &Credentials) -> PtzTarget {
        PtzTarget {
            camera_name: self.canonical_name.clone(),
            host: self.device.host.clone(),
            port: self.device.port,
            credentials: credentials.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceDirectory {
    seen: HashSet<(String, u16)>,
    // canonical name -> entry; a colliding name keeps the first device.
    entries: BTreeMap<String, DirectoryEntry>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `device`. Returns `false` if its `(host, port)` is already known.
    pub fn register(&mut self, device: ConfirmedDevice) -> bool {
        let key = (device.host.clone(), device.port);
        if !self.seen.insert(key) {
            return false;
        }
        let canonical_name = canonical_name(&device.host);
        self.entries
            .entry(canonical_name.clone())
            .or_insert(DirectoryEntry {
                canonical_name,
                device,
            });
        true
    }

    pub fn contains(&self, host: &str, port: u16) -> bool {
        self.seen.contains(&(host.to_string(), port))
    }

    pub fn get(&self, canonical_name: &str) -> Option<&DirectoryEntry> {
        self.entries.get(canonical_name)
    }

    /// Number of distinct `(host, port)` keys registered.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Entries ordered by canonical name.
    pub fn snapshot(&self) -> Vec<DirectoryEntry> {
        self.entries.values().cloned().collect()
    }
}
