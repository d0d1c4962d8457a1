//! Candidate discovery.
//!
//! Two complementary passes produce unconfirmed `(host, port)` pairs:
//! - `multicast`: a single WS-Discovery probe for self-announcing devices
//! - `scan`: a bounded connect-scan over an address range and port list
//!
//! Neither pass reports negative results as errors. Their outputs are merged
//! and handed to the resolver.

pub mod multicast;
pub mod scan;

use std::collections::HashSet;
use std::fmt;

pub use multicast::MulticastDiscovery;
pub use scan::{parse_address_range, ScanEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    Multicast,
    Scan,
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multicast => f.write_str("multicast"),
            Self::Scan => f.write_str("scan"),
        }
    }
}

/// An unconfirmed host/port suspected of hosting a camera.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DiscoveryCandidate {
    pub host: String,
    pub port: u16,
    pub source: CandidateSource,
}

impl DiscoveryCandidate {
    pub fn key(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

/// A discovery pass.
pub trait CandidateDiscovery: Send + Sync {
    fn discover(&self) -> Vec<DiscoveryCandidate>;
}

/// Concatenates passes in order, keeping the first candidate for every
/// `(host, port)` pair.
pub fn merge_candidates(
    passes: impl IntoIterator<Item = Vec<DiscoveryCandidate>>,
) -> Vec<DiscoveryCandidate> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for candidate in passes.into_iter().flatten() {
        if seen.insert((candidate.host.clone(), candidate.port)) {
            merged.push(candidate);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(host: &str, port: u16, source: CandidateSource) -> DiscoveryCandidate {
        DiscoveryCandidate {
            host: host.to_string(),
            port,
            source,
        }
    }

    #[test]
    fn merge_keeps_first_source_per_key() {
        let multicast = vec![candidate("10.0.0.2", 80, CandidateSource::Multicast)];
        let scan = vec![
            candidate("10.0.0.2", 80, CandidateSource::Scan),
            candidate("10.0.0.2", 2020, CandidateSource::Scan),
            candidate("10.0.0.3", 80, CandidateSource::Scan),
        ];
        let merged = merge_candidates([multicast, scan]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].source, CandidateSource::Multicast);
        assert_eq!(merged[1].key(), ("10.0.0.2", 2020));
    }
}
