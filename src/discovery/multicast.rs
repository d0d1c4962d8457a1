//! WS-Discovery probe for self-announcing ONVIF devices.

use anyhow::{Context, Result};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use url::Url;
use uuid::Uuid;

use super::{CandidateDiscovery, CandidateSource, DiscoveryCandidate};
use crate::onvif::xml;

pub const WS_DISCOVERY_ADDR: (Ipv4Addr, u16) = (Ipv4Addr::new(239, 255, 255, 250), 3702);
const MAX_DATAGRAM: usize = 65_535;
const DEFAULT_PORT: u16 = 80;

#[derive(Clone, Debug)]
pub struct MulticastDiscovery {
    pub timeout: Duration,
    pub target: SocketAddr,
}

impl MulticastDiscovery {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            target: SocketAddr::from(WS_DISCOVERY_ADDR),
        }
    }

    /// Sends one probe and collects responses until the timeout elapses.
    /// Transport failures degrade to an empty result.
    pub fn discover_devices(&self) -> Vec<DiscoveryCandidate> {
        match self.probe() {
            Ok(found) => {
                log::info!("ws-discovery found {} endpoint(s)", found.len());
                found
            }
            Err(err) => {
                log::warn!("ws-discovery failed: {:#}", err);
                Vec::new()
            }
        }
    }

    fn probe(&self) -> Result<Vec<DiscoveryCandidate>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).context("bind probe socket")?;
        socket
            .set_multicast_ttl_v4(1)
            .context("set multicast ttl")?;
        let message_id = Uuid::new_v4().to_string();
        socket
            .send_to(probe_message(&message_id).as_bytes(), self.target)
            .context("send probe")?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut found: Vec<DiscoveryCandidate> = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            socket
                .set_read_timeout(Some(remaining))
                .context("set read timeout")?;
            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(err) => return Err(err).context("receive probe match"),
            };
            let text = String::from_utf8_lossy(&buf[..len]);
            for candidate in parse_probe_match(&text) {
                if !found.iter().any(|c| c.key() == candidate.key()) {
                    log::info!(
                        "ws-discovery: device at {}:{} (from {})",
                        candidate.host,
                        candidate.port,
                        from
                    );
                    found.push(candidate);
                }
            }
        }
        Ok(found)
    }
}

impl CandidateDiscovery for MulticastDiscovery {
    fn discover(&self) -> Vec<DiscoveryCandidate> {
        self.discover_devices()
    }
}

pub fn probe_message(message_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope" xmlns:w="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" xmlns:dn="http://www.onvif.org/ver10/network/wsdl"><e:Header><w:MessageID>uuid:{}</w:MessageID><w:To e:mustUnderstand="true">urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To><w:Action e:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action></e:Header><e:Body><d:Probe><d:Types>dn:NetworkVideoTransmitter</d:Types></d:Probe></e:Body></e:Envelope>"#,
        message_id
    )
}

/// Every `XAddrs` URL of a ProbeMatch, decomposed into host/port.
pub fn parse_probe_match(body: &str) -> Vec<DiscoveryCandidate> {
    xml::element_texts(body, "XAddrs")
        .iter()
        .flat_map(|xaddrs| xaddrs.split_whitespace())
        .filter_map(|addr| {
            let url = Url::parse(addr).ok()?;
            let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']');
            if host.is_empty() {
                return None;
            }
            Some(DiscoveryCandidate {
                host: host.to_string(),
                port: url.port().unwrap_or(DEFAULT_PORT),
                source: CandidateSource::Multicast,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_MATCH: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:wsdd="http://schemas.xmlsoap.org/ws/2005/04/discovery">
<SOAP-ENV:Body><wsdd:ProbeMatches><wsdd:ProbeMatch>
<wsdd:Types>dn:NetworkVideoTransmitter</wsdd:Types>
<wsdd:XAddrs>http://192.168.15.20:2020/onvif/device_service http://[fe80::1]/onvif/device_service</wsdd:XAddrs>
</wsdd:ProbeMatch></wsdd:ProbeMatches></SOAP-ENV:Body></SOAP-ENV:Envelope>"#;

    #[test]
    fn decomposes_xaddrs_with_default_port() {
        let found = parse_probe_match(PROBE_MATCH);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].key(), ("192.168.15.20", 2020));
        assert_eq!(found[1].key(), ("fe80::1", 80));
        assert!(found.iter().all(|c| c.source == CandidateSource::Multicast));
    }

    #[test]
    fn ignores_garbage() {
        assert!(parse_probe_match("<x>not discovery</x>").is_empty());
        assert!(parse_probe_match("<d:XAddrs>not-a-url</d:XAddrs>").is_empty());
    }

    #[test]
    fn probe_carries_message_id_and_type() {
        let id = Uuid::new_v4();
        let msg = probe_message(&id.to_string());
        assert!(msg.contains(&format!("<w:MessageID>uuid:{}</w:MessageID>", id)));
        assert!(msg.contains("dn:NetworkVideoTransmitter"));
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn collects_responses_until_timeout() {
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = responder.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            let (_, from) = responder.recv_from(&mut buf).unwrap();
            responder.send_to(PROBE_MATCH.as_bytes(), from).unwrap();
        });

        let discovery = MulticastDiscovery {
            timeout: Duration::from_millis(300),
            target,
        };
        let found = discovery.discover_devices();
        handle.join().unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn send_failure_degrades_to_empty_result() {
        // Port 0 is rejected by sendto(2), so the probe never leaves.
        let discovery = MulticastDiscovery {
            timeout: Duration::from_secs(5),
            target: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        };
        let started = Instant::now();
        assert!(discovery.discover_devices().is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
