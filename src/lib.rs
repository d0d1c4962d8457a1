//! Camera Relay Gateway
//!
//! Edge gateway that turns the IP cameras of a local network into a
//! supervised, centrally reachable video relay with remote PTZ control.
//!
//! # Architecture
//!
//! Discovery runs as a repeating, non-overlapping cycle:
//!
//! 1. **Discovery passes**: WS-Discovery multicast and an optional connect
//!    scan produce [`DiscoveryCandidate`]s, merged on `(host, port)`.
//! 2. **Resolution**: each new candidate is confirmed through an ONVIF
//!    identity and media-profile handshake; the stream URI gets the
//!    control credentials injected.
//! 3. **Directory**: confirmed devices are deduplicated per process and
//!    registered with the relay once.
//!
//! Alongside the cycle, the relay process is supervised with backoff
//! restarts and a Control Gateway forwards PTZ commands to per-camera
//! sessions built at startup.
//!
//! # Module Structure
//!
//! - `config`: layered gateway configuration (defaults, JSON file, env)
//! - `devices`: static `iot_devices.yml` device list
//! - `discovery`: candidates, scan engine, multicast discovery
//! - `onvif`: device-control seam and the SOAP client behind it
//! - `resolver`, `directory`, `cycle`: confirmation, dedup, the loop
//! - `relay`: config rendering, management API, process supervision
//! - `ptz`, `api`: PTZ sessions and the Control Gateway HTTP server
//! - `backend`: backend authentication and device registration

pub mod api;
pub mod backend;
pub mod config;
pub mod cycle;
pub mod devices;
pub mod directory;
pub mod discovery;
pub mod onvif;
pub mod ptz;
pub mod relay;
pub mod resolver;

pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use backend::BackendClient;
pub use config::{Credentials, GatewayConfig};
pub use cycle::{ConfigRefresh, CycleReport, DiscoveryCycle, DiscoveryLoop};
pub use devices::{DeviceList, StaticDevice};
pub use directory::{canonical_name, DeviceDirectory, DirectoryEntry};
pub use discovery::{CandidateSource, DiscoveryCandidate};
pub use onvif::{ControlCapability, DeviceConnector, DeviceControl, MediaProfile, VendorInfo};
pub use ptz::{Direction, PtzSession, PtzVector, SessionTable, SharedSessions};
pub use relay::{RelayConfigWriter, RelaySupervisor, SupervisorConfig};
pub use resolver::{inject_credentials, ConfirmedDevice, Resolver};
