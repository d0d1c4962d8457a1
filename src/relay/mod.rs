//! Relay process integration: configuration, management API and supervision.

pub mod api;
pub mod config;
pub mod supervisor;

pub use api::{PathRegistrar, RelayApiClient, RenderedConfigOnly};
pub use config::{RelayConfigWriter, RelayPathSpec, RelaySource, UpstreamRelay};
pub use supervisor::{
    ProcessState, RelaySupervisor, SupervisorConfig, SupervisorOutcome, SupervisorReport,
};
