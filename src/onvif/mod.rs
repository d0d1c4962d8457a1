//! Device-control client abstraction.
//!
//! The rest of the gateway talks to cameras only through [`DeviceControl`]
//! and [`DeviceConnector`]. The concrete ONVIF implementation lives in
//! [`client`]; tests substitute in-memory doubles.
//!
//! Whether device control is usable at all is decided once at startup and
//! expressed as a [`ControlCapability`]. Callers branch on the capability,
//! never on a failed library load or missing configuration.

pub mod client;
pub mod soap;
pub mod xml;

use anyhow::Result;
use std::sync::Arc;

use crate::config::{Credentials, OnvifSettings};
use crate::ptz::PtzVector;

pub use client::{OnvifClient, OnvifConnector};

/// Identity reported by `GetDeviceInformation`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VendorInfo {
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
    pub serial: String,
}

/// A device-advertised stream configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaProfile {
    pub token: String,
}

/// Blocking control session with one device.
pub trait DeviceControl: Send + Sync {
    fn device_information(&self) -> Result<VendorInfo>;

    /// Media profiles in the order the device lists them.
    fn media_profiles(&self) -> Result<Vec<MediaProfile>>;

    /// Unicast RTSP stream URI for `profile_token`.
    fn stream_uri(&self, profile_token: &str) -> Result<String>;

    fn relative_move(&self, profile_token: &str, vector: PtzVector) -> Result<()>;

    fn goto_home(&self, profile_token: &str) -> Result<()>;
}

/// Opens control sessions.
pub trait DeviceConnector: Send + Sync {
    fn connect(
        &self,
        host: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<Box<dyn DeviceControl>>;
}

/// Device-control availability, selected at startup.
#[derive(Clone)]
pub enum ControlCapability {
    Available(Arc<dyn DeviceConnector>),
    Unavailable { reason: String },
}

impl ControlCapability {
    pub fn onvif(timeout: std::time::Duration) -> Self {
        Self::Available(Arc::new(OnvifConnector::new(timeout)))
    }

    /// Selected once at startup from the ONVIF settings.
    pub fn from_settings(settings: &OnvifSettings) -> Self {
        if settings.enabled {
            Self::onvif(settings.timeout)
        } else {
            Self::unavailable("disabled by ONVIF_ENABLED")
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn connector(&self) -> Option<&Arc<dyn DeviceConnector>> {
        match self {
            Self::Available(connector) => Some(connector),
            Self::Unavailable { .. } => None,
        }
    }
}

impl std::fmt::Debug for ControlCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(_) => f.write_str("ControlCapability::Available"),
            Self::Unavailable { reason } => {
                write!(f, "ControlCapability::Unavailable({})", reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_capability_has_no_connector() {
        let capability = ControlCapability::unavailable("onvif disabled");
        assert!(capability.connector().is_none());
        assert_eq!(
            format!("{:?}", capability),
            "ControlCapability::Unavailable(onvif disabled)"
        );
        assert!(ControlCapability::onvif(std::time::Duration::from_secs(1))
            .connector()
            .is_some());
    }
}
