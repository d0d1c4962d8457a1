//! Static device list loaded from `iot_devices.yml`.

use anyhow::{anyhow, Result};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::config::Credentials;
use crate::ptz::PtzTarget;
use crate::relay::config::RelaySource;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub devices: Vec<StaticDevice>,
}

/// One configured IoT device. Only `CAMERA` devices become relay paths.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StaticDevice {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Opts the camera into PTZ control on this ONVIF port of the URL host.
    #[serde(default, skip_serializing)]
    pub onvif_port: Option<u16>,
}

pub const CAMERA_KIND: &str = "CAMERA";

impl StaticDevice {
    pub fn is_camera(&self) -> bool {
        self.kind == CAMERA_KIND
    }

    pub fn relay_source(&self) -> RelaySource {
        RelaySource {
            name: self.name.clone(),
            is_camera: self.is_camera(),
            url: self.url.clone(),
        }
    }

    /// PTZ target for cameras that declare an ONVIF port.
    ///
    /// Credentials embedded in the stream URL win over the gateway-wide ones.
    pub fn ptz_target(&self, fallback: &Credentials) -> Option<PtzTarget> {
        let port = self.onvif_port?;
        if !self.is_camera() || self.name.is_empty() {
            return None;
        }
        let url = match Url::parse(&self.url) {
            Ok(url) => url,
            Err(err) => {
                log::warn!("camera '{}' has an unparsable url: {}", self.name, err);
                return None;
            }
        };
        let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']').to_string();
        let credentials = if url.username().is_empty() {
            fallback.clone()
        } else {
            Credentials::new(
                decode_userinfo(url.username()),
                url.password().map(decode_userinfo).unwrap_or_default(),
            )
        };
        Some(PtzTarget {
            camera_name: self.name.clone(),
            host,
            port,
            credentials,
        })
    }
}

impl DeviceList {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read device list {}: {}", path.display(), e))?;
        Self::parse(&raw).map_err(|e| anyhow!("invalid device list {}: {}", path.display(), e))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn ptz_targets(&self, fallback: &Credentials) -> Vec<PtzTarget> {
        self.devices
            .iter()
            .filter_map(|device| device.ptz_target(fallback))
            .collect()
    }

    pub fn relay_sources(&self) -> Vec<RelaySource> {
        self.devices.iter().map(StaticDevice::relay_source).collect()
    }
}

fn decode_userinfo(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}
