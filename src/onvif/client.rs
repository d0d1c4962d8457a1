//! Blocking ONVIF client over SOAP/HTTP.

use anyhow::{anyhow, bail, Context, Result};
use std::time::Duration;

use super::xml;
use super::{soap, DeviceConnector, DeviceControl, MediaProfile, VendorInfo};
use crate::config::Credentials;
use crate::ptz::PtzVector;

const DEVICE_SERVICE_PATH: &str = "/onvif/device_service";
const MEDIA_SERVICE_PATH: &str = "/onvif/media_service";
const PTZ_SERVICE_PATH: &str = "/onvif/ptz_service";

/// Opens [`OnvifClient`] sessions with a fixed per-request timeout.
#[derive(Clone, Debug)]
pub struct OnvifConnector {
    timeout: Duration,
}

impl OnvifConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl DeviceConnector for OnvifConnector {
    fn connect(
        &self,
        host: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<Box<dyn DeviceControl>> {
        let client = OnvifClient::connect(host, port, credentials.clone(), self.timeout)?;
        Ok(Box::new(client))
    }
}

pub struct OnvifClient {
    agent: ureq::Agent,
    credentials: Credentials,
    device_url: String,
    media_url: String,
    ptz_url: String,
}

impl OnvifClient {
    /// Creates a session and discovers the media/PTZ service addresses.
    ///
    /// Devices that refuse `GetCapabilities` keep the conventional service
    /// paths; an unreachable device is an error.
    pub fn connect(
        host: &str,
        port: u16,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        let base = format!("http://{}", authority(host, port));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        let mut client = Self {
            agent,
            credentials,
            device_url: format!("{}{}", base, DEVICE_SERVICE_PATH),
            media_url: format!("{}{}", base, MEDIA_SERVICE_PATH),
            ptz_url: format!("{}{}", base, PTZ_SERVICE_PATH),
        };

        let request = "<tds:GetCapabilities><tds:Category>All</tds:Category></tds:GetCapabilities>";
        let capabilities = client.call(&client.device_url, request);
        match capabilities {
            Ok(body) => {
                if let Some(addr) = capability_xaddr(&body, "Media") {
                    client.media_url = addr;
                }
                if let Some(addr) = capability_xaddr(&body, "PTZ") {
                    client.ptz_url = addr;
                }
            }
            Err(SoapError::Transport(err)) => return Err(err),
            Err(SoapError::Rejected(err)) => {
                log::debug!(
                    "GetCapabilities rejected by {}: {}; using default service paths",
                    client.device_url,
                    err
                );
            }
        }
        Ok(client)
    }

    pub fn device_url(&self) -> &str {
        &self.device_url
    }

    pub fn media_url(&self) -> &str {
        &self.media_url
    }

    pub fn ptz_url(&self) -> &str {
        &self.ptz_url
    }

    fn request(&self, url: &str, body: &str, action: &str) -> Result<String> {
        self.call(url, body)
            .map_err(|err| err.into_inner())
            .with_context(|| format!("ONVIF {} at {}", action, url))
    }

    fn call(&self, url: &str, body: &str) -> std::result::Result<String, SoapError> {
        let envelope = soap::envelope(&self.credentials, body);
        let response = self
            .agent
            .post(url)
            .set("Content-Type", "application/soap+xml; charset=utf-8")
            .send_string(&envelope);
        let text = match response {
            Ok(resp) => resp
                .into_string()
                .map_err(|e| SoapError::Transport(anyhow!("read response: {}", e)))?,
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                let reason = xml::fault_reason(&body).unwrap_or_else(|| "no fault detail".into());
                return Err(SoapError::Rejected(anyhow!("HTTP {}: {}", code, reason)));
            }
            Err(err) => return Err(SoapError::Transport(anyhow!("{}", err))),
        };
        if xml::is_fault(&text) {
            let reason = xml::fault_reason(&text).unwrap_or_else(|| "unknown fault".into());
            return Err(SoapError::Rejected(anyhow!("SOAP fault: {}", reason)));
        }
        Ok(text)
    }
}

impl DeviceControl for OnvifClient {
    fn device_information(&self) -> Result<VendorInfo> {
        let body = self.request(
            &self.device_url,
            "<tds:GetDeviceInformation/>",
            "GetDeviceInformation",
        )?;
        parse_device_information(&body)
    }

    fn media_profiles(&self) -> Result<Vec<MediaProfile>> {
        let body = self.request(&self.media_url, "<trt:GetProfiles/>", "GetProfiles")?;
        Ok(parse_profiles(&body))
    }

    fn stream_uri(&self, profile_token: &str) -> Result<String> {
        let request = format!(
            "<trt:GetStreamUri><trt:StreamSetup><tt:Stream>RTP-Unicast</tt:Stream><tt:Transport><tt:Protocol>RTSP</tt:Protocol></tt:Transport></trt:StreamSetup><trt:ProfileToken>{}</trt:ProfileToken></trt:GetStreamUri>",
            xml::escape(profile_token)
        );
        let body = self.request(&self.media_url, &request, "GetStreamUri")?;
        parse_stream_uri(&body)
    }

    fn relative_move(&self, profile_token: &str, vector: PtzVector) -> Result<()> {
        let request = format!(
            r#"<tptz:RelativeMove><tptz:ProfileToken>{}</tptz:ProfileToken><tptz:Translation><tt:PanTilt x="{:.2}" y="{:.2}"/><tt:Zoom x="{:.2}"/></tptz:Translation></tptz:RelativeMove>"#,
            xml::escape(profile_token),
            vector.pan,
            vector.tilt,
            vector.zoom
        );
        self.request(&self.ptz_url, &request, "RelativeMove")?;
        Ok(())
    }

    fn goto_home(&self, profile_token: &str) -> Result<()> {
        let request = format!(
            "<tptz:GotoHomePosition><tptz:ProfileToken>{}</tptz:ProfileToken></tptz:GotoHomePosition>",
            xml::escape(profile_token)
        );
        self.request(&self.ptz_url, &request, "GotoHomePosition")?;
        Ok(())
    }
}

enum SoapError {
    /// No usable HTTP exchange happened.
    Transport(anyhow::Error),
    /// The device answered, but with an HTTP error or SOAP fault.
    Rejected(anyhow::Error),
}

impl SoapError {
    fn into_inner(self) -> anyhow::Error {
        match self {
            Self::Transport(err) | Self::Rejected(err) => err,
        }
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn capability_xaddr(body: &str, capability: &str) -> Option<String> {
    let section = xml::section(body, "Capabilities")?;
    xml::section(section, capability).and_then(|s| xml::element_text(s, "XAddr"))
}

pub fn parse_device_information(body: &str) -> Result<VendorInfo> {
    let field = |tag| xml::element_text(body, tag).unwrap_or_default();
    let info = VendorInfo {
        manufacturer: field("Manufacturer"),
        model: field("Model"),
        firmware: field("FirmwareVersion"),
        serial: field("SerialNumber"),
    };
    if info.manufacturer.is_empty() && info.model.is_empty() {
        bail!("response carries neither manufacturer nor model");
    }
    Ok(info)
}

pub fn parse_profiles(body: &str) -> Vec<MediaProfile> {
    xml::attribute_values(body, "Profiles", "token")
        .into_iter()
        .filter(|token| !token.is_empty())
        .map(|token| MediaProfile { token })
        .collect()
}

pub fn parse_stream_uri(body: &str) -> Result<String> {
    let section = xml::section(body, "MediaUri").unwrap_or(body);
    xml::element_text(section, "Uri").ok_or_else(|| anyhow!("GetStreamUri response has no Uri"))
}
