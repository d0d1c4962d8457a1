//! Backend collaborator: gateway authentication and device registration.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::devices::StaticDevice;

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct AuthRequest<'a> {
    api_key: &'a str,
    local_api_url: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    api_key: &'a str,
    devices: &'a [StaticDevice],
}

#[derive(Clone, Debug)]
pub struct BackendClient {
    base_url: String,
    api_key: String,
    agent: ureq::Agent,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            agent: ureq::AgentBuilder::new().timeout(TIMEOUT).build(),
        }
    }

    /// Validates the API key and reports the Control Gateway URL. Returns the
    /// gateway name the backend knows us by.
    pub fn authenticate(&self, local_api_url: &str) -> Result<String> {
        let url = format!("{}/api/gateways/auth", self.base_url);
        log::info!("authenticating with backend {}", self.base_url);
        let response: AuthResponse = match self.agent.post(&url).send_json(AuthRequest {
            api_key: &self.api_key,
            local_api_url,
        }) {
            Ok(resp) => resp.into_json()?,
            Err(ureq::Error::Status(code, _)) => {
                return Err(anyhow!("backend rejected gateway authentication ({})", code))
            }
            Err(err) => return Err(anyhow!("backend unreachable at {}: {}", self.base_url, err)),
        };
        if !response.valid {
            return Err(anyhow!("invalid API key"));
        }
        log::info!("authenticated as gateway '{}'", response.name);
        Ok(response.name)
    }

    /// Reports the configured devices. Failures are logged; the gateway keeps
    /// running without backend registration.
    pub fn register_devices(&self, devices: &[StaticDevice]) -> Option<serde_json::Value> {
        let url = format!("{}/api/iot-devices/register", self.base_url);
        let result = self
            .agent
            .post(&url)
            .send_json(RegisterRequest {
                api_key: &self.api_key,
                devices,
            })
            .map_err(|err| anyhow!("{}", err))
            .and_then(|resp| resp.into_json::<serde_json::Value>().map_err(Into::into));
        match result {
            Ok(body) => {
                log::info!("registered {} device(s) with backend: {}", devices.len(), body);
                Some(body)
            }
            Err(err) => {
                log::error!("device registration failed: {}", err);
                None
            }
        }
    }
}
