//! Relay-management API client.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::time::Duration;

/// Registers a named stream path with the running relay.
pub trait PathRegistrar: Send + Sync {
    fn add_path(&self, name: &str, source: &str) -> Result<()>;
}

/// Accepts every path without contacting the relay. For use before the
/// relay is started, when paths reach it through the rendered config.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderedConfigOnly;

impl PathRegistrar for RenderedConfigOnly {
    fn add_path(&self, name: &str, _source: &str) -> Result<()> {
        log::debug!("path {} deferred to rendered relay config", name);
        Ok(())
    }
}

#[derive(Serialize)]
struct AddPathRequest<'a> {
    source: &'a str,
    #[serde(rename = "sourceOnDemand")]
    source_on_demand: bool,
}

#[derive(Clone, Debug)]
pub struct RelayApiClient {
    base_url: String,
    agent: ureq::Agent,
}

impl RelayApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { base_url, agent }
    }

    pub fn add_path_url(&self, name: &str) -> String {
        format!("{}/v3/config/paths/add/{}", self.base_url, name)
    }
}

impl PathRegistrar for RelayApiClient {
    /// Any 2xx is success; every other outcome is an error for the caller to log.
    fn add_path(&self, name: &str, source: &str) -> Result<()> {
        let body = AddPathRequest {
            source,
            source_on_demand: false,
        };
        match self.agent.post(&self.add_path_url(name)).send_json(&body) {
            Ok(resp) if (200..300).contains(&resp.status()) => Ok(()),
            Ok(resp) => Err(anyhow!("relay api answered {} for path {}", resp.status(), name)),
            Err(ureq::Error::Status(code, resp)) => {
                let detail = resp.into_string().unwrap_or_default();
                Err(anyhow!(
                    "relay api rejected path {} ({}): {}",
                    name,
                    code,
                    detail.trim()
                ))
            }
            Err(err) => Err(anyhow!("relay api unreachable: {}", err)),
        }
    }
}
