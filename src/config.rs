use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

const DEFAULT_ONVIF_USER: &str = "admin";
const DEFAULT_RELAY_API_URL: &str = "http://127.0.0.1:9997";
const DEFAULT_API_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_BACKEND_PORT: u16 = 3000;
const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 60;
const DEFAULT_SCAN_PORTS: [u16; 4] = [80, 8080, 8899, 2020];
const DEFAULT_SCAN_WORKERS: usize = 50;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_MULTICAST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_ONVIF_TIMEOUT_SECS: u64 = 10;

pub const DEVICE_LIST_FILE: &str = "iot_devices.yml";
pub const BASE_TEMPLATE_FILE: &str = "mediamtx.base.yml";
pub const RENDERED_CONFIG_FILE: &str = "mediamtx.yml";
pub const RELAY_BINARY_FILE: &str = "mediamtx";

/// Control-channel username/password. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize, Default)]
struct GatewayConfigFile {
    relay_server: Option<String>,
    api_key: Option<String>,
    backend_url: Option<String>,
    relay_api_url: Option<String>,
    base_dir: Option<PathBuf>,
    onvif: Option<OnvifConfigFile>,
    discovery: Option<DiscoveryConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct OnvifConfigFile {
    enabled: Option<bool>,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DiscoveryConfigFile {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    scan_range: Option<String>,
    scan_ports: Option<Vec<u16>>,
    scan_workers: Option<usize>,
    probe_timeout_ms: Option<u64>,
    multicast_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    local_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upstream relay/backend host. Required only in startup mode.
    pub relay_server: String,
    /// Gateway API key; doubles as the upstream publish password.
    pub api_key: String,
    pub backend_url: String,
    /// Relay-management API base URL.
    pub relay_api_url: String,
    pub onvif: OnvifSettings,
    pub discovery: DiscoverySettings,
    pub api_addr: String,
    /// Control Gateway URL reported to the backend.
    pub local_api_url: String,
    pub paths: GatewayPaths,
}

#[derive(Debug, Clone)]
pub struct OnvifSettings {
    /// `false` selects the unavailable control capability.
    pub enabled: bool,
    pub credentials: Credentials,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub enabled: bool,
    pub interval: Duration,
    /// `None` disables the scan fallback (multicast-only mode).
    pub scan_range: Option<String>,
    pub scan_ports: Vec<u16>,
    pub scan_workers: usize,
    pub probe_timeout: Duration,
    pub multicast_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewayPaths {
    pub base_dir: PathBuf,
    pub device_list: PathBuf,
    pub base_template: PathBuf,
    pub rendered_config: PathBuf,
    pub relay_binary: PathBuf,
}

impl GatewayPaths {
    pub fn under(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            device_list: base_dir.join(DEVICE_LIST_FILE),
            base_template: base_dir.join(BASE_TEMPLATE_FILE),
            rendered_config: base_dir.join(RENDERED_CONFIG_FILE),
            relay_binary: base_dir.join(RELAY_BINARY_FILE),
        }
    }
}

impl GatewayConfig {
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("GATEWAY_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Defaults, then `config_path` (JSON) if given, then the environment.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GatewayConfigFile) -> Self {
        let onvif = file.onvif.unwrap_or_default();
        let discovery = file.discovery.unwrap_or_default();
        let api = file.api.unwrap_or_default();
        let base_dir = file.base_dir.unwrap_or_else(|| PathBuf::from("."));
        let api_addr = api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        Self {
            relay_server: file.relay_server.unwrap_or_default(),
            api_key: file.api_key.unwrap_or_default(),
            backend_url: file.backend_url.unwrap_or_default(),
            relay_api_url: file
                .relay_api_url
                .unwrap_or_else(|| DEFAULT_RELAY_API_URL.to_string()),
            onvif: OnvifSettings {
                enabled: onvif.enabled.unwrap_or(true),
                credentials: Credentials::new(
                    onvif
                        .username
                        .unwrap_or_else(|| DEFAULT_ONVIF_USER.to_string()),
                    onvif.password.unwrap_or_default(),
                ),
                timeout: Duration::from_secs(
                    onvif.timeout_secs.unwrap_or(DEFAULT_ONVIF_TIMEOUT_SECS),
                ),
            },
            discovery: DiscoverySettings {
                enabled: discovery.enabled.unwrap_or(false),
                interval: Duration::from_secs(
                    discovery
                        .interval_secs
                        .unwrap_or(DEFAULT_DISCOVERY_INTERVAL_SECS),
                ),
                scan_range: discovery.scan_range.filter(|r| !r.trim().is_empty()),
                scan_ports: discovery
                    .scan_ports
                    .unwrap_or_else(|| DEFAULT_SCAN_PORTS.to_vec()),
                scan_workers: discovery.scan_workers.unwrap_or(DEFAULT_SCAN_WORKERS),
                probe_timeout: Duration::from_millis(
                    discovery
                        .probe_timeout_ms
                        .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS),
                ),
                multicast_timeout: Duration::from_secs(
                    discovery
                        .multicast_timeout_secs
                        .unwrap_or(DEFAULT_MULTICAST_TIMEOUT_SECS),
                ),
            },
            local_api_url: api.local_url.unwrap_or_default(),
            api_addr,
            paths: GatewayPaths::under(&base_dir),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(server) = non_empty_env("RELAY_SERVER") {
            self.relay_server = server;
        }
        if let Some(key) = non_empty_env("API_KEY") {
            self.api_key = key;
        }
        if let Some(url) = non_empty_env("BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(url) = non_empty_env("MEDIAMTX_API") {
            self.relay_api_url = url;
        }
        if let Some(enabled) = non_empty_env("ONVIF_ENABLED") {
            self.onvif.enabled = parse_flag(&enabled)?;
        }
        if let Some(user) = non_empty_env("ONVIF_USER") {
            self.onvif.credentials.username = user;
        }
        if let Ok(password) = std::env::var("ONVIF_PASSWORD") {
            self.onvif.credentials.password = password;
        }
        if let Some(interval) = non_empty_env("DISCOVERY_INTERVAL") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("DISCOVERY_INTERVAL must be an integer number of seconds")
            })?;
            self.discovery.interval = Duration::from_secs(seconds);
        }
        if let Ok(range) = std::env::var("SCAN_RANGE") {
            let range = range.trim();
            self.discovery.scan_range = (!range.is_empty()).then(|| range.to_string());
        }
        if let Some(ports) = non_empty_env("SCAN_PORTS") {
            self.discovery.scan_ports = split_csv(&ports)
                .iter()
                .map(|port| {
                    port.parse::<u16>()
                        .map_err(|_| anyhow!("SCAN_PORTS entry '{}' is not a port", port))
                })
                .collect::<Result<_>>()?;
        }
        if let Some(workers) = non_empty_env("SCAN_WORKERS") {
            self.discovery.scan_workers = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("SCAN_WORKERS must be a positive integer"))?;
        }
        if let Some(enabled) = non_empty_env("DISCOVERY_ENABLED") {
            self.discovery.enabled = parse_flag(&enabled)?;
        }
        if let Some(dir) = non_empty_env("GATEWAY_DIR") {
            self.paths = GatewayPaths::under(Path::new(&dir));
        }
        if let Some(addr) = non_empty_env("GATEWAY_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(url) = non_empty_env("GATEWAY_LOCAL_API_URL") {
            self.local_api_url = url;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.discovery.interval.is_zero() {
            return Err(anyhow!("discovery interval must be greater than zero"));
        }
        if self.discovery.scan_workers == 0 {
            return Err(anyhow!("scan worker limit must be greater than zero"));
        }
        if self.discovery.scan_ports.is_empty() {
            return Err(anyhow!("at least one scan port is required"));
        }
        if self.backend_url.is_empty() && !self.relay_server.is_empty() {
            self.backend_url = format!("http://{}:{}", self.relay_server, DEFAULT_BACKEND_PORT);
        }
        if self.local_api_url.is_empty() {
            self.local_api_url = format!("http://{}", self.api_addr);
        }
        self.relay_api_url = self.relay_api_url.trim_end_matches('/').to_string();
        self.backend_url = self.backend_url.trim_end_matches('/').to_string();
        Ok(())
    }

    /// Startup mode needs the upstream relay host and the gateway API key.
    pub fn require_upstream(&self) -> Result<()> {
        if self.relay_server.trim().is_empty() {
            return Err(anyhow!("RELAY_SERVER must be set"));
        }
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("API_KEY must be set"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean flag, got '{}'", other)),
    }
}

fn read_config_file(path: &Path) -> Result<GatewayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
