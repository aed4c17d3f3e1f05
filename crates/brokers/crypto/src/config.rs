use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use trader_brokers_common::{Credential, RestClientConfig};
use trader_core::{ExchangeError, ExchangeResult};

pub const FUTURES_REST_URL: &str = "https://fapi.binance.com";
pub const FUTURES_WS_URL: &str = "wss://fstream.binance.com";
pub const SPOT_REST_URL: &str = "https://api.binance.com";

pub const FUTURES_TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";
pub const FUTURES_TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";
pub const SPOT_TESTNET_REST_URL: &str = "https://testnet.binance.vision";

/// Interval between server-time resyncs of a futures client.
pub const DEFAULT_TIME_SYNC_INTERVAL_SECS: u64 = 20 * 60;

/// Configuration shared by the futures and spot clients.
///
/// Every field has a default, so a TOML file only needs the keys it overrides.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub secret_key: String,
    pub futures_rest_url: String,
    pub futures_ws_url: String,
    pub spot_rest_url: String,
    /// `recvWindow` sent with signed requests, in milliseconds.
    pub recv_window: Option<u64>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Server-time resync period in seconds; 0 disables the background sync.
    pub time_sync_interval_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            futures_rest_url: FUTURES_REST_URL.to_string(),
            futures_ws_url: FUTURES_WS_URL.to_string(),
            spot_rest_url: SPOT_REST_URL.to_string(),
            recv_window: None,
            timeout_secs: 30,
            time_sync_interval_secs: DEFAULT_TIME_SYNC_INTERVAL_SECS,
        }
    }
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("futures_rest_url", &self.futures_rest_url)
            .field("futures_ws_url", &self.futures_ws_url)
            .field("spot_rest_url", &self.spot_rest_url)
            .field("recv_window", &self.recv_window)
            .field("timeout_secs", &self.timeout_secs)
            .field("time_sync_interval_secs", &self.time_sync_interval_secs)
            .finish()
    }
}

impl ExchangeConfig {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            ..Default::default()
        }
    }

    /// Endpoints of the public test network.
    pub fn testnet(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self::new(api_key, secret_key).with_testnet_endpoints()
    }

    /// Point every endpoint at the test network, keeping the other settings.
    pub fn with_testnet_endpoints(self) -> Self {
        Self {
            futures_rest_url: FUTURES_TESTNET_REST_URL.to_string(),
            futures_ws_url: FUTURES_TESTNET_WS_URL.to_string(),
            spot_rest_url: SPOT_TESTNET_REST_URL.to_string(),
            ..self
        }
    }

    pub fn from_toml_str(raw: &str) -> ExchangeResult<Self> {
        toml::from_str(raw).map_err(|e| ExchangeError::ParseError(format!("config: {}", e)))
    }

    pub fn from_file(path: &Path) -> ExchangeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ExchangeError::Other(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn credential(&self) -> Option<Credential> {
        Credential::from_parts(&self.api_key, &self.secret_key)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn time_sync_interval(&self) -> Option<Duration> {
        (self.time_sync_interval_secs > 0)
            .then(|| Duration::from_secs(self.time_sync_interval_secs))
    }

    pub(crate) fn futures_rest(&self) -> RestClientConfig {
        RestClientConfig {
            base_url: self.futures_rest_url.clone(),
            recv_window: self.recv_window,
            timeout: self.timeout(),
        }
    }

    pub(crate) fn spot_rest(&self) -> RestClientConfig {
        RestClientConfig {
            base_url: self.spot_rest_url.clone(),
            recv_window: self.recv_window,
            timeout: self.timeout(),
        }
    }
}
