use crate::credential::Credential;
use chrono::Utc;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use trader_core::{ErrorResponse, ExchangeError, ExchangeResult};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Query parameters in the order they are sent (and signed).
pub type Params = Vec<(&'static str, String)>;

/// Authentication required by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Public endpoint.
    None,
    /// API key header only (market data, user streams).
    ApiKey,
    /// API key header plus `timestamp` and HMAC `signature`.
    Signed,
}

/// Settings for a [`RestClient`].
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    pub base_url: String,
    pub recv_window: Option<u64>,
    pub timeout: Duration,
}

/// Minimal REST client: URL building, signing and error decoding.
///
/// The server-time offset is shared between clones so a background sync
/// updates every copy.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    credential: Option<Credential>,
    recv_window: Option<u64>,
    time_offset: Arc<AtomicI64>,
}

impl RestClient {
    pub fn new(config: RestClientConfig, credential: Option<Credential>) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::ConnectionFailed(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential,
            recv_window: config.recv_window,
            time_offset: Arc::new(AtomicI64::new(0)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Offset in milliseconds added to the local clock for signed requests.
    pub fn time_offset(&self) -> i64 {
        self.time_offset.load(Ordering::Relaxed)
    }

    pub fn set_time_offset(&self, offset_ms: i64) {
        self.time_offset.store(offset_ms, Ordering::Relaxed);
    }

    /// Local time corrected by the server offset, in milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset()
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Params,
        security: Security,
    ) -> ExchangeResult<T> {
        self.request(Method::GET, path, params, security).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Params,
        security: Security,
    ) -> ExchangeResult<T> {
        self.request(Method::POST, path, params, security).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Params,
        security: Security,
    ) -> ExchangeResult<T> {
        self.request(Method::PUT, path, params, security).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Params,
        security: Security,
    ) -> ExchangeResult<T> {
        self.request(Method::DELETE, path, params, security).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Params,
        security: Security,
    ) -> ExchangeResult<T> {
        let credential = match security {
            Security::None => None,
            Security::ApiKey | Security::Signed => Some(
                self.credential
                    .as_ref()
                    .ok_or(ExchangeError::MissingCredentials)?,
            ),
        };

        let query = match (security, credential) {
            (Security::Signed, Some(cred)) => {
                signed_query(cred, params, self.timestamp_ms(), self.recv_window)?
            }
            _ => encode_query(&params)?,
        };

        let url = build_url(&self.base_url, path, &query);
        debug!(method = %method, path = %path, "Sending request");

        let mut request = self.http.request(method, url);
        if let Some(cred) = credential {
            request = request.header(API_KEY_HEADER, cred.api_key());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::ConnectionFailed(format!("{}: {}", path, e)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ExchangeError::ConnectionFailed(format!("{}: {}", path, e)))?;

        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &body));
        }

        serde_json::from_slice(&body)
            .map_err(|e| ExchangeError::ParseError(format!("{}: {}", path, e)))
    }
}

/// URL-encode parameters in their given order.
pub fn encode_query(params: &[(&'static str, String)]) -> ExchangeResult<String> {
    serde_urlencoded::to_string(params)
        .map_err(|e| ExchangeError::ParseError(format!("query encoding: {}", e)))
}

/// Append `timestamp`, optional `recvWindow` and the `signature` over the whole query.
pub fn signed_query(
    credential: &Credential,
    mut params: Params,
    timestamp_ms: i64,
    recv_window: Option<u64>,
) -> ExchangeResult<String> {
    if let Some(window) = recv_window {
        params.push(("recvWindow", window.to_string()));
    }
    params.push(("timestamp", timestamp_ms.to_string()));

    let mut query = encode_query(&params)?;
    let signature = credential.sign(&query);
    query.push_str("&signature=");
    query.push_str(&signature);
    Ok(query)
}

pub fn build_url(base_url: &str, path: &str, query: &str) -> String {
    let mut url = if path.starts_with('/') {
        format!("{}{}", base_url, path)
    } else {
        format!("{}/{}", base_url, path)
    };
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Decode an error body, preferring the exchange's `{"code","msg"}` payload.
pub fn decode_error(status: u16, body: &[u8]) -> ExchangeError {
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(err) => err.into(),
        Err(_) => ExchangeError::UnexpectedStatus {
            status,
            body: String::from_utf8_lossy(body).to_string(),
        },
    }
}
