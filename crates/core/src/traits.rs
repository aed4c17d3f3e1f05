use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange error code for a stop order whose trigger price is already crossed.
pub const ORDER_IMMEDIATELY_TRIGGER: i64 = -2021;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error payload returned by the exchange on a rejected request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: i64,
    #[serde(rename = "msg")]
    pub message: String,
}

/// Errors that can occur during exchange operations.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Exchange error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Missing API credentials")]
    MissingCredentials,
    #[error("Pair not found: {0}")]
    PairNotFound(String),
    #[error("No trade record for order {0}")]
    TradeNotFound(i64),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Exchange error: {0}")]
    Other(String),
}

impl ExchangeError {
    /// The exchange error code, if the exchange rejected the request.
    pub fn code(&self) -> Option<i64> {
        match self {
            ExchangeError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a stop order was rejected because it would trigger immediately.
    pub fn is_immediate_trigger(&self) -> bool {
        self.code() == Some(ORDER_IMMEDIATELY_TRIGGER)
    }

    /// Transport failures and unexpected statuses may succeed on a retry.
    /// Rejections and local errors will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::ConnectionFailed(_)
                | ExchangeError::UnexpectedStatus { .. }
                | ExchangeError::Stream(_)
        )
    }
}

impl From<ErrorResponse> for ExchangeError {
    fn from(err: ErrorResponse) -> Self {
        ExchangeError::Api {
            code: err.code,
            message: err.message,
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Parse a numeric string field of an exchange response.
pub fn parse_decimal(value: &str, field: &str) -> ExchangeResult<Decimal> {
    value
        .trim()
        .parse::<Decimal>()
        .map_err(|e| ExchangeError::ParseError(format!("{field}={value:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Exchange Trait
// ---------------------------------------------------------------------------

/// Operations shared by every market client.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Short name of the market (e.g. "futures", "spot").
    fn market(&self) -> &str;

    /// Check connectivity. Failures are logged and reported as `false`.
    async fn ping(&self) -> bool;

    /// Latest traded price of a symbol.
    async fn last_price(&self, symbol: &str) -> ExchangeResult<Decimal>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_response_maps_code() {
        let body = r#"{"code":-2021,"msg":"Order would immediately trigger."}"#;
        let resp: ErrorResponse = serde_json::from_str(body).unwrap();
        let err = ExchangeError::from(resp);
        assert_eq!(err.code(), Some(-2021));
        assert!(err.is_immediate_trigger());
        assert!(err.to_string().contains("immediately trigger"));
    }

    #[test]
    fn test_retryable_errors() {
        let reset = ExchangeError::ConnectionFailed("reset".into());
        assert!(reset.is_retryable());
        let status = ExchangeError::UnexpectedStatus {
            status: 502,
            body: "bad gateway".into(),
        };
        assert!(status.is_retryable());

        let rejected = ExchangeError::Api {
            code: -1121,
            message: "Invalid symbol.".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(!ExchangeError::Storage("disk full".into()).is_retryable());
        assert!(!ExchangeError::MissingCredentials.is_retryable());
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("0.00100000", "qty").unwrap(), dec!(0.001));
        assert_eq!(parse_decimal(" 42 ", "qty").unwrap(), dec!(42));
        let err = parse_decimal("abc", "walletBalance").unwrap_err();
        assert!(matches!(err, ExchangeError::ParseError(msg) if msg.contains("walletBalance")));
    }
}
