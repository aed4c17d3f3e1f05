//! Request and response shapes shared by the futures and spot endpoints.

use serde::{Deserialize, Serialize};
use trader_brokers_common::Params;

/// Endpoints that return an object when filtered by symbol and an array otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Latest price of a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolPrice {
    pub symbol: String,
    pub price: String,
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKey {
    pub listen_key: String,
}

/// Body of endpoints that only acknowledge (`{}` or `{"code":200,"msg":"success"}`).
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Ack {}

/// Candlestick query, shared by the spot and futures kline endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineRequest {
    pub symbol: String,
    pub interval: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<u32>,
}

impl KlineRequest {
    pub fn new(symbol: &str, interval: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            start_time: None,
            end_time: None,
            limit: None,
        }
    }

    pub fn between(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    /// Open-ended query from `start_time`.
    pub fn starting_at(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn params(&self) -> Params {
        let mut params: Params = vec![
            ("symbol", self.symbol.clone()),
            ("interval", self.interval.clone()),
        ];
        if let Some(start) = self.start_time {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = self.end_time {
            params.push(("endTime", end.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        params
    }
}

type RawKline = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    String,
    String,
    serde_json::Value,
);

/// One candlestick. The exchange sends it as a 12-element array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawKline")]
pub struct Kline {
    pub open_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub close_time: i64,
    pub quote_asset_volume: String,
    pub trade_count: i64,
    pub taker_buy_base_volume: String,
    pub taker_buy_quote_volume: String,
}

impl From<RawKline> for Kline {
    fn from(raw: RawKline) -> Self {
        Self {
            open_time: raw.0,
            open: raw.1,
            high: raw.2,
            low: raw.3,
            close: raw.4,
            volume: raw.5,
            close_time: raw.6,
            quote_asset_volume: raw.7,
            trade_count: raw.8,
            taker_buy_base_volume: raw.9,
            taker_buy_quote_volume: raw.10,
        }
    }
}
