use serde::{Deserialize, Serialize};
use std::fmt;

/// Best bid/ask update from a book-ticker stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsBookTickerEvent {
    #[serde(rename = "e", default)]
    pub event_type: String,
    #[serde(rename = "u")]
    pub update_id: i64,
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "T", default)]
    pub transaction_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub best_bid_price: String,
    #[serde(rename = "B")]
    pub best_bid_qty: String,
    #[serde(rename = "a")]
    pub best_ask_price: String,
    #[serde(rename = "A")]
    pub best_ask_qty: String,
}

/// Aggregate trade from an `aggTrade` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsAggTradeEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a")]
    pub aggregate_trade_id: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "f")]
    pub first_trade_id: i64,
    #[serde(rename = "l")]
    pub last_trade_id: i64,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub maker: bool,
}

/// Envelope of a combined stream (`/stream?streams=a/b`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedEvent<T> {
    pub stream: String,
    pub data: T,
}

/// A book-ticker or aggregate-trade update, for consumers that handle both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketDataEvent {
    BookTicker(WsBookTickerEvent),
    AggTrade(WsAggTradeEvent),
}

impl MarketDataEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketDataEvent::BookTicker(e) => &e.symbol,
            MarketDataEvent::AggTrade(e) => &e.symbol,
        }
    }
}

impl From<WsBookTickerEvent> for MarketDataEvent {
    fn from(event: WsBookTickerEvent) -> Self {
        MarketDataEvent::BookTicker(event)
    }
}

impl From<WsAggTradeEvent> for MarketDataEvent {
    fn from(event: WsAggTradeEvent) -> Self {
        MarketDataEvent::AggTrade(event)
    }
}

impl fmt::Display for MarketDataEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketDataEvent::BookTicker(t) => write!(
                f,
                "{} bid={}@{} ask={}@{}",
                t.symbol, t.best_bid_qty, t.best_bid_price, t.best_ask_qty, t.best_ask_price
            ),
            MarketDataEvent::AggTrade(t) => write!(
                f,
                "{} trade {} x {} maker={}",
                t.symbol, t.price, t.quantity, t.maker
            ),
        }
    }
}
