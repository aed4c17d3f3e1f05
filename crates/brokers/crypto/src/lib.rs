//! Binance exchange clients.
//!
//! [`FutureClient`] wraps the USDT-M futures REST API and its market
//! streams; [`SpotClient`] wraps the spot endpoints used alongside it.
//! [`KlineCrawler`] builds CSV candle histories from either market.

pub mod config;
pub mod crawl;
pub mod futures;
pub mod models;
pub mod spot;

pub use config::ExchangeConfig;
pub use crawl::{CrawlConfig, KlineCrawler, KlineSource};
pub use futures::FutureClient;
pub use models::{Kline, KlineRequest, ListenKey, ServerTime, SymbolPrice};
pub use spot::SpotClient;
