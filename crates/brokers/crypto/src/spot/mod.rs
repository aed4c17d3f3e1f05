pub mod client;
pub mod models;

pub use crate::models::{Kline, KlineRequest};
pub use client::SpotClient;
pub use models::{SpotExchangeInfo, SpotSymbol, TransferResponse};
