//! USDT-M futures response models.
//!
//! Numeric fields are kept as the strings the exchange sends.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trader_core::ContractType;

/// Exchange information from `GET /fapi/v1/exchangeInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub server_time: i64,
    pub symbols: Vec<FuturesSymbol>,
}

/// Symbol definition with its raw filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesSymbol {
    pub symbol: String,
    #[serde(default)]
    pub pair: String,
    pub contract_type: ContractType,
    #[serde(default)]
    pub delivery_date: i64,
    #[serde(default)]
    pub onboard_date: i64,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub margin_asset: String,
    #[serde(default)]
    pub price_precision: i32,
    #[serde(default)]
    pub quantity_precision: i32,
    #[serde(default)]
    pub order_types: Vec<String>,
    #[serde(default)]
    pub time_in_force: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Value>,
}

/// Futures account from `GET /fapi/v2/account`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Account {
    pub fee_tier: i32,
    pub can_trade: bool,
    pub can_deposit: bool,
    pub can_withdraw: bool,
    pub update_time: i64,
    pub total_initial_margin: String,
    pub total_maint_margin: String,
    pub total_wallet_balance: String,
    pub total_unrealized_profit: String,
    pub total_margin_balance: String,
    pub total_position_initial_margin: String,
    pub total_open_order_initial_margin: String,
    pub total_cross_wallet_balance: String,
    pub total_cross_un_pnl: String,
    pub available_balance: String,
    pub max_withdraw_amount: String,
    pub assets: Vec<AccountAsset>,
    pub positions: Vec<AccountPosition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountAsset {
    pub asset: String,
    pub wallet_balance: String,
    pub unrealized_profit: String,
    pub margin_balance: String,
    pub maint_margin: String,
    pub initial_margin: String,
    pub position_initial_margin: String,
    pub open_order_initial_margin: String,
    pub cross_wallet_balance: String,
    pub cross_un_pnl: String,
    pub available_balance: String,
    pub max_withdraw_amount: String,
    pub margin_available: bool,
    pub update_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountPosition {
    pub symbol: String,
    pub initial_margin: String,
    pub maint_margin: String,
    pub unrealized_profit: String,
    pub position_initial_margin: String,
    pub open_order_initial_margin: String,
    pub leverage: String,
    pub isolated: bool,
    pub entry_price: String,
    pub max_notional: String,
    pub position_side: String,
    pub position_amt: String,
    pub notional: String,
    pub isolated_wallet: String,
    pub update_time: i64,
}

/// Position risk record from `GET /fapi/v2/positionRisk`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PositionRisk {
    pub symbol: String,
    pub position_amt: String,
    pub entry_price: String,
    pub mark_price: String,
    #[serde(rename = "unRealizedProfit")]
    pub unrealized_profit: String,
    pub liquidation_price: String,
    pub leverage: String,
    pub max_notional_value: String,
    pub margin_type: String,
    pub isolated_margin: String,
    pub is_auto_add_margin: String,
    pub position_side: String,
    pub notional: String,
    pub isolated_wallet: String,
    pub update_time: i64,
}

/// Wallet balance from `GET /fapi/v2/balance`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Balance {
    pub account_alias: String,
    pub asset: String,
    pub balance: String,
    pub cross_wallet_balance: String,
    pub cross_un_pnl: String,
    pub available_balance: String,
    pub max_withdraw_amount: String,
    pub margin_available: bool,
    pub update_time: i64,
}

/// Best bid/ask of a symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookTicker {
    pub symbol: String,
    pub bid_price: String,
    pub bid_qty: String,
    pub ask_price: String,
    pub ask_qty: String,
    pub time: i64,
}

/// One `[price, quantity]` level of an order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, String)")]
pub struct PriceLevel {
    pub price: String,
    pub quantity: String,
}

impl From<(String, String)> for PriceLevel {
    fn from((price, quantity): (String, String)) -> Self {
        Self { price, quantity }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: i64,
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "T", default)]
    pub transaction_time: i64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Mark price and funding from `GET /fapi/v1/premiumIndex`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkPrice {
    pub symbol: String,
    pub mark_price: String,
    pub index_price: String,
    pub estimated_settle_price: String,
    pub last_funding_rate: String,
    pub interest_rate: String,
    pub next_funding_time: i64,
    pub time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageBracket {
    pub symbol: String,
    pub brackets: Vec<Bracket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
    pub bracket: u32,
    pub initial_leverage: u32,
    pub notional_cap: Decimal,
    pub notional_floor: Decimal,
    pub maint_margin_ratio: Decimal,
    #[serde(default)]
    pub cum: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLeverageResponse {
    pub leverage: u32,
    #[serde(default)]
    pub max_notional_value: String,
    pub symbol: String,
}

/// Response of `POST /fapi/v1/order`. `ACK` responses fill only the identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub price: String,
    pub orig_qty: String,
    pub executed_qty: String,
    pub cum_quote: String,
    pub avg_price: String,
    pub reduce_only: bool,
    pub status: String,
    pub stop_price: String,
    pub time_in_force: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    pub position_side: String,
    pub working_type: String,
    pub close_position: bool,
    pub price_protect: bool,
    pub update_time: i64,
}

/// Order as returned by the order query endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Order {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub price: String,
    pub avg_price: String,
    pub orig_qty: String,
    pub executed_qty: String,
    pub cum_quote: String,
    pub reduce_only: bool,
    pub status: String,
    pub stop_price: String,
    pub time_in_force: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub orig_type: String,
    pub side: String,
    pub position_side: String,
    pub working_type: String,
    pub close_position: bool,
    pub price_protect: bool,
    pub time: i64,
    pub update_time: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CancelOrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub price: String,
    pub orig_qty: String,
    pub executed_qty: String,
    pub cum_quote: String,
    pub reduce_only: bool,
    pub status: String,
    pub stop_price: String,
    pub time_in_force: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub orig_type: String,
    pub side: String,
    pub position_side: String,
    pub working_type: String,
    pub close_position: bool,
    pub update_time: i64,
}

/// Account trade from `GET /fapi/v1/userTrades`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountTrade {
    pub id: i64,
    pub order_id: i64,
    pub symbol: String,
    pub side: String,
    pub position_side: String,
    pub buyer: bool,
    pub maker: bool,
    pub price: String,
    #[serde(rename = "qty")]
    pub quantity: String,
    #[serde(rename = "quoteQty")]
    pub quote_quantity: String,
    pub realized_pnl: String,
    pub commission: String,
    pub commission_asset: String,
    pub time: i64,
}
