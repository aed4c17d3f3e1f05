use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a contract that accepts orders.
pub const CONTRACT_TRADING_STATUS: &str = "TRADING";
/// Filter carrying quantity limits.
pub const LOT_SIZE_FILTER_TYPE: &str = "LOT_SIZE";
/// Filter carrying price limits.
pub const PRICE_FILTER_TYPE: &str = "PRICE_FILTER";
/// Filter carrying the minimum order notional.
pub const MIN_NOTIONAL_FILTER_TYPE: &str = "MIN_NOTIONAL";

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Position side in hedge mode (`Both` in one-way mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Both => "BOTH",
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

/// The type of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Stop => "STOP",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::TrailingStopMarket => "TRAILING_STOP_MARKET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
            TimeInForce::Gtx => "GTX",
        }
    }
}

/// How much detail the exchange returns for a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NewOrderRespType {
    Ack,
    Result,
}

impl NewOrderRespType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NewOrderRespType::Ack => "ACK",
            NewOrderRespType::Result => "RESULT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarginType {
    Isolated,
    Crossed,
}

impl MarginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Isolated => "ISOLATED",
            MarginType::Crossed => "CROSSED",
        }
    }
}

/// Futures contract type. Unknown types deserialize to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractType {
    Perpetual,
    CurrentMonth,
    NextMonth,
    CurrentQuarter,
    NextQuarter,
    PerpetualDelivering,
    #[serde(other)]
    Other,
}

/// Direction of a universal transfer between wallets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferType {
    /// Spot wallet to USDT-M futures wallet.
    #[serde(rename = "MAIN_UMFUTURE")]
    MainUmFuture,
    /// USDT-M futures wallet to spot wallet.
    #[serde(rename = "UMFUTURE_MAIN")]
    UmFutureMain,
    /// Any other transfer type accepted by the exchange.
    #[serde(untagged)]
    Custom(String),
}

impl TransferType {
    pub fn as_str(&self) -> &str {
        match self {
            TransferType::MainUmFuture => "MAIN_UMFUTURE",
            TransferType::UmFutureMain => "UMFUTURE_MAIN",
            TransferType::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Trading pairs
// ---------------------------------------------------------------------------

/// Quantity constraints from the `LOT_SIZE` filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSize {
    pub max_qty: Decimal,
    pub min_qty: Decimal,
    pub step_size: Decimal,
}

/// Price constraints from the `PRICE_FILTER` filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    pub max_price: Decimal,
    pub min_price: Decimal,
    pub tick_size: Decimal,
}

/// Metadata of a tradeable futures pair with its parsed filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolPair {
    pub symbol: String,
    pub pair: String,
    pub contract_type: ContractType,
    pub delivery_date: i64,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub min_notional: Decimal,
    #[serde(flatten)]
    pub lot_size: LotSize,
    #[serde(flatten)]
    pub price_filter: PriceFilter,
}

impl SymbolPair {
    pub fn is_trading(&self) -> bool {
        self.status == CONTRACT_TRADING_STATUS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolPairRequest {
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRequest {
    pub name: String,
    pub symbol: String,
}

/// Sizing snapshot for one symbol: limits, balance and the resulting quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolResponse {
    pub symbol: String,
    pub quote_asset: String,
    #[serde(flatten)]
    pub lot_size: LotSize,
    pub available_balance: Decimal,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceResponse {
    pub symbol: String,
    pub price: Decimal,
    pub time: String,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Parameters of a futures order.
///
/// Quantities and prices are kept as the decimal strings the exchange
/// expects; use the constructors for the common order shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub position_side: PositionSide,
    pub order_type: OrderType,
    pub quantity: String,
    pub new_order_resp_type: NewOrderRespType,
    pub time_in_force: Option<TimeInForce>,
    pub price: Option<String>,
    pub stop_price: Option<String>,
    /// Overrides the generated client order ID when set.
    pub new_client_order_id: Option<String>,
}

impl OrderRequest {
    fn base(symbol: &str, side: Side, order_type: OrderType, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            position_side: PositionSide::Both,
            order_type,
            quantity: quantity.normalize().to_string(),
            new_order_resp_type: NewOrderRespType::Result,
            time_in_force: None,
            price: None,
            stop_price: None,
            new_client_order_id: None,
        }
    }

    /// Create a good-till-cancel limit order.
    pub fn limit(symbol: &str, side: Side, quantity: Decimal, price: Decimal) -> Self {
        let mut order = Self::base(symbol, side, OrderType::Limit, quantity);
        order.price = Some(price.normalize().to_string());
        order.time_in_force = Some(TimeInForce::Gtc);
        order
    }

    /// Create a market order.
    pub fn market(symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self::base(symbol, side, OrderType::Market, quantity)
    }

    /// Create a stop (`STOP`) or take-profit (`TAKE_PROFIT`) order with a limit price.
    pub fn stop(
        symbol: &str,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        price: Decimal,
        stop_price: Decimal,
    ) -> Self {
        let mut order = Self::base(symbol, side, order_type, quantity);
        order.price = Some(price.normalize().to_string());
        order.stop_price = Some(stop_price.normalize().to_string());
        order
    }

    /// Create a `STOP_MARKET` or `TAKE_PROFIT_MARKET` order.
    pub fn stop_market(
        symbol: &str,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        let mut order = Self::base(symbol, side, order_type, quantity);
        order.stop_price = Some(stop_price.normalize().to_string());
        order
    }

    pub fn with_position_side(mut self, position_side: PositionSide) -> Self {
        self.position_side = position_side;
        self
    }

    pub fn with_resp_type(mut self, resp_type: NewOrderRespType) -> Self {
        self.new_order_resp_type = resp_type;
        self
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = Some(time_in_force);
        self
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.new_client_order_id = Some(id.into());
        self
    }
}

/// Which placement path an order goes through. Drives the client order ID suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Limit,
    Market,
    Stop,
    StopMarket,
}

impl Placement {
    /// Suffix appended to generated client order IDs.
    ///
    /// Take-profit orders end in `P`, other stop orders in `L`, limit
    /// orders in `M`; market orders carry no suffix.
    pub fn client_id_suffix(&self, order_type: OrderType) -> &'static str {
        match self {
            Placement::Limit => "M",
            Placement::Market => "",
            Placement::Stop if order_type == OrderType::TakeProfit => "P",
            Placement::StopMarket if order_type == OrderType::TakeProfitMarket => "P",
            Placement::Stop | Placement::StopMarket => "L",
        }
    }
}

/// Build a client order ID: symbol, nanosecond timestamp, suffix.
pub fn client_order_id(symbol: &str, timestamp_nanos: i64, suffix: &str) -> String {
    format!("{}{}{}", symbol, timestamp_nanos, suffix)
}
