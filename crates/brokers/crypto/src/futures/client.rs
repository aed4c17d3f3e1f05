use super::models::*;
use super::parse;
use crate::config::ExchangeConfig;
use crate::models::{Ack, Kline, KlineRequest, ListenKey, OneOrMany, ServerTime, SymbolPrice};
use crate::spot::SpotClient;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info, warn};
use trader_brokers_common::{collect_for, watch_for, Params, PeriodicTask, RestClient, Security};
use trader_core::*;

/// Order book depth requested by [`FutureClient::depth`].
pub const DEPTH_LIMIT: u32 = 5;

/// Sampling windows of the stream helpers.
pub const BOOK_TICKER_SAMPLE: Duration = Duration::from_secs(20);
pub const ALL_BOOK_TICKER_SAMPLE: Duration = Duration::from_secs(20 * 60 * 60);
pub const COMBINED_AGG_TRADE_SAMPLE: Duration = Duration::from_secs(20);
pub const AGG_TRADE_SAMPLE: Duration = Duration::from_secs(30);

/// USDT-M futures client.
///
/// Each call is a single request; errors are logged and returned, never
/// retried. A background task resyncs the clock offset with the server
/// until [`FutureClient::shutdown`] is called or the client is dropped.
pub struct FutureClient {
    config: ExchangeConfig,
    rest: RestClient,
    time_sync: Option<PeriodicTask>,
}

impl FutureClient {
    pub async fn new(api_key: &str, secret_key: &str) -> ExchangeResult<Self> {
        Self::with_config(ExchangeConfig::new(api_key, secret_key)).await
    }

    /// Build the client, sync the clock once and start the periodic resync.
    pub async fn with_config(config: ExchangeConfig) -> ExchangeResult<Self> {
        let rest = RestClient::new(config.futures_rest(), config.credential())?;

        if let Err(e) = sync_server_time(&rest).await {
            warn!(error = %e, "Initial server time sync failed");
        }

        let time_sync = config.time_sync_interval().map(|period| {
            let rest = rest.clone();
            PeriodicTask::spawn("futures-time-sync", period, move || {
                let rest = rest.clone();
                async move {
                    if let Err(e) = sync_server_time(&rest).await {
                        warn!(error = %e, "Server time sync failed");
                    }
                }
            })
        });

        info!(base_url = %rest.base_url(), "Futures client ready");
        Ok(Self {
            config,
            rest,
            time_sync,
        })
    }

    /// Stop the background time sync and wait for it to exit.
    pub async fn shutdown(&mut self) {
        if let Some(mut task) = self.time_sync.take() {
            task.shutdown().await;
            info!("Futures client shut down");
        }
    }

    pub fn is_time_sync_running(&self) -> bool {
        self.time_sync
            .as_ref()
            .is_some_and(PeriodicTask::is_running)
    }

    pub fn time_offset(&self) -> i64 {
        self.rest.time_offset()
    }

    // -----------------------------------------------------------------------
    // Exchange metadata
    // -----------------------------------------------------------------------

    pub async fn ping(&self) -> bool {
        match self
            .rest
            .get::<Ack>("/fapi/v1/ping", Vec::new(), Security::None)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Futures ping failed");
                false
            }
        }
    }

    /// Sync the clock offset with the server and return it in milliseconds.
    pub async fn set_server_time(&self) -> ExchangeResult<i64> {
        sync_server_time(&self.rest).await
    }

    pub async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        self.rest
            .get("/fapi/v1/exchangeInfo", Vec::new(), Security::None)
            .await
            .inspect_err(|e| warn!(error = %e, "Exchange info request failed"))
    }

    /// Trading perpetual contracts with their parsed filters.
    pub async fn pairs(&self) -> ExchangeResult<Vec<SymbolPair>> {
        let info = self.exchange_info().await?;
        Ok(parse::tradable_perpetual_pairs(&info.symbols))
    }

    pub async fn pair_by_symbol(&self, symbol: &str) -> ExchangeResult<SymbolPair> {
        self.pairs()
            .await?
            .into_iter()
            .find(|p| p.symbol == symbol)
            .ok_or_else(|| ExchangeError::PairNotFound(symbol.to_string()))
    }

    // -----------------------------------------------------------------------
    // Leverage and margin
    // -----------------------------------------------------------------------

    pub async fn change_leverage(
        &self,
        symbol: &str,
        leverage: u32,
    ) -> ExchangeResult<ChangeLeverageResponse> {
        let params: Params = vec![
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        self.rest
            .post("/fapi/v1/leverage", params, Security::Signed)
            .await
    }

    pub async fn change_margin_type(
        &self,
        symbol: &str,
        margin_type: MarginType,
    ) -> ExchangeResult<()> {
        let params: Params = vec![
            ("symbol", symbol.to_string()),
            ("marginType", margin_type.as_str().to_string()),
        ];
        self.rest
            .post::<Ack>("/fapi/v1/marginType", params, Security::Signed)
            .await?;
        Ok(())
    }

    /// Initial leverage of the symbol's first leverage bracket.
    pub async fn max_leverage(&self, symbol: &str) -> ExchangeResult<u32> {
        let params: Params = vec![("symbol", symbol.to_string())];
        let brackets: OneOrMany<LeverageBracket> = self
            .rest
            .get("/fapi/v1/leverageBracket", params, Security::Signed)
            .await
            .inspect_err(|e| {
                warn!(error = %e, symbol = %symbol, "Leverage bracket request failed")
            })?;

        brackets
            .into_vec()
            .into_iter()
            .next()
            .and_then(|b| b.brackets.into_iter().next())
            .map(|b| b.initial_leverage)
            .ok_or_else(|| {
                warn!(symbol = %symbol, "No leverage bracket for symbol");
                ExchangeError::PairNotFound(symbol.to_string())
            })
    }

    /// Margin type and leverage of the symbol's first position-risk record.
    pub async fn position_risk(&self, symbol: &str) -> ExchangeResult<(String, u32)> {
        let params: Params = vec![("symbol", symbol.to_string())];
        let risks: Vec<PositionRisk> = self
            .rest
            .get("/fapi/v2/positionRisk", params, Security::Signed)
            .await?;
        let risk = risks
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::PairNotFound(symbol.to_string()))?;
        let leverage = risk
            .leverage
            .parse::<u32>()
            .map_err(|e| {
                ExchangeError::ParseError(format!("leverage={:?}: {}", risk.leverage, e))
            })?;
        Ok((risk.margin_type, leverage))
    }

    // -----------------------------------------------------------------------
    // Account and positions
    // -----------------------------------------------------------------------

    pub async fn account(&self) -> ExchangeResult<Account> {
        self.rest
            .get("/fapi/v2/account", Vec::new(), Security::Signed)
            .await
            .inspect_err(|e| warn!(error = %e, "Account request failed"))
    }

    /// The open position for a symbol and side, if any.
    pub async fn position(
        &self,
        symbol: &str,
        side: PositionSide,
    ) -> ExchangeResult<Option<AccountPosition>> {
        let account = self.account().await?;
        Ok(account.positions.into_iter().find(|p| {
            p.symbol == symbol && p.position_side == side.as_str() && parse::is_open(p)
        }))
    }

    /// All positions with a non-zero amount.
    pub async fn all_positions(&self) -> ExchangeResult<Vec<AccountPosition>> {
        let account = self.account().await?;
        Ok(parse::open_positions(account.positions))
    }

    /// Assets with a positive wallet balance.
    pub async fn assets(&self) -> ExchangeResult<Vec<AccountAsset>> {
        let account = self.account().await?;
        Ok(parse::funded_assets(account.assets))
    }

    /// Withdrawable amount of a funded asset; zero when the asset is not funded.
    pub async fn assets_by_quote(&self, quote: &str) -> ExchangeResult<Decimal> {
        match self.assets().await?.into_iter().find(|a| a.asset == quote) {
            Some(asset) => parse_decimal(&asset.max_withdraw_amount, "maxWithdrawAmount"),
            None => Ok(Decimal::ZERO),
        }
    }

    /// First entry of the futures balance list.
    pub async fn balance(&self) -> ExchangeResult<Balance> {
        let balances: Vec<Balance> = self
            .rest
            .get("/fapi/v2/balance", Vec::new(), Security::Signed)
            .await
            .inspect_err(|e| warn!(error = %e, "Balance request failed"))?;
        balances
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Other("Empty balance list".to_string()))
    }

    // -----------------------------------------------------------------------
    // Market data
    // -----------------------------------------------------------------------

    /// Price ticker of one symbol.
    pub async fn symbol_price(&self, symbol: &str) -> ExchangeResult<SymbolPrice> {
        let params: Params = vec![("symbol", symbol.to_string())];
        let prices: OneOrMany<SymbolPrice> = self
            .rest
            .get("/fapi/v1/ticker/price", params, Security::None)
            .await?;
        prices
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::PairNotFound(symbol.to_string()))
    }

    pub async fn all_prices(&self) -> ExchangeResult<Vec<SymbolPrice>> {
        let prices: OneOrMany<SymbolPrice> = self
            .rest
            .get("/fapi/v1/ticker/price", Vec::new(), Security::None)
            .await
            .inspect_err(|e| warn!(error = %e, "Price list request failed"))?;
        Ok(prices.into_vec())
    }

    /// Price ticker of one symbol, found by scanning the full price list.
    pub async fn symbol_price_from_all(&self, symbol: &str) -> ExchangeResult<SymbolPrice> {
        self.all_prices()
            .await?
            .into_iter()
            .find(|p| p.symbol == symbol)
            .ok_or_else(|| ExchangeError::PairNotFound(symbol.to_string()))
    }

    /// Parsed price of one symbol, found by scanning the full price list.
    pub async fn price_from_all(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let price = self.symbol_price_from_all(symbol).await?;
        parse_decimal(&price.price, "price").inspect_err(|e| warn!(error = %e, "Bad price"))
    }

    pub async fn ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let price = self
            .symbol_price(symbol)
            .await
            .inspect_err(|e| warn!(error = %e, symbol = %symbol, "Ticker price request failed"))?;
        parse_decimal(&price.price, "price").inspect_err(|e| warn!(error = %e, "Bad price"))
    }

    pub async fn book_tickers(&self) -> ExchangeResult<Vec<BookTicker>> {
        let tickers: OneOrMany<BookTicker> = self
            .rest
            .get("/fapi/v1/ticker/bookTicker", Vec::new(), Security::None)
            .await?;
        Ok(tickers.into_vec())
    }

    /// Mark price, index price and funding of a symbol.
    pub async fn mark_price(&self, symbol: &str) -> ExchangeResult<MarkPrice> {
        let params: Params = vec![("symbol", symbol.to_string())];
        self.rest
            .get("/fapi/v1/premiumIndex", params, Security::None)
            .await
    }

    pub async fn depth(&self, symbol: &str) -> ExchangeResult<DepthResponse> {
        let params: Params = vec![
            ("symbol", symbol.to_string()),
            ("limit", DEPTH_LIMIT.to_string()),
        ];
        self.rest
            .get("/fapi/v1/depth", params, Security::None)
            .await
    }

    pub async fn klines(&self, request: &KlineRequest) -> ExchangeResult<Vec<Kline>> {
        self.rest
            .get("/fapi/v1/klines", request.params(), Security::None)
            .await
    }

    /// Spot price of a symbol through an unauthenticated spot client.
    pub async fn spot_ticker_price(&self, symbol: &str) -> ExchangeResult<SymbolPrice> {
        let spot = SpotClient::with_config(&ExchangeConfig {
            api_key: String::new(),
            secret_key: String::new(),
            ..self.config.clone()
        })?;
        spot.ticker_price(symbol).await
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Place a limit order. Generated client IDs end in `M`.
    pub async fn place_limit_order(
        &self,
        order: &OrderRequest,
    ) -> ExchangeResult<CreateOrderResponse> {
        let mut params = self.order_params(order, Placement::Limit);
        push_opt(&mut params, "price", order.price.as_ref());
        let tif = order.time_in_force.unwrap_or(TimeInForce::Gtc);
        params.push(("timeInForce", tif.as_str().to_string()));
        self.submit_order(params).await
    }

    /// Place a stop or take-profit limit order. Generated client IDs end in
    /// `P` for take-profit and `L` otherwise.
    pub async fn place_stop_order(
        &self,
        order: &OrderRequest,
    ) -> ExchangeResult<CreateOrderResponse> {
        let mut params = self.order_params(order, Placement::Stop);
        push_opt(&mut params, "price", order.price.as_ref());
        push_opt(&mut params, "stopPrice", order.stop_price.as_ref());
        if let Some(tif) = order.time_in_force {
            params.push(("timeInForce", tif.as_str().to_string()));
        }
        self.submit_order(params).await
    }

    /// Place a stop-market or take-profit-market order. Generated client
    /// IDs end in `P` for take-profit and `L` otherwise.
    pub async fn place_stop_market_order(
        &self,
        order: &OrderRequest,
    ) -> ExchangeResult<CreateOrderResponse> {
        let mut params = self.order_params(order, Placement::StopMarket);
        push_opt(&mut params, "stopPrice", order.stop_price.as_ref());
        self.submit_order(params).await
    }

    /// Place a market order. Generated client IDs carry no suffix.
    pub async fn place_market_order(
        &self,
        order: &OrderRequest,
    ) -> ExchangeResult<CreateOrderResponse> {
        let params = self.order_params(order, Placement::Market);
        self.submit_order(params).await
    }

    fn order_params(&self, order: &OrderRequest, placement: Placement) -> Params {
        let client_id = order.new_client_order_id.clone().unwrap_or_else(|| {
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            client_order_id(
                &order.symbol,
                nanos,
                placement.client_id_suffix(order.order_type),
            )
        });
        vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("positionSide", order.position_side.as_str().to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", order.quantity.clone()),
            ("newClientOrderId", client_id),
            ("newOrderRespType", order.new_order_resp_type.as_str().to_string()),
        ]
    }

    async fn submit_order(&self, params: Params) -> ExchangeResult<CreateOrderResponse> {
        let response: CreateOrderResponse = self
            .rest
            .post("/fapi/v1/order", params, Security::Signed)
            .await
            .inspect_err(|e| warn!(error = %e, "Order rejected"))?;
        info!(
            symbol = %response.symbol,
            order_id = response.order_id,
            client_order_id = %response.client_order_id,
            "Order placed"
        );
        Ok(response)
    }

    pub async fn open_orders(&self, symbol: &str) -> ExchangeResult<Vec<Order>> {
        let params: Params = vec![("symbol", symbol.to_string())];
        self.rest
            .get("/fapi/v1/openOrders", params, Security::Signed)
            .await
    }

    pub async fn order(&self, symbol: &str, order_id: i64) -> ExchangeResult<Order> {
        let params: Params = vec![
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        self.rest
            .get("/fapi/v1/order", params, Security::Signed)
            .await
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: i64,
    ) -> ExchangeResult<CancelOrderResponse> {
        let params: Params = vec![
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        self.rest
            .delete("/fapi/v1/order", params, Security::Signed)
            .await
    }

    pub async fn cancel_all_open_orders(&self, symbol: &str) -> ExchangeResult<()> {
        let params: Params = vec![("symbol", symbol.to_string())];
        self.rest
            .delete::<Ack>("/fapi/v1/allOpenOrders", params, Security::Signed)
            .await?;
        Ok(())
    }

    /// Account trades of a symbol; non-positive bounds are not sent.
    pub async fn user_trades(
        &self,
        symbol: &str,
        start_time: i64,
        end_time: i64,
    ) -> ExchangeResult<Vec<AccountTrade>> {
        let mut params: Params = vec![("symbol", symbol.to_string())];
        if start_time > 0 {
            params.push(("startTime", start_time.to_string()));
        }
        if end_time > 0 {
            params.push(("endTime", end_time.to_string()));
        }
        self.rest
            .get("/fapi/v1/userTrades", params, Security::Signed)
            .await
    }

    /// First trade of an order within the given window.
    pub async fn user_trade_by_order_id(
        &self,
        order_id: i64,
        symbol: &str,
        start_time: i64,
        end_time: i64,
    ) -> ExchangeResult<AccountTrade> {
        self.user_trades(symbol, start_time, end_time)
            .await?
            .into_iter()
            .find(|t| t.order_id == order_id)
            .ok_or(ExchangeError::TradeNotFound(order_id))
    }

    // -----------------------------------------------------------------------
    // User data stream
    // -----------------------------------------------------------------------

    pub async fn new_listen_key(&self) -> ExchangeResult<String> {
        let key: ListenKey = self
            .rest
            .post("/fapi/v1/listenKey", Vec::new(), Security::ApiKey)
            .await?;
        Ok(key.listen_key)
    }

    pub async fn keepalive_listen_key(&self, listen_key: &str) -> ExchangeResult<()> {
        let params: Params = vec![("listenKey", listen_key.to_string())];
        self.rest
            .put::<Ack>("/fapi/v1/listenKey", params, Security::ApiKey)
            .await?;
        Ok(())
    }

    pub async fn close_listen_key(&self, listen_key: &str) -> ExchangeResult<()> {
        let params: Params = vec![("listenKey", listen_key.to_string())];
        self.rest
            .delete::<Ack>("/fapi/v1/listenKey", params, Security::ApiKey)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stream sampling
    // -----------------------------------------------------------------------

    fn stream_url(&self, stream: &str) -> String {
        format!(
            "{}/ws/{}",
            self.config.futures_ws_url.trim_end_matches('/'),
            stream
        )
    }

    fn combined_stream_url(&self, streams: &[String]) -> String {
        format!(
            "{}/stream?streams={}",
            self.config.futures_ws_url.trim_end_matches('/'),
            streams.join("/")
        )
    }

    /// Feed one symbol's book ticker updates to `handler` for `duration`.
    pub async fn watch_book_ticker<H>(
        &self,
        symbol: &str,
        duration: Duration,
        handler: H,
    ) -> ExchangeResult<()>
    where
        H: FnMut(WsBookTickerEvent) + Send + 'static,
    {
        let url = self.stream_url(&format!("{}@bookTicker", symbol.to_lowercase()));
        watch_for(&url, duration, handler).await
    }

    /// Feed every symbol's book ticker updates to `handler` for `duration`.
    pub async fn watch_all_book_tickers<H>(
        &self,
        duration: Duration,
        handler: H,
    ) -> ExchangeResult<()>
    where
        H: FnMut(WsBookTickerEvent) + Send + 'static,
    {
        watch_for(&self.stream_url("!bookTicker"), duration, handler).await
    }

    /// Feed aggregate trades of several symbols to `handler` for `duration`.
    pub async fn watch_combined_agg_trades<H>(
        &self,
        symbols: &[&str],
        duration: Duration,
        mut handler: H,
    ) -> ExchangeResult<()>
    where
        H: FnMut(WsAggTradeEvent) + Send + 'static,
    {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@aggTrade", s.to_lowercase()))
            .collect();
        let url = self.combined_stream_url(&streams);
        debug!(streams = streams.len(), "Starting combined aggTrade stream");
        watch_for(&url, duration, move |event: CombinedEvent<WsAggTradeEvent>| {
            handler(event.data)
        })
        .await
    }

    /// Collect one symbol's aggregate trades for `duration`.
    pub async fn sample_agg_trades(
        &self,
        symbol: &str,
        duration: Duration,
    ) -> ExchangeResult<Vec<WsAggTradeEvent>> {
        let url = self.stream_url(&format!("{}@aggTrade", symbol.to_lowercase()));
        collect_for(&url, duration).await
    }
}

/// Fetch server time and store the offset from the local clock.
async fn sync_server_time(rest: &RestClient) -> ExchangeResult<i64> {
    let time: ServerTime = rest
        .get("/fapi/v1/time", Vec::new(), Security::None)
        .await?;
    let offset = time.server_time - Utc::now().timestamp_millis();
    rest.set_time_offset(offset);
    debug!(offset_ms = offset, "Server time synced");
    Ok(offset)
}

fn push_opt(params: &mut Params, key: &'static str, value: Option<&String>) {
    if let Some(value) = value {
        params.push((key, value.clone()));
    }
}

#[async_trait]
impl Exchange for FutureClient {
    fn market(&self) -> &str {
        "futures"
    }

    async fn ping(&self) -> bool {
        FutureClient::ping(self).await
    }

    async fn last_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.ticker_price(symbol).await
    }
}
