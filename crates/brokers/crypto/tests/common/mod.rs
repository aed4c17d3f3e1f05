//! Mock exchange serving the REST and WebSocket endpoints the clients use.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use trader_brokers_common::Credential;
use trader_brokers_crypto::ExchangeConfig;

pub const API_KEY: &str = "test-api-key";
pub const SECRET_KEY: &str = "test-secret-key";

/// Server clock lead reported by `/fapi/v1/time`, in milliseconds.
pub const SERVER_CLOCK_LEAD_MS: i64 = 60_000;

/// Open time of the first candle every symbol serves.
pub const KLINE_SERIES_START: i64 = 1_599_999_960_000;
/// Candles served per symbol.
pub const KLINE_SERIES_LEN: i64 = 250;

const SIGNED_PATHS: &[&str] = &[
    "/fapi/v1/leverage",
    "/fapi/v1/marginType",
    "/fapi/v1/leverageBracket",
    "/fapi/v2/positionRisk",
    "/fapi/v2/account",
    "/fapi/v2/balance",
    "/fapi/v1/order",
    "/fapi/v1/openOrders",
    "/fapi/v1/allOpenOrders",
    "/fapi/v1/userTrades",
    "/sapi/v1/asset/transfer",
];

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub api_key: Option<String>,
}

#[derive(Clone, Default)]
pub struct MockState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    time_requests: Arc<AtomicUsize>,
    kline_failures: Arc<AtomicUsize>,
}

impl MockState {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn time_requests(&self) -> usize {
        self.time_requests.load(Ordering::SeqCst)
    }

    /// Answer the next `n` kline requests with a bare 500.
    pub fn fail_next_klines(&self, n: usize) {
        self.kline_failures.store(n, Ordering::SeqCst);
    }

    fn take_kline_failure(&self) -> bool {
        self.kline_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct MockExchange {
    pub addr: SocketAddr,
    pub state: MockState,
}

impl MockExchange {
    pub async fn start() -> Self {
        let state = MockState::default();
        let router = Router::new()
            .route("/ws/{stream}", get(handle_raw_stream))
            .route("/stream", get(handle_combined_stream))
            .fallback(handle_rest)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    /// Config pointing every endpoint at this server, background sync off.
    pub fn config(&self) -> ExchangeConfig {
        ExchangeConfig {
            api_key: API_KEY.to_string(),
            secret_key: SECRET_KEY.to_string(),
            futures_rest_url: format!("http://{}", self.addr),
            futures_ws_url: format!("ws://{}", self.addr),
            spot_rest_url: format!("http://{}", self.addr),
            recv_window: Some(5000),
            timeout_secs: 5,
            time_sync_interval_secs: 0,
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn exchange_error(status: StatusCode, code: i64, msg: &str) -> Response {
    (status, Json(json!({"code": code, "msg": msg}))).into_response()
}

fn check_signature(raw_query: &str, api_key: Option<&str>) -> Result<(), Response> {
    if api_key != Some(API_KEY) {
        return Err(exchange_error(
            StatusCode::UNAUTHORIZED,
            -2015,
            "Invalid API-key, IP, or permissions for action.",
        ));
    }
    let Some((payload, signature)) = raw_query.split_once("&signature=") else {
        return Err(exchange_error(
            StatusCode::BAD_REQUEST,
            -1102,
            "Mandatory parameter 'signature' was not sent.",
        ));
    };
    let expected = Credential::new(API_KEY, SECRET_KEY).sign(payload);
    if signature != expected || !payload.contains("timestamp=") {
        return Err(exchange_error(
            StatusCode::BAD_REQUEST,
            -1022,
            "Signature for this request is not valid.",
        ));
    }
    Ok(())
}

async fn handle_rest(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();
    let raw_query = uri.query().unwrap_or_default().to_string();
    let query = parse_query(&raw_query);
    let api_key = headers
        .get("X-MBX-APIKEY")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        query: query.clone(),
        api_key: api_key.clone(),
    });

    if SIGNED_PATHS.contains(&path.as_str()) {
        if let Err(response) = check_signature(&raw_query, api_key.as_deref()) {
            return response;
        }
    }
    if path == "/fapi/v1/listenKey" && api_key.as_deref() != Some(API_KEY) {
        return exchange_error(StatusCode::UNAUTHORIZED, -2015, "Invalid API-key.");
    }
    if path.ends_with("/klines") && state.take_kline_failure() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream timeout").into_response();
    }

    let symbol = query.get("symbol").cloned().unwrap_or_default();
    let body = match (method.as_str(), path.as_str()) {
        ("GET", "/fapi/v1/ping") | ("GET", "/api/v3/ping") => json!({}),
        ("GET", "/fapi/v1/time") => {
            state.time_requests.fetch_add(1, Ordering::SeqCst);
            json!({"serverTime": now_ms() + SERVER_CLOCK_LEAD_MS})
        }
        ("GET", "/fapi/v1/exchangeInfo") => exchange_info(),
        ("GET", "/fapi/v2/account") => account(),
        ("GET", "/fapi/v2/balance") => json!([
            {"accountAlias": "SgsR", "asset": "USDT", "balance": "122607.35137903",
             "crossWalletBalance": "23.72469206", "crossUnPnl": "0.00000000",
             "availableBalance": "23.72469206", "maxWithdrawAmount": "23.72469206",
             "marginAvailable": true, "updateTime": 1617939110373i64}
        ]),
        ("GET", "/fapi/v1/ticker/price") | ("GET", "/api/v3/ticker/price") => {
            let prices = vec![
                json!({"symbol": "BTCUSDT", "price": "6000.01", "time": 1589437530011i64}),
                json!({"symbol": "ETHUSDT", "price": "200.10", "time": 1589437530011i64}),
            ];
            if symbol.is_empty() {
                Value::Array(prices)
            } else {
                match prices.into_iter().find(|p| p["symbol"] == symbol.as_str()) {
                    Some(price) => price,
                    None => {
                        return exchange_error(StatusCode::BAD_REQUEST, -1121, "Invalid symbol.")
                    }
                }
            }
        }
        ("GET", "/fapi/v1/ticker/bookTicker") => json!([
            {"symbol": "BTCUSDT", "bidPrice": "4.00000000", "bidQty": "431.00000000",
             "askPrice": "4.00000200", "askQty": "9.00000000", "time": 1589437530011i64}
        ]),
        ("GET", "/fapi/v1/premiumIndex") => json!({
            "symbol": symbol, "markPrice": "11793.63104562", "indexPrice": "11781.80495970",
            "estimatedSettlePrice": "11781.16138815", "lastFundingRate": "0.00038246",
            "interestRate": "0.00010000", "nextFundingTime": 1597392000000i64,
            "time": 1597370495002i64
        }),
        ("GET", "/fapi/v1/depth") => json!({
            "lastUpdateId": 1027024, "E": 1589436922972i64, "T": 1589436922959i64,
            "bids": [["4.00000000", "431.00000000"]],
            "asks": [["4.00000200", "12.00000000"]]
        }),
        ("GET", "/fapi/v1/leverageBracket") => json!([
            {"symbol": symbol, "brackets": [
                {"bracket": 1, "initialLeverage": 125, "notionalCap": 50000,
                 "notionalFloor": 0, "maintMarginRatio": 0.004, "cum": 0},
                {"bracket": 2, "initialLeverage": 100, "notionalCap": 250000,
                 "notionalFloor": 50000, "maintMarginRatio": 0.005, "cum": 50}
            ]}
        ]),
        ("GET", "/fapi/v2/positionRisk") => json!([
            {"symbol": symbol, "positionAmt": "0.010", "entryPrice": "6563.66500",
             "markPrice": "6564.40", "unRealizedProfit": "0.00738000",
             "liquidationPrice": "0", "leverage": "20", "maxNotionalValue": "10000000",
             "marginType": "cross", "isolatedMargin": "0.00000000", "isAutoAddMargin": "false",
             "positionSide": "BOTH", "notional": "65.644", "isolatedWallet": "0",
             "updateTime": 0}
        ]),
        ("POST", "/fapi/v1/leverage") => json!({
            "leverage": query.get("leverage").and_then(|l| l.parse::<u32>().ok()).unwrap_or(0),
            "maxNotionalValue": "1000000",
            "symbol": symbol
        }),
        ("POST", "/fapi/v1/marginType") => json!({"code": 200, "msg": "success"}),
        ("POST", "/fapi/v1/order") => {
            if query.get("stopPrice").map(String::as_str) == Some("1") {
                return exchange_error(
                    StatusCode::BAD_REQUEST,
                    -2021,
                    "Order would immediately trigger.",
                );
            }
            json!({
                "symbol": symbol, "orderId": 22542179, "status": "NEW",
                "clientOrderId": query.get("newClientOrderId").cloned().unwrap_or_default(),
                "type": query.get("type").cloned().unwrap_or_default(),
                "side": query.get("side").cloned().unwrap_or_default(),
                "positionSide": query.get("positionSide").cloned().unwrap_or_default(),
                "origQty": query.get("quantity").cloned().unwrap_or_default(),
                "price": query.get("price").cloned().unwrap_or_else(|| "0".to_string()),
                "updateTime": 1566818724722i64
            })
        }
        ("GET", "/fapi/v1/order") => order(&symbol, &query),
        ("DELETE", "/fapi/v1/order") => {
            let mut order = order(&symbol, &query);
            order["status"] = json!("CANCELED");
            order
        }
        ("GET", "/fapi/v1/openOrders") => {
            if symbol == "BADUSDT" {
                return exchange_error(StatusCode::BAD_REQUEST, -1121, "Invalid symbol.");
            }
            json!([order(&symbol, &query)])
        }
        ("DELETE", "/fapi/v1/allOpenOrders") => {
            json!({"code": 200, "msg": "The operation of cancel all open order is done."})
        }
        ("GET", "/fapi/v1/userTrades") => json!([
            {"id": 698759, "orderId": 25851813, "symbol": symbol, "side": "BUY",
             "positionSide": "LONG", "buyer": true, "maker": false, "price": "7819.01",
             "qty": "0.002", "quoteQty": "15.63802", "realizedPnl": "-0.91539999",
             "commission": "-0.07819010", "commissionAsset": "USDT", "time": 1569514978020i64},
            {"id": 698760, "orderId": 25851814, "symbol": symbol, "side": "SELL",
             "positionSide": "LONG", "buyer": false, "maker": true, "price": "7820.00",
             "qty": "0.002", "quoteQty": "15.64", "realizedPnl": "0.00198",
             "commission": "0.00312800", "commissionAsset": "USDT", "time": 1569514979020i64}
        ]),
        ("POST", "/fapi/v1/listenKey") => json!({
            "listenKey": "pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1"
        }),
        ("PUT", "/fapi/v1/listenKey") | ("DELETE", "/fapi/v1/listenKey") => json!({}),
        ("POST", "/sapi/v1/asset/transfer") => json!({"tranId": 13526853623i64}),
        ("GET", "/api/v3/exchangeInfo") => json!({
            "timezone": "UTC",
            "serverTime": now_ms(),
            "symbols": [
                {"symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC"},
                {"symbol": "ETHUSDT", "status": "TRADING", "baseAsset": "ETH"},
                {"symbol": "BADSYMBOL", "status": "TRADING", "baseAsset": "BAD"},
                {"symbol": "OLDUSDT", "status": "BREAK", "baseAsset": "OLD"}
            ]
        }),
        ("GET", "/api/v3/klines") | ("GET", "/fapi/v1/klines") => {
            if symbol == "BADSYMBOL" {
                return exchange_error(StatusCode::BAD_REQUEST, -1121, "Invalid symbol.");
            }
            klines(&query)
        }
        _ => return exchange_error(StatusCode::NOT_FOUND, -1000, "Unknown endpoint."),
    };
    Json(body).into_response()
}

/// A fixed candle series starting at [`KLINE_SERIES_START`], filtered by
/// `startTime`, `endTime` and `limit` the way the exchange does.
fn klines(query: &HashMap<String, String>) -> Value {
    let step = match query.get("interval").map(String::as_str) {
        Some("1h") => 3_600_000,
        Some("1d") => 86_400_000,
        Some("1w") => 604_800_000,
        _ => 60_000,
    };
    let bound = |key: &str| query.get(key).and_then(|v| v.parse::<i64>().ok());
    let limit = bound("limit").unwrap_or(500).min(1000) as usize;
    let start = bound("startTime");
    let end = bound("endTime").unwrap_or(i64::MAX);

    let in_range: Vec<i64> = (0..KLINE_SERIES_LEN)
        .filter(|i| {
            let open_time = KLINE_SERIES_START + i * step;
            open_time >= start.unwrap_or(i64::MIN) && open_time <= end
        })
        .collect();
    // Without a start time the newest candles are returned.
    let page = match start {
        Some(_) => &in_range[..limit.min(in_range.len())],
        None => &in_range[in_range.len().saturating_sub(limit)..],
    };
    Value::Array(page.iter().map(|&i| kline(i, step)).collect())
}

pub fn kline(index: i64, step: i64) -> Value {
    let open_time = KLINE_SERIES_START + index * step;
    let open = format!("{}.00", 100 + index % 50);
    json!([
        open_time, open, "151.00", "99.00", "101.50", "12.5", open_time + step - 1,
        "1262.5", index, "6.25", "631.25", "0"
    ])
}

fn exchange_info() -> Value {
    let filters = |min_qty: &str| {
        json!([
            {"filterType": "PRICE_FILTER", "maxPrice": "4529764", "minPrice": "556.80",
             "tickSize": "0.10"},
            {"filterType": "LOT_SIZE", "maxQty": "1000", "minQty": min_qty, "stepSize": min_qty},
            {"filterType": "MIN_NOTIONAL", "notional": "5"}
        ])
    };
    json!({
        "timezone": "UTC",
        "serverTime": now_ms(),
        "symbols": [
            {"symbol": "BTCUSDT", "pair": "BTCUSDT", "contractType": "PERPETUAL",
             "deliveryDate": 4133404800000i64, "status": "TRADING",
             "baseAsset": "BTC", "quoteAsset": "USDT", "filters": filters("0.001")},
            {"symbol": "ETHUSDT", "pair": "ETHUSDT", "contractType": "PERPETUAL",
             "deliveryDate": 4133404800000i64, "status": "TRADING",
             "baseAsset": "ETH", "quoteAsset": "USDT", "filters": filters("0.01")},
            {"symbol": "BTCUSDT_240628", "pair": "BTCUSDT", "contractType": "CURRENT_QUARTER",
             "deliveryDate": 1719561600000i64, "status": "TRADING",
             "baseAsset": "BTC", "quoteAsset": "USDT", "filters": filters("0.001")},
            {"symbol": "SRMUSDT", "pair": "SRMUSDT", "contractType": "PERPETUAL",
             "deliveryDate": 4133404800000i64, "status": "SETTLING",
             "baseAsset": "SRM", "quoteAsset": "USDT", "filters": filters("1")}
        ]
    })
}

fn account() -> Value {
    let asset = |name: &str, balance: &str| {
        json!({"asset": name, "walletBalance": balance, "unrealizedProfit": "0.00000000",
               "marginBalance": balance, "availableBalance": balance,
               "maxWithdrawAmount": balance, "marginAvailable": true, "updateTime": 0})
    };
    let position = |symbol: &str, side: &str, amount: &str| {
        json!({"symbol": symbol, "positionSide": side, "positionAmt": amount,
               "leverage": "20", "isolated": false, "entryPrice": "0.0",
               "unrealizedProfit": "0.00000000", "updateTime": 0})
    };
    json!({
        "feeTier": 0, "canTrade": true, "canDeposit": true, "canWithdraw": true,
        "totalWalletBalance": "126.72469206", "availableBalance": "126.72469206",
        "maxWithdrawAmount": "126.72469206",
        "assets": [
            asset("USDT", "123.72469206"),
            asset("BUSD", "3.00000000"),
            asset("BNB", "0.00000000")
        ],
        "positions": [
            position("BTCUSDT", "LONG", "0.010"),
            position("BTCUSDT", "SHORT", "0.000"),
            position("ETHUSDT", "BOTH", "-1.500"),
            position("XRPUSDT", "BOTH", "0")
        ]
    })
}

fn order(symbol: &str, query: &HashMap<String, String>) -> Value {
    let order_id = query
        .get("orderId")
        .and_then(|id| id.parse::<i64>().ok())
        .unwrap_or(1917641);
    json!({
        "symbol": symbol, "orderId": order_id, "clientOrderId": "abc", "price": "0",
        "avgPrice": "0.00000", "origQty": "0.40", "executedQty": "0", "cumQuote": "0",
        "status": "NEW", "timeInForce": "GTC", "type": "LIMIT", "origType": "LIMIT",
        "side": "BUY", "positionSide": "SHORT", "time": 1579276756075i64,
        "updateTime": 1579276756075i64
    })
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

pub fn agg_trade(symbol: &str, id: i64) -> Value {
    json!({"e": "aggTrade", "E": 123456789 + id, "s": symbol, "a": id, "p": "0.001",
           "q": "100", "f": 100, "l": 105, "T": 123456785, "m": true})
}

pub fn book_ticker(symbol: &str, id: i64) -> Value {
    json!({"e": "bookTicker", "u": id, "E": 1568014460893i64, "T": 1568014460891i64,
           "s": symbol, "b": "25.35190000", "B": "31.21000000",
           "a": "25.36520000", "A": "40.66000000"})
}

async fn handle_raw_stream(ws: WebSocketUpgrade, Path(stream): Path<String>) -> Response {
    let (name, kind) = stream.split_once('@').unwrap_or((stream.as_str(), ""));
    let symbol = name.to_uppercase();
    let frames: Vec<Value> = match kind {
        "aggTrade" => (1..=3).map(|id| agg_trade(&symbol, id)).collect(),
        "bookTicker" => (1..=2).map(|id| book_ticker(&symbol, id)).collect(),
        _ if stream == "!bookTicker" => vec![
            book_ticker("BTCUSDT", 1),
            book_ticker("ETHUSDT", 2),
            json!({"unexpected": true}),
            book_ticker("XRPUSDT", 3),
        ],
        _ => Vec::new(),
    };
    // Symbols starting with "close" make the server hang up after sending.
    let close_after_send = name.starts_with("close");
    ws.on_upgrade(move |socket| push_frames(socket, frames, close_after_send))
}

async fn handle_combined_stream(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let streams = params.get("streams").cloned().unwrap_or_default();
    let frames: Vec<Value> = streams
        .split('/')
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, stream)| {
            let symbol = stream.split('@').next().unwrap_or_default().to_uppercase();
            json!({"stream": stream, "data": agg_trade(&symbol, i as i64 + 1)})
        })
        .collect();
    ws.on_upgrade(move |socket| push_frames(socket, frames, false))
}

async fn push_frames(mut socket: WebSocket, frames: Vec<Value>, close_after_send: bool) {
    for frame in frames {
        if socket
            .send(Message::Text(frame.to_string().into()))
            .await
            .is_err()
        {
            return;
        }
    }
    if close_after_send {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}
