//! Post-processing of futures responses: filter parsing and result filtering.

use super::models::{AccountAsset, AccountPosition, FuturesSymbol};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;
use trader_core::{
    parse_decimal, ContractType, LotSize, PriceFilter, SymbolPair, CONTRACT_TRADING_STATUS,
    LOT_SIZE_FILTER_TYPE, MIN_NOTIONAL_FILTER_TYPE, PRICE_FILTER_TYPE,
};

/// Keep trading perpetual contracts and parse their lot size, price filter
/// and minimum notional.
pub fn tradable_perpetual_pairs(symbols: &[FuturesSymbol]) -> Vec<SymbolPair> {
    symbols
        .iter()
        .filter(|s| {
            s.status == CONTRACT_TRADING_STATUS && s.contract_type == ContractType::Perpetual
        })
        .map(symbol_pair)
        .collect()
}

pub fn symbol_pair(symbol: &FuturesSymbol) -> SymbolPair {
    let mut pair = SymbolPair {
        symbol: symbol.symbol.clone(),
        pair: symbol.pair.clone(),
        contract_type: symbol.contract_type,
        delivery_date: symbol.delivery_date,
        status: symbol.status.clone(),
        base_asset: symbol.base_asset.clone(),
        quote_asset: symbol.quote_asset.clone(),
        min_notional: Decimal::ZERO,
        lot_size: LotSize::default(),
        price_filter: PriceFilter::default(),
    };

    for filter in &symbol.filters {
        let field = |key: &str| filter_decimal(&symbol.symbol, filter, key);
        match filter.get("filterType").and_then(Value::as_str) {
            Some(LOT_SIZE_FILTER_TYPE) => {
                pair.lot_size = LotSize {
                    max_qty: field("maxQty"),
                    min_qty: field("minQty"),
                    step_size: field("stepSize"),
                };
            }
            Some(PRICE_FILTER_TYPE) => {
                pair.price_filter = PriceFilter {
                    max_price: field("maxPrice"),
                    min_price: field("minPrice"),
                    tick_size: field("tickSize"),
                };
            }
            Some(MIN_NOTIONAL_FILTER_TYPE) => {
                pair.min_notional = field("notional");
            }
            _ => {}
        }
    }
    pair
}

/// Read a decimal string from a filter; missing or malformed values read as zero.
fn filter_decimal(symbol: &str, filter: &Value, key: &str) -> Decimal {
    let Some(raw) = filter.get(key).and_then(Value::as_str) else {
        warn!(symbol = %symbol, key = %key, "Filter field missing");
        return Decimal::ZERO;
    };
    parse_decimal(raw, key).unwrap_or_else(|e| {
        warn!(symbol = %symbol, error = %e, "Filter field unparseable");
        Decimal::ZERO
    })
}

/// Signed position amount; unparseable amounts count as flat.
pub fn position_amount(position: &AccountPosition) -> Decimal {
    parse_decimal(&position.position_amt, "positionAmt").unwrap_or_else(|e| {
        warn!(symbol = %position.symbol, error = %e, "Bad position amount");
        Decimal::ZERO
    })
}

pub fn is_open(position: &AccountPosition) -> bool {
    !position_amount(position).is_zero()
}

/// Positions with a non-zero amount.
pub fn open_positions(positions: Vec<AccountPosition>) -> Vec<AccountPosition> {
    positions.into_iter().filter(is_open).collect()
}

/// Assets with a positive wallet balance.
pub fn funded_assets(assets: Vec<AccountAsset>) -> Vec<AccountAsset> {
    assets
        .into_iter()
        .filter(|asset| {
            parse_decimal(&asset.wallet_balance, "walletBalance")
                .map(|balance| balance > Decimal::ZERO)
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::futures::models::ExchangeInfo;
    use rust_decimal_macros::dec;

    fn exchange_info() -> ExchangeInfo {
        serde_json::from_str(
            r#"{
            "timezone": "UTC",
            "serverTime": 1565613908500,
            "symbols": [
                {
                    "symbol": "BTCUSDT", "pair": "BTCUSDT", "contractType": "PERPETUAL",
                    "deliveryDate": 4133404800000, "status": "TRADING",
                    "baseAsset": "BTC", "quoteAsset": "USDT",
                    "filters": [
                        {"filterType": "PRICE_FILTER", "maxPrice": "4529764",
                         "minPrice": "556.80", "tickSize": "0.10"},
                        {"filterType": "LOT_SIZE", "maxQty": "1000", "minQty": "0.001",
                         "stepSize": "0.001"},
                        {"filterType": "MARKET_LOT_SIZE", "maxQty": "120", "minQty": "0.001",
                         "stepSize": "0.001"},
                        {"filterType": "MIN_NOTIONAL", "notional": "5"}
                    ]
                },
                {
                    "symbol": "BTCUSDT_240628", "pair": "BTCUSDT",
                    "contractType": "CURRENT_QUARTER",
                    "deliveryDate": 1719561600000, "status": "TRADING",
                    "baseAsset": "BTC", "quoteAsset": "USDT", "filters": []
                },
                {
                    "symbol": "LUNAUSDT", "pair": "LUNAUSDT", "contractType": "PERPETUAL",
                    "deliveryDate": 4133404800000, "status": "SETTLING",
                    "baseAsset": "LUNA", "quoteAsset": "USDT", "filters": []
                },
                {
                    "symbol": "ETHUSDT", "pair": "ETHUSDT", "contractType": "PERPETUAL",
                    "deliveryDate": 4133404800000, "status": "TRADING",
                    "baseAsset": "ETH", "quoteAsset": "USDT",
                    "filters": [{"filterType": "LOT_SIZE", "maxQty": "oops", "minQty": "0.01",
                                 "stepSize": "0.01"}]
                }
            ]
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_only_trading_perpetuals_are_kept() {
        let pairs = tradable_perpetual_pairs(&exchange_info().symbols);
        let symbols: Vec<&str> = pairs.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert!(pairs.iter().all(|p| p.is_trading()));
    }

    #[test]
    fn test_filters_are_parsed() {
        let pairs = tradable_perpetual_pairs(&exchange_info().symbols);
        let btc = &pairs[0];
        assert_eq!(btc.lot_size.max_qty, dec!(1000));
        assert_eq!(btc.lot_size.min_qty, dec!(0.001));
        assert_eq!(btc.lot_size.step_size, dec!(0.001));
        assert_eq!(btc.price_filter.tick_size, dec!(0.1));
        assert_eq!(btc.price_filter.min_price, dec!(556.8));
        assert_eq!(btc.price_filter.max_price, dec!(4529764));
        assert_eq!(btc.min_notional, dec!(5));
        assert_eq!(btc.base_asset, "BTC");
    }

    #[test]
    fn test_market_lot_size_does_not_override_lot_size() {
        let pairs = tradable_perpetual_pairs(&exchange_info().symbols);
        assert_eq!(pairs[0].lot_size.max_qty, dec!(1000));
    }

    #[test]
    fn test_malformed_filter_value_reads_zero() {
        let pairs = tradable_perpetual_pairs(&exchange_info().symbols);
        let eth = &pairs[1];
        assert_eq!(eth.lot_size.max_qty, Decimal::ZERO);
        assert_eq!(eth.lot_size.min_qty, dec!(0.01));
        assert_eq!(eth.min_notional, Decimal::ZERO);
    }

    fn position(symbol: &str, side: &str, amount: &str) -> AccountPosition {
        AccountPosition {
            symbol: symbol.to_string(),
            position_side: side.to_string(),
            position_amt: amount.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_open_positions_skip_flat() {
        let positions = vec![
            position("BTCUSDT", "LONG", "0.010"),
            position("BTCUSDT", "SHORT", "0.000"),
            position("ETHUSDT", "BOTH", "-1.5"),
            position("XRPUSDT", "BOTH", ""),
        ];
        let open = open_positions(positions);
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].symbol, "BTCUSDT");
        assert_eq!(position_amount(&open[1]), dec!(-1.5));
    }

    #[test]
    fn test_funded_assets_skip_empty_wallets() {
        let asset = |name: &str, balance: &str| AccountAsset {
            asset: name.to_string(),
            wallet_balance: balance.to_string(),
            ..Default::default()
        };
        let funded = funded_assets(vec![
            asset("USDT", "23.72469206"),
            asset("BNB", "0.00000000"),
            asset("BUSD", "-1"),
            asset("ETH", "n/a"),
        ]);
        assert_eq!(funded.len(), 1);
        assert_eq!(funded[0].asset, "USDT");
    }
}
