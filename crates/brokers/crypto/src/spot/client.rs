use super::models::{SpotExchangeInfo, TransferResponse};
use crate::config::ExchangeConfig;
use crate::models::{Ack, Kline, KlineRequest, OneOrMany, SymbolPrice};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};
use trader_brokers_common::{Params, RestClient, Security};
use trader_core::{parse_decimal, Exchange, ExchangeError, ExchangeResult, TransferType};

/// Spot REST client: connectivity, universal transfers and price data.
#[derive(Debug, Clone)]
pub struct SpotClient {
    rest: RestClient,
}

impl SpotClient {
    pub fn new(api_key: &str, secret_key: &str) -> ExchangeResult<Self> {
        Self::with_config(&ExchangeConfig::new(api_key, secret_key))
    }

    pub fn with_config(config: &ExchangeConfig) -> ExchangeResult<Self> {
        let rest = RestClient::new(config.spot_rest(), config.credential())?;
        Ok(Self { rest })
    }

    pub async fn ping(&self) -> bool {
        match self
            .rest
            .get::<Ack>("/api/v3/ping", Vec::new(), Security::None)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Spot ping failed");
                false
            }
        }
    }

    /// Move `amount` of `asset` between wallets.
    pub async fn transfer(
        &self,
        transfer_type: TransferType,
        asset: &str,
        amount: Decimal,
    ) -> ExchangeResult<TransferResponse> {
        let params: Params = vec![
            ("type", transfer_type.to_string()),
            ("asset", asset.to_string()),
            ("amount", amount.normalize().to_string()),
        ];
        let response: TransferResponse = self
            .rest
            .post("/sapi/v1/asset/transfer", params, Security::Signed)
            .await
            .inspect_err(|e| {
                warn!(error = %e, transfer_type = %transfer_type, "Transfer failed")
            })?;
        info!(tran_id = response.tran_id, asset = %asset, "Transfer submitted");
        Ok(response)
    }

    /// Placeholder for a spot to futures sweep; sends nothing.
    pub async fn transfer_spot_to_future(&self) -> ExchangeResult<()> {
        Ok(())
    }

    /// Placeholder for a futures to spot sweep; sends nothing.
    pub async fn transfer_future_to_spot(&self) -> ExchangeResult<()> {
        Ok(())
    }

    pub async fn ticker_price(&self, symbol: &str) -> ExchangeResult<SymbolPrice> {
        let params: Params = vec![("symbol", symbol.to_string())];
        let prices: OneOrMany<SymbolPrice> = self
            .rest
            .get("/api/v3/ticker/price", params, Security::None)
            .await
            .inspect_err(|e| warn!(error = %e, symbol = %symbol, "Spot ticker request failed"))?;
        prices
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::PairNotFound(symbol.to_string()))
    }

    pub async fn exchange_info(&self) -> ExchangeResult<SpotExchangeInfo> {
        self.rest
            .get("/api/v3/exchangeInfo", Vec::new(), Security::None)
            .await
            .inspect_err(|e| warn!(error = %e, "Spot exchange info request failed"))
    }

    /// Symbols currently open for trading.
    pub async fn trading_symbols(&self) -> ExchangeResult<Vec<String>> {
        let info = self.exchange_info().await?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
            .collect())
    }

    pub async fn klines(&self, request: &KlineRequest) -> ExchangeResult<Vec<Kline>> {
        self.rest
            .get("/api/v3/klines", request.params(), Security::None)
            .await
    }
}

#[async_trait]
impl Exchange for SpotClient {
    fn market(&self) -> &str {
        "spot"
    }

    async fn ping(&self) -> bool {
        SpotClient::ping(self).await
    }

    async fn last_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let price = self.ticker_price(symbol).await?;
        parse_decimal(&price.price, "price")
    }
}
