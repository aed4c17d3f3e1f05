use serde::{Deserialize, Serialize};

/// Response of a universal transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub tran_id: i64,
}

/// Spot exchange information; only the symbol list is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotExchangeInfo {
    pub symbols: Vec<SpotSymbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotSymbol {
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub base_asset: String,
    #[serde(default)]
    pub quote_asset: String,
}
