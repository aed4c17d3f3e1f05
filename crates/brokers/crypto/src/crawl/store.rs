//! Per-symbol candlestick files.
//!
//! Each symbol is kept in `<dir>/<SYMBOL>.csv` with the columns
//! `T,O,H,L,C,V,A,N,BV,BA`, one row per candle, ordered by open time.

use crate::models::Kline;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;
use trader_core::{ExchangeError, ExchangeResult};

pub const HEADER: [&str; 10] = ["T", "O", "H", "L", "C", "V", "A", "N", "BV", "BA"];

/// One stored candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineRow {
    #[serde(rename = "T")]
    pub open_time: i64,
    #[serde(rename = "O")]
    pub open: String,
    #[serde(rename = "H")]
    pub high: String,
    #[serde(rename = "L")]
    pub low: String,
    #[serde(rename = "C")]
    pub close: String,
    #[serde(rename = "V")]
    pub volume: String,
    #[serde(rename = "A")]
    pub quote_volume: String,
    #[serde(rename = "N")]
    pub trade_count: i64,
    #[serde(rename = "BV")]
    pub taker_buy_base_volume: String,
    #[serde(rename = "BA")]
    pub taker_buy_quote_volume: String,
}

impl From<Kline> for KlineRow {
    fn from(k: Kline) -> Self {
        Self {
            open_time: k.open_time,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            quote_volume: k.quote_asset_volume,
            trade_count: k.trade_count,
            taker_buy_base_volume: k.taker_buy_base_volume,
            taker_buy_quote_volume: k.taker_buy_quote_volume,
        }
    }
}

/// A run of missing candles, as an inclusive open-time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start: i64,
    pub end: i64,
}

impl Gap {
    /// Number of candles that fit in the gap.
    pub fn missing(&self, interval_ms: i64) -> i64 {
        (self.end - self.start) / interval_ms + 1
    }
}

/// Gaps between consecutive open times that are more than one interval apart.
///
/// Duplicate or out-of-order times are skipped.
pub fn find_gaps(open_times: impl IntoIterator<Item = i64>, interval_ms: i64) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let mut prev: Option<i64> = None;
    for time in open_times {
        match prev {
            Some(p) if time <= p => continue,
            Some(p) if time - p > interval_ms => gaps.push(Gap {
                start: p + interval_ms,
                end: time - 1,
            }),
            _ => {}
        }
        prev = Some(time);
    }
    gaps
}

/// CSV file holding one symbol's candles.
#[derive(Debug, Clone)]
pub struct KlineStore {
    path: PathBuf,
}

impl KlineStore {
    /// Open the symbol's file under `dir`, creating the directory and a
    /// header-only file when they do not exist.
    pub fn open(dir: &Path, symbol: &str) -> ExchangeResult<Self> {
        fs::create_dir_all(dir).map_err(|e| storage_err(dir, e))?;
        let store = Self {
            path: dir.join(format!("{}.csv", symbol)),
        };
        if !store.path.exists() {
            store.replace(&[])?;
            debug!(path = %store.path.display(), "Created kline file");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open time of the last stored row.
    pub fn last_open_time(&self) -> ExchangeResult<Option<i64>> {
        let mut reader = self.reader()?;
        let mut last = None;
        for record in reader.records() {
            let record = record.map_err(|e| storage_err(&self.path, e))?;
            if let Some(time) = record.get(0).and_then(|t| t.parse::<i64>().ok()) {
                last = Some(time);
            }
        }
        Ok(last)
    }

    pub fn read_all(&self) -> ExchangeResult<Vec<KlineRow>> {
        let mut reader = self.reader()?;
        reader
            .deserialize()
            .collect::<Result<Vec<KlineRow>, _>>()
            .map_err(|e| storage_err(&self.path, e))
    }

    pub fn append(&self, rows: &[KlineRow]) -> ExchangeResult<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| storage_err(&self.path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| storage_err(&self.path, e))?;
        }
        writer.flush().map_err(|e| storage_err(&self.path, e))
    }

    /// Rewrite the file with `rows` through a temporary file.
    pub fn replace(&self, rows: &[KlineRow]) -> ExchangeResult<()> {
        let temp = self.path.with_extension("csv.tmp");
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&temp)
            .map_err(|e| storage_err(&temp, e))?;
        writer
            .write_record(HEADER)
            .map_err(|e| storage_err(&temp, e))?;
        for row in rows {
            writer.serialize(row).map_err(|e| storage_err(&temp, e))?;
        }
        writer.flush().map_err(|e| storage_err(&temp, e))?;
        drop(writer);
        fs::rename(&temp, &self.path).map_err(|e| storage_err(&self.path, e))
    }

    fn reader(&self) -> ExchangeResult<csv::Reader<fs::File>> {
        csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| storage_err(&self.path, e))
    }
}

fn storage_err(path: &Path, e: impl std::fmt::Display) -> ExchangeError {
    ExchangeError::Storage(format!("{}: {}", path.display(), e))
}
