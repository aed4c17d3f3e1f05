//! Historical candlestick crawler.
//!
//! [`KlineCrawler`] downloads a symbol's full kline history into a CSV file,
//! resumes from the last stored candle on later runs, and can scan the file
//! for missing candles and fill them. [`KlineCrawler::crawl_all`] runs the
//! same job over every trading symbol of a market with a bounded number of
//! symbols in flight.

pub mod store;

pub use store::{find_gaps, Gap, KlineRow, KlineStore};

use crate::futures::FutureClient;
use crate::models::{Kline, KlineRequest};
use crate::spot::SpotClient;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use trader_core::{Exchange, ExchangeError, ExchangeResult};

/// Largest page the kline endpoints serve.
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// A market that serves candlesticks.
#[async_trait]
pub trait KlineSource: Exchange {
    /// Symbols currently open for trading.
    async fn symbols(&self) -> ExchangeResult<Vec<String>>;

    async fn fetch_klines(&self, request: &KlineRequest) -> ExchangeResult<Vec<Kline>>;
}

#[async_trait]
impl KlineSource for FutureClient {
    async fn symbols(&self) -> ExchangeResult<Vec<String>> {
        let info = self.exchange_info().await?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
            .collect())
    }

    async fn fetch_klines(&self, request: &KlineRequest) -> ExchangeResult<Vec<Kline>> {
        self.klines(request).await
    }
}

#[async_trait]
impl KlineSource for SpotClient {
    async fn symbols(&self) -> ExchangeResult<Vec<String>> {
        self.trading_symbols().await
    }

    async fn fetch_klines(&self, request: &KlineRequest) -> ExchangeResult<Vec<Kline>> {
        self.klines(request).await
    }
}

/// Length of a fixed kline interval (`1s`, `15m`, `4h`, `1d`, `1w`) in
/// milliseconds. Monthly candles have no fixed length and are rejected.
pub fn interval_millis(interval: &str) -> Option<i64> {
    let unit = interval.chars().last()?;
    let count: i64 = interval[..interval.len() - unit.len_utf8()].parse().ok()?;
    let unit_ms = match unit {
        's' => 1_000,
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        'w' => 604_800_000,
        _ => return None,
    };
    (count > 0).then_some(count * unit_ms)
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Directory holding one CSV file per symbol.
    pub save_dir: PathBuf,
    pub interval: String,
    /// Candles requested per page, at most [`MAX_PAGE_LIMIT`].
    pub page_limit: u32,
    /// Symbols crawled at the same time by [`KlineCrawler::crawl_all`].
    pub max_workers: usize,
    /// Attempts per request, the first one included.
    pub retries: u32,
    pub retry_delay: Duration,
    /// Only crawl the first `n` symbols of the market.
    pub max_symbols: Option<usize>,
    /// Fill missing candles found by the post-crawl scan.
    pub repair_gaps: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("klines"),
            interval: "1m".to_string(),
            page_limit: MAX_PAGE_LIMIT,
            max_workers: 5,
            retries: 5,
            retry_delay: Duration::from_secs(1),
            max_symbols: None,
            repair_gaps: false,
        }
    }
}

impl CrawlConfig {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            ..Default::default()
        }
    }
}

/// Result of syncing one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolReport {
    pub symbol: String,
    /// Rows appended by the crawl.
    pub appended: usize,
    /// Rows inserted by gap repair.
    pub repaired: usize,
    /// Gaps left in the file.
    pub gaps: Vec<Gap>,
}

#[derive(Debug)]
pub struct CrawlOutcome {
    pub symbol: String,
    pub result: ExchangeResult<SymbolReport>,
}

pub struct KlineCrawler<'a, S: KlineSource + ?Sized> {
    source: &'a S,
    config: CrawlConfig,
    interval_ms: i64,
}

impl<'a, S: KlineSource + ?Sized> KlineCrawler<'a, S> {
    pub fn new(source: &'a S, config: CrawlConfig) -> ExchangeResult<Self> {
        let interval_ms = interval_millis(&config.interval).ok_or_else(|| {
            ExchangeError::ParseError(format!("unsupported kline interval {:?}", config.interval))
        })?;
        if config.page_limit == 0 || config.page_limit > MAX_PAGE_LIMIT {
            return Err(ExchangeError::Other(format!(
                "page limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        Ok(Self {
            source,
            config,
            interval_ms,
        })
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn store(&self, symbol: &str) -> ExchangeResult<KlineStore> {
        KlineStore::open(&self.config.save_dir, symbol)
    }

    /// Append every closed candle after the last stored one.
    ///
    /// A new file starts at the symbol's first candle. Returns the number of
    /// rows appended.
    pub async fn crawl_symbol(&self, symbol: &str) -> ExchangeResult<usize> {
        let store = self.store(symbol)?;
        let mut start = match store.last_open_time()? {
            Some(last) => last + self.interval_ms,
            None => match self.first_open_time(symbol).await? {
                Some(first) => first,
                None => {
                    info!(symbol = %symbol, "No klines listed for symbol");
                    return Ok(0);
                }
            },
        };

        let now = Utc::now().timestamp_millis();
        let mut appended = 0;
        loop {
            let request = KlineRequest::new(symbol, &self.config.interval)
                .starting_at(start)
                .with_limit(self.config.page_limit);
            let page = self.fetch(&request).await?;
            let full_page = page.len() >= self.config.page_limit as usize;
            let rows: Vec<KlineRow> = page
                .into_iter()
                .filter(|k| k.open_time >= start && k.close_time < now)
                .map(KlineRow::from)
                .collect();
            let Some(last) = rows.last() else { break };
            let next = last.open_time + self.interval_ms;

            store.append(&rows)?;
            appended += rows.len();
            debug!(symbol = %symbol, rows = rows.len(), next, "Stored kline page");

            if !full_page || next <= start {
                break;
            }
            start = next;
        }

        info!(symbol = %symbol, appended, path = %store.path().display(), "Klines synced");
        Ok(appended)
    }

    /// Gaps in the symbol's stored candles.
    pub fn scan(&self, symbol: &str) -> ExchangeResult<Vec<Gap>> {
        let rows = self.store(symbol)?.read_all()?;
        let gaps = find_gaps(rows.iter().map(|r| r.open_time), self.interval_ms);
        if !gaps.is_empty() {
            let missing: i64 = gaps.iter().map(|g| g.missing(self.interval_ms)).sum();
            warn!(symbol = %symbol, gaps = gaps.len(), missing, "Missing klines");
        }
        Ok(gaps)
    }

    /// Refetch every gap, then rewrite the file sorted and without
    /// duplicate open times. Returns the number of rows gained.
    pub async fn repair(&self, symbol: &str) -> ExchangeResult<usize> {
        let store = self.store(symbol)?;
        let mut rows = store.read_all()?;
        let gaps = find_gaps(rows.iter().map(|r| r.open_time), self.interval_ms);
        if gaps.is_empty() {
            return Ok(0);
        }

        let before = rows.len();
        for gap in &gaps {
            let mut start = gap.start;
            while start <= gap.end {
                let request = KlineRequest::new(symbol, &self.config.interval)
                    .between(start, gap.end)
                    .with_limit(self.config.page_limit);
                let page = self.fetch(&request).await?;
                let Some(next) = page.last().map(|k| k.open_time + self.interval_ms) else {
                    break;
                };
                rows.extend(
                    page.into_iter()
                        .filter(|k| k.open_time >= gap.start && k.open_time <= gap.end)
                        .map(KlineRow::from),
                );
                if next <= start {
                    break;
                }
                start = next;
            }
        }

        rows.sort_by_key(|r| r.open_time);
        rows.dedup_by_key(|r| r.open_time);
        store.replace(&rows)?;

        let gained = rows.len().saturating_sub(before);
        info!(symbol = %symbol, gaps = gaps.len(), gained, "Kline gaps repaired");
        Ok(gained)
    }

    /// Crawl one symbol, then scan it and optionally repair what is missing.
    pub async fn sync_symbol(&self, symbol: &str) -> ExchangeResult<SymbolReport> {
        let appended = self.crawl_symbol(symbol).await?;
        let mut gaps = self.scan(symbol)?;
        let mut repaired = 0;
        if self.config.repair_gaps && !gaps.is_empty() {
            repaired = self.repair(symbol).await?;
            gaps = self.scan(symbol)?;
        }
        Ok(SymbolReport {
            symbol: symbol.to_string(),
            appended,
            repaired,
            gaps,
        })
    }

    /// Sync every trading symbol of the market.
    pub async fn crawl_all(&self) -> ExchangeResult<Vec<CrawlOutcome>> {
        let mut symbols = self.with_retry(|| self.source.symbols()).await?;
        if let Some(max) = self.config.max_symbols {
            symbols.truncate(max);
        }
        info!(market = self.source.market(), symbols = symbols.len(), "Crawling klines");
        Ok(self.crawl_symbols(&symbols).await)
    }

    /// Sync the given symbols, at most `max_workers` at a time. A failed
    /// symbol does not stop the others.
    pub async fn crawl_symbols(&self, symbols: &[String]) -> Vec<CrawlOutcome> {
        let permits = Semaphore::new(self.config.max_workers.max(1));
        let jobs = symbols.iter().map(|symbol| {
            let permits = &permits;
            async move {
                let result = match permits.acquire().await {
                    Ok(_permit) => self.sync_symbol(symbol).await,
                    Err(e) => Err(ExchangeError::Other(format!("worker pool closed: {}", e))),
                };
                if let Err(e) = &result {
                    warn!(symbol = %symbol, error = %e, "Kline sync failed");
                }
                CrawlOutcome {
                    symbol: symbol.clone(),
                    result,
                }
            }
        });
        let outcomes = join_all(jobs).await;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(total = outcomes.len(), failed, "Finished syncing klines");
        outcomes
    }

    async fn first_open_time(&self, symbol: &str) -> ExchangeResult<Option<i64>> {
        let request = KlineRequest::new(symbol, &self.config.interval)
            .starting_at(0)
            .with_limit(1);
        let first = self.fetch(&request).await?;
        Ok(first.first().map(|k| k.open_time))
    }

    async fn fetch(&self, request: &KlineRequest) -> ExchangeResult<Vec<Kline>> {
        self.with_retry(|| self.source.fetch_klines(request)).await
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> ExchangeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ExchangeResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.retries => {
                    warn!(attempt, error = %e, "Kline request failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
