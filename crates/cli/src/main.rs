use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use trader_brokers_crypto::futures::{
    AGG_TRADE_SAMPLE, ALL_BOOK_TICKER_SAMPLE, BOOK_TICKER_SAMPLE, COMBINED_AGG_TRADE_SAMPLE,
};
use trader_brokers_crypto::crawl::CrawlOutcome;
use trader_brokers_crypto::{
    CrawlConfig, ExchangeConfig, FutureClient, KlineCrawler, KlineSource, SpotClient,
};
use trader_core::{MarketDataEvent, PriceResponse};

#[derive(Parser)]
#[command(name = "trader")]
#[command(about = "Binance USDT-M futures and spot client")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// TOML config file; flags and env vars override its keys
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key
    #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Secret key
    #[arg(long, env = "BINANCE_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Use the test network endpoints
    #[arg(long)]
    testnet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check connectivity to the futures and spot APIs
    Ping,

    /// List trading perpetual pairs with their filters
    Pairs {
        /// Only show this symbol
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Latest price of a symbol
    Price {
        symbol: String,

        /// Query the spot market instead of futures
        #[arg(long)]
        spot: bool,
    },

    /// Mark price and funding rate of a symbol
    MarkPrice { symbol: String },

    /// Open futures positions (requires credentials)
    Positions,

    /// Funded futures assets (requires credentials)
    Assets,

    /// Top of the order book
    Depth { symbol: String },

    /// Sample a market stream and print its events
    Stream {
        #[arg(value_enum)]
        kind: StreamKind,

        /// Symbols to follow; ignored for all-book-tickers
        symbols: Vec<String>,

        /// Sampling window in seconds; defaults per stream kind
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Download kline history into one CSV file per symbol
    Crawl {
        /// Symbols to crawl; every trading symbol of the market when empty
        symbols: Vec<String>,

        #[arg(short, long, value_enum, default_value_t = Market::Futures)]
        market: Market,

        /// Output directory
        #[arg(short, long, default_value = "klines")]
        dir: PathBuf,

        /// Kline interval (1m, 5m, 1h, 1d, ...)
        #[arg(short, long, default_value = "1m")]
        interval: String,

        /// Symbols crawled at the same time
        #[arg(short, long, default_value_t = 5)]
        workers: usize,

        /// Only crawl the first N trading symbols
        #[arg(long)]
        max_symbols: Option<usize>,

        /// Refetch candles missing from the files after the crawl
        #[arg(long)]
        repair: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum Market {
    Futures,
    Spot,
}

#[derive(Clone, Copy, ValueEnum)]
enum StreamKind {
    BookTicker,
    AllBookTickers,
    AggTrades,
    CombinedAggTrades,
}

impl StreamKind {
    fn default_window(self) -> Duration {
        match self {
            StreamKind::BookTicker => BOOK_TICKER_SAMPLE,
            StreamKind::AllBookTickers => ALL_BOOK_TICKER_SAMPLE,
            StreamKind::AggTrades => AGG_TRADE_SAMPLE,
            StreamKind::CombinedAggTrades => COMBINED_AGG_TRADE_SAMPLE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Ping => {
            let futures = FutureClient::with_config(one_shot(&config)).await?;
            let spot = SpotClient::with_config(&config)?;
            println!("futures: {}", status(futures.ping().await));
            println!("spot:    {}", status(spot.ping().await));
        }
        Commands::Pairs { symbol } => {
            let client = FutureClient::with_config(one_shot(&config)).await?;
            let pairs = match symbol {
                Some(symbol) => vec![client.pair_by_symbol(&symbol).await?],
                None => client.pairs().await?,
            };
            println!(
                "{:<16} {:>12} {:>12} {:>12} {:>10}",
                "SYMBOL", "MIN QTY", "STEP", "TICK", "NOTIONAL"
            );
            for pair in &pairs {
                println!(
                    "{:<16} {:>12} {:>12} {:>12} {:>10}",
                    pair.symbol,
                    pair.lot_size.min_qty,
                    pair.lot_size.step_size,
                    pair.price_filter.tick_size,
                    pair.min_notional
                );
            }
            tracing::info!(count = pairs.len(), "Listed pairs");
        }
        Commands::Price { symbol, spot } => {
            let price = if spot {
                let client = SpotClient::with_config(&config)?;
                let ticker = client.ticker_price(&symbol).await?;
                ticker.price.parse::<Decimal>().context("spot price")?
            } else {
                let client = FutureClient::with_config(one_shot(&config)).await?;
                client.ticker_price(&symbol).await?
            };
            let response = PriceResponse {
                symbol,
                price,
                time: Utc::now().to_rfc3339(),
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::MarkPrice { symbol } => {
            let client = FutureClient::with_config(one_shot(&config)).await?;
            let mark = client.mark_price(&symbol).await?;
            let next_funding = Utc
                .timestamp_millis_opt(mark.next_funding_time)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            println!("symbol:        {}", mark.symbol);
            println!("mark price:    {}", mark.mark_price);
            println!("index price:   {}", mark.index_price);
            println!("funding rate:  {}", mark.last_funding_rate);
            println!("next funding:  {}", next_funding);
        }
        Commands::Positions => {
            let client = FutureClient::with_config(one_shot(&config)).await?;
            let positions = client.all_positions().await?;
            if positions.is_empty() {
                println!("No open positions");
            }
            for p in positions {
                println!(
                    "{:<16} {:<6} amount={} entry={} upnl={} leverage={}",
                    p.symbol,
                    p.position_side,
                    p.position_amt,
                    p.entry_price,
                    p.unrealized_profit,
                    p.leverage
                );
            }
        }
        Commands::Assets => {
            let client = FutureClient::with_config(one_shot(&config)).await?;
            for asset in client.assets().await? {
                println!(
                    "{:<8} wallet={} available={} withdrawable={}",
                    asset.asset,
                    asset.wallet_balance,
                    asset.available_balance,
                    asset.max_withdraw_amount
                );
            }
        }
        Commands::Depth { symbol } => {
            let client = FutureClient::with_config(one_shot(&config)).await?;
            let depth = client.depth(&symbol).await?;
            println!(
                "{:>16} {:>16} | {:<16} {:<16}",
                "BID QTY", "BID", "ASK", "ASK QTY"
            );
            for (bid, ask) in depth.bids.iter().zip(depth.asks.iter()) {
                println!(
                    "{:>16} {:>16} | {:<16} {:<16}",
                    bid.quantity, bid.price, ask.price, ask.quantity
                );
            }
        }
        Commands::Stream {
            kind,
            symbols,
            seconds,
        } => {
            let window = seconds
                .map(Duration::from_secs)
                .unwrap_or(kind.default_window());
            let client = FutureClient::with_config(one_shot(&config)).await?;
            run_stream(&client, kind, &symbols, window).await?;
        }
        Commands::Crawl {
            symbols,
            market,
            dir,
            interval,
            workers,
            max_symbols,
            repair,
        } => {
            let crawl = CrawlConfig {
                interval,
                max_workers: workers,
                max_symbols,
                repair_gaps: repair,
                ..CrawlConfig::new(dir)
            };
            run_crawl(&config, market, &symbols, crawl).await?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<ExchangeConfig> {
    let mut config = match &cli.config {
        Some(path) => ExchangeConfig::from_file(path)?,
        None => ExchangeConfig::default(),
    };
    if cli.testnet {
        config = config.with_testnet_endpoints();
    }
    if let Some(key) = &cli.api_key {
        config.api_key = key.clone();
    }
    if let Some(secret) = &cli.secret_key {
        config.secret_key = secret.clone();
    }
    tracing::debug!(config = ?config, "Loaded configuration");
    Ok(config)
}

/// Commands exit after one call, so the background clock sync is not needed.
fn one_shot(config: &ExchangeConfig) -> ExchangeConfig {
    ExchangeConfig {
        time_sync_interval_secs: 0,
        ..config.clone()
    }
}

fn status(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "unreachable"
    }
}

async fn run_stream(
    client: &FutureClient,
    kind: StreamKind,
    symbols: &[String],
    window: Duration,
) -> Result<()> {
    let first = || {
        symbols
            .first()
            .map(String::as_str)
            .context("a symbol is required for this stream")
    };
    tracing::info!(window_secs = window.as_secs(), "Sampling stream");

    match kind {
        StreamKind::BookTicker => {
            client
                .watch_book_ticker(first()?, window, print_event)
                .await?;
        }
        StreamKind::AllBookTickers => {
            client.watch_all_book_tickers(window, print_event).await?;
        }
        StreamKind::AggTrades => {
            let trades = client.sample_agg_trades(first()?, window).await?;
            let count = trades.len();
            trades.into_iter().for_each(print_event);
            println!("{} trades", count);
        }
        StreamKind::CombinedAggTrades => {
            if symbols.is_empty() {
                anyhow::bail!("at least one symbol is required for this stream");
            }
            let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
            client
                .watch_combined_agg_trades(&refs, window, print_event)
                .await?;
        }
    }
    Ok(())
}

fn print_event(event: impl Into<MarketDataEvent>) {
    println!("{}", event.into());
}

async fn run_crawl(
    config: &ExchangeConfig,
    market: Market,
    symbols: &[String],
    crawl: CrawlConfig,
) -> Result<()> {
    let outcomes = match market {
        Market::Futures => {
            let client = FutureClient::with_config(one_shot(config)).await?;
            crawl_market(&client, crawl, symbols).await?
        }
        Market::Spot => {
            let client = SpotClient::with_config(config)?;
            crawl_market(&client, crawl, symbols).await?
        }
    };

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => println!(
                "{:<16} appended={} repaired={} gaps={}",
                report.symbol,
                report.appended,
                report.repaired,
                report.gaps.len()
            ),
            Err(e) => {
                failed += 1;
                println!("{:<16} failed: {}", outcome.symbol, e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} symbols failed", failed, outcomes.len());
    }
    Ok(())
}

async fn crawl_market<S: KlineSource>(
    source: &S,
    config: CrawlConfig,
    symbols: &[String],
) -> Result<Vec<CrawlOutcome>> {
    let crawler = KlineCrawler::new(source, config)?;
    if symbols.is_empty() {
        Ok(crawler.crawl_all().await?)
    } else {
        Ok(crawler.crawl_symbols(symbols).await)
    }
}
