use std::io::{self, Write};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cryptodash::config::AppConfig;
use cryptodash::engine::candles::CandleSeries;
use cryptodash::engine::page_cache::PageKey;
use cryptodash::engine::tickers::TickerBoard;
use cryptodash::engine::types::{AssetInfo, RangeToken, SortFilter};
use cryptodash::feeds::screener::{Screener, ScreenerView};
use cryptodash::feeds::FeedState;
use cryptodash::market_data::router::MarketDataRouter;
use cryptodash::telemetry;

#[derive(Parser, Debug)]
#[command(name = "cryptodash", about = "Live crypto market data from the terminal")]
struct Cli {
    /// Config file (defaults to ./cryptodash.toml when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "cryptodash=info")]
    log: String,

    /// Serve Prometheus metrics on this port (needs the metrics-exporter feature)
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Candle chart plus asset info for one asset, e.g. `pair bitcoin --range 1W`
    Pair {
        id: String,
        #[arg(long)]
        vs: Option<String>,
        #[arg(long, default_value = "1D")]
        range: RangeToken,
    },
    /// Live 24h tickers for base symbols, e.g. `ticker btc eth sol`
    Ticker {
        #[arg(required = true)]
        symbols: Vec<String>,
        #[arg(long)]
        vs: Option<String>,
    },
    /// Paginated market list with an interactive prompt
    Screener {
        #[arg(long)]
        page_size: Option<u32>,
        #[arg(long)]
        vs: Option<String>,
        #[arg(long, default_value = "market_cap_desc")]
        filter: SortFilter,
    },
}

fn print_chart(range: RangeToken, state: &FeedState<CandleSeries>) {
    let status = format!("{:?}{}", state.connection, if state.loading { " (loading)" } else { "" });
    match state.data.last() {
        Some(c) => println!(
            "[{} {}] {} candles | t={} O {:.4} H {:.4} L {:.4} C {:.4}",
            range,
            status,
            state.data.len(),
            c.timestamp,
            c.open,
            c.high,
            c.low,
            c.close
        ),
        None => println!("[{} {}] no candles yet", range, status),
    }
    if let Some(err) = &state.error {
        println!("  ! {}", err);
    }
}

fn print_info(vs: &str, state: &FeedState<Option<AssetInfo>>) {
    let Some(info) = &state.data else {
        if let Some(err) = &state.error {
            println!("[info] ! {}", err);
        }
        return;
    };
    let price = info
        .market_data
        .current_price
        .get(vs)
        .map(|p| format!("{:.4}", p))
        .unwrap_or_else(|| "n/a".into());
    let change = info
        .market_data
        .price_change_percentage_24h
        .map(|p| format!("{:+.2}%", p))
        .unwrap_or_else(|| "n/a".into());
    println!("[info {:?}] {} ({}) {} {} 24h {}", state.connection, info.name, info.symbol.to_uppercase(), price, vs, change);
}

fn print_tickers(symbols: &[String], state: &FeedState<TickerBoard>) {
    println!("--- tickers ({:?}) ---", state.connection);
    for sym in symbols {
        match state.data.get(sym) {
            Some(t) => println!(
                "{:<8} {:>14.4} {:>+10.4} {:>+8.2}%",
                sym.to_uppercase(),
                t.price,
                t.price_change,
                t.price_change_percent
            ),
            None => println!("{:<8} {:>14}", sym.to_uppercase(), "n/a"),
        }
    }
    if let Some(err) = &state.error {
        println!("  ! {}", err);
    }
}

fn print_page(state: &FeedState<ScreenerView>) {
    let view = &state.data;
    println!(
        "\n=== Page {}/{} ({} per page, {}, {}) ===",
        view.page, view.total_pages, view.key.page_size, view.key.vs_currency, view.key.filter
    );
    for row in &view.rows {
        println!(
            "{:>5} {:<8} {:<24} {:>16} {:>10}",
            row.market_cap_rank.map(|r| r.to_string()).unwrap_or_default(),
            row.symbol.to_uppercase(),
            row.name,
            row.current_price.map(|p| format!("{:.4}", p)).unwrap_or_else(|| "n/a".into()),
            row.price_change_percentage_24h
                .map(|p| format!("{:+.2}%", p))
                .unwrap_or_else(|| "n/a".into()),
        );
    }
    if let Some(err) = &state.error {
        println!("  ! {}", err);
    }
}

async fn run_pair(router: &MarketDataRouter, id: &str, vs: Option<&str>, range: RangeToken) -> anyhow::Result<()> {
    let vs = vs.unwrap_or(router.default_vs_currency()).to_lowercase();
    let mut chart = router.kline_feed(id, Some(&vs), range);
    let mut info = router.info_feed(id, Some(&vs));
    let mut chart_rx = chart.subscribe();
    let mut info_rx = info.subscribe();
    chart.start();
    info.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            res = chart_rx.changed() => {
                if res.is_err() {
                    break;
                }
                let state = chart_rx.borrow_and_update().clone();
                print_chart(range, &state);
            }
            res = info_rx.changed() => {
                if res.is_err() {
                    break;
                }
                let state = info_rx.borrow_and_update().clone();
                print_info(&vs, &state);
            }
        }
    }

    chart.stop().await;
    info.stop().await;
    Ok(())
}

async fn run_ticker(router: &MarketDataRouter, symbols: Vec<String>, vs: Option<&str>) -> anyhow::Result<()> {
    let mut feed = router.ticker_feed(symbols, vs);
    let symbols = feed.symbols().to_vec();
    let mut rx = feed.subscribe();
    feed.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            res = rx.changed() => {
                if res.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                print_tickers(&symbols, &state);
            }
        }
    }

    feed.stop().await;
    Ok(())
}

async fn run_screener(screener: Screener) -> anyhow::Result<()> {
    if let Err(e) = screener.start().await {
        warn!(error = %e, "Screener failed to load");
    }
    print_page(&screener.state());

    loop {
        print!("\nscreener> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        let result = match parts.as_slice() {
            [] => continue,
            ["help" | "h"] => {
                println!("Available commands:");
                println!("  page <n>         - Jump to page n");
                println!("  next, n          - Next page");
                println!("  prev, p          - Previous page");
                println!("  size <n>         - Change page size");
                println!("  vs <currency>    - Change quote currency");
                println!("  filter <order>   - market_cap_desc, volume_desc, id_asc, ...");
                println!("  quit, q          - Exit");
                continue;
            }
            ["page", n] => match n.parse::<u32>() {
                Ok(n) => screener.go_to_page(n).await,
                Err(_) => {
                    println!("Invalid page number");
                    continue;
                }
            },
            ["next" | "n"] => screener.next_page().await,
            ["prev" | "p"] => screener.prev_page().await,
            ["size", n] => match n.parse::<u32>() {
                Ok(size) => {
                    let key = PageKey { page_size: size, ..screener.state().data.key };
                    screener.reconfigure(key).await
                }
                Err(_) => {
                    println!("Invalid page size");
                    continue;
                }
            },
            ["vs", cur] => {
                let key = PageKey { vs_currency: cur.to_lowercase(), ..screener.state().data.key };
                screener.reconfigure(key).await
            }
            ["filter", f] => match f.parse::<SortFilter>() {
                Ok(filter) => {
                    let key = PageKey { filter, ..screener.state().data.key };
                    screener.reconfigure(key).await
                }
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            },
            ["quit" | "q" | "exit"] => break,
            _ => {
                println!("Unknown command. Type 'help' for available commands.");
                continue;
            }
        };
        if let Err(e) = result {
            println!("Error: {}", e);
        }
        print_page(&screener.state());
    }

    screener.stop();
    println!("Goodbye!");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log);
    if let Some(port) = cli.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let cfg = AppConfig::load(cli.config.as_deref())?;
    if cfg.coingecko.api_key.is_empty() {
        warn!("No CoinGecko API key configured; requests may be rate limited");
    }
    let router = MarketDataRouter::from_config(&cfg)?;
    info!(command = ?cli.command, "Starting");

    match cli.command {
        Command::Pair { id, vs, range } => run_pair(&router, &id, vs.as_deref(), range).await,
        Command::Ticker { symbols, vs } => run_ticker(&router, symbols, vs.as_deref()).await,
        Command::Screener { page_size, vs, filter } => {
            run_screener(router.screener(page_size, vs.as_deref(), filter)).await
        }
    }
}
