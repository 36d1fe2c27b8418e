use floorsheet_datahub::config::{ClientConfig, Config, DEFAULT_SOLVER_URL};
use floorsheet_datahub::models::trade::FilterSet;
use floorsheet_datahub::scrapers::merolagani::MeroLaganiScraper;
use floorsheet_datahub::services::crawl_service::CrawlService;
use floorsheet_datahub::store::SqliteStore;
use floorsheet_datahub::util::parse_date;

use anyhow::{bail, Context};
use clap::{App, Arg, ArgMatches, SubCommand};
use chrono::{Duration as ChronoDuration, Local};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_DB: &str = "data/floorsheet.db";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let today = Local::now().date_naive();
    let today_str = today.format("%Y-%m-%d").to_string();
    let yesterday_str = (today - ChronoDuration::days(1)).format("%Y-%m-%d").to_string();

    let matches = build_app(&yesterday_str, &today_str).get_matches();

    match matches.subcommand() {
        Some(("scrape", m)) => scrape(m).await,
        Some(("explore", m)) => explore(m),
        Some(("progress", m)) => progress(m),
        _ => {
            info!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}

/// 命令行定义；默认日期由调用方按本地时间算好传入
fn build_app<'a>(yesterday_str: &'a str, today_str: &'a str) -> App<'a> {
    App::new("Floorsheet DataHub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scrapes paginated floorsheet tables into SQLite")
        .subcommand(
            SubCommand::with_name("scrape")
                .about("Crawl a date range")
                .arg(
                    Arg::with_name("start")
                        .short('s')
                        .long("start")
                        .value_name("DATE")
                        .help("First date to crawl (YYYY-MM-DD or MM/DD/YYYY)")
                        .takes_value(true)
                        .default_value(yesterday_str),
                )
                .arg(
                    Arg::with_name("end")
                        .short('e')
                        .long("end")
                        .value_name("DATE")
                        .help("End date, exclusive")
                        .takes_value(true)
                        .default_value(today_str),
                )
                .arg(Arg::with_name("symbol").long("symbol").value_name("SYMBOL").help("Company symbol filter").takes_value(true))
                .arg(Arg::with_name("buyer").long("buyer").value_name("CODE").help("Buyer broker code filter").takes_value(true))
                .arg(Arg::with_name("seller").long("seller").value_name("CODE").help("Seller broker code filter").takes_value(true))
                .arg(db_arg())
                .arg(
                    Arg::with_name("min-delay")
                        .long("min-delay")
                        .value_name("SECONDS")
                        .help("Lower bound of the random delay between requests")
                        .takes_value(true)
                        .default_value("1"),
                )
                .arg(
                    Arg::with_name("max-delay")
                        .long("max-delay")
                        .value_name("SECONDS")
                        .help("Upper bound of the random delay between requests")
                        .takes_value(true)
                        .default_value("3"),
                )
                .arg(
                    Arg::with_name("backoff")
                        .long("backoff")
                        .value_name("SECONDS")
                        .help("Wait before retrying a failed page")
                        .takes_value(true)
                        .default_value("300"),
                )
                .arg(
                    Arg::with_name("max-retries")
                        .long("max-retries")
                        .value_name("N")
                        .help("Give up on a page after N failed attempts")
                        .takes_value(true)
                        .default_value("30"),
                )
                .arg(
                    Arg::with_name("retry-forever")
                        .long("retry-forever")
                        .help("Retry transient failures without a ceiling")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("no-reuse-probe")
                        .long("no-reuse-probe")
                        .help("Discard the probe fetch and re-fetch page 1 while paging")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("fresh")
                        .long("fresh")
                        .help("Ignore the progress log and crawl every date again")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("proxy")
                        .long("proxy")
                        .value_name("URL")
                        .help("Route requests through a FlareSolverr endpoint")
                        .takes_value(true)
                        .min_values(0)
                        .default_missing_value(DEFAULT_SOLVER_URL),
                ),
        )
        .subcommand(
            SubCommand::with_name("explore")
                .about("Show stored rows for a date")
                .arg(db_arg())
                .arg(
                    Arg::with_name("date")
                        .short('d')
                        .long("date")
                        .value_name("DATE")
                        .help("Trade date to show")
                        .takes_value(true)
                        .default_value(yesterday_str),
                )
                .arg(
                    Arg::with_name("limit")
                        .short('l')
                        .long("limit")
                        .value_name("LIMIT")
                        .help("Limit the number of rows to display")
                        .takes_value(true)
                        .default_value("10"),
                )
                .arg(json_arg()),
        )
        .subcommand(
            SubCommand::with_name("progress")
                .about("Print the crawl progress log")
                .arg(db_arg())
                .arg(json_arg()),
        )
}

fn db_arg<'a>() -> Arg<'a> {
    Arg::with_name("db")
        .long("db")
        .value_name("PATH")
        .help("SQLite database file")
        .takes_value(true)
        .default_value(DEFAULT_DB)
}

fn json_arg<'a>() -> Arg<'a> {
    Arg::with_name("json")
        .long("json")
        .help("Print one JSON object per line instead of a table")
        .takes_value(false)
}

fn seconds(matches: &ArgMatches, name: &str) -> anyhow::Result<Duration> {
    let raw = matches.value_of(name).unwrap_or("0");
    let secs: f64 = raw.parse().with_context(|| format!("--{} expects seconds, got '{}'", name, raw))?;
    if secs < 0.0 {
        bail!("--{} must not be negative", name);
    }
    Ok(Duration::from_secs_f64(secs))
}

async fn scrape(matches: &ArgMatches) -> anyhow::Result<()> {
    let start = parse_date(matches.value_of("start").unwrap_or_default())?;
    let end = parse_date(matches.value_of("end").unwrap_or_default())?;
    let filters = FilterSet::new(
        matches.value_of("symbol").unwrap_or_default(),
        matches.value_of("buyer").unwrap_or_default(),
        matches.value_of("seller").unwrap_or_default(),
    );
    let max_retries = if matches.is_present("retry-forever") {
        None
    } else {
        Some(matches.value_of("max-retries").unwrap_or("30").parse::<u32>()?)
    };
    let db_path = matches.value_of("db").unwrap_or(DEFAULT_DB);

    let config = Config::new()
        .with_date_range(start, end)
        .with_filters(filters)
        .with_delay_bounds(seconds(matches, "min-delay")?, seconds(matches, "max-delay")?)
        .with_retry_backoff(seconds(matches, "backoff")?)
        .with_max_retries(max_retries)
        .with_reuse_probe_page(!matches.is_present("no-reuse-probe"))
        .with_resume(!matches.is_present("fresh"))
        .with_db_path(db_path);
    config.validate()?;

    let mut client_config = ClientConfig::new();
    if let Some(proxy) = matches.value_of("proxy") {
        info!("Routing requests through solver {}", proxy);
        client_config = client_config.with_solver(proxy);
    }

    let source = Arc::new(MeroLaganiScraper::new(client_config)?);
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let mut service = CrawlService::new(config, source, store);

    // Ctrl-C 只设置取消标志，由控制器在下一个检查点停止
    let cancel = service.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stop requested, finishing at the next checkpoint");
            cancel.cancel();
        }
    });

    let summary = service.run().await?;
    if summary.cancelled {
        warn!("Crawl stopped early; rerun the same command to resume");
    }
    info!(
        "Done: {} dates complete, {} skipped, {} rows persisted",
        summary.dates_completed, summary.dates_skipped, summary.records_persisted
    );
    Ok(())
}

fn explore(matches: &ArgMatches) -> anyhow::Result<()> {
    let date = parse_date(matches.value_of("date").unwrap_or_default())?;
    let limit = matches.value_of("limit").unwrap_or("10").parse::<usize>().unwrap_or(10);
    let store = SqliteStore::open(matches.value_of("db").unwrap_or(DEFAULT_DB))?;

    let trades = store.trades_for_date(date)?;
    if matches.is_present("json") {
        for trade in trades.iter().take(limit) {
            println!("{}", serde_json::to_string(trade)?);
        }
        return Ok(());
    }

    info!("Found {} rows for {}", trades.len(), date);
    info!("{:-<92}", "");
    info!(
        "{:<6} {:<20} {:<10} {:<7} {:<7} {:>10} {:>12} {:>15}",
        "#", "Contract", "Symbol", "Buyer", "Seller", "Quantity", "Rate", "Amount"
    );
    info!("{:-<92}", "");
    for trade in trades.iter().take(limit) {
        info!(
            "{:<6} {:<20} {:<10} {:<7} {:<7} {:>10} {:>12} {:>15}",
            trade.row_sequence_in_page,
            trade.contract_id,
            trade.symbol,
            trade.buyer_id,
            trade.seller_id,
            trade.quantity,
            trade.rate,
            trade.amount
        );
    }
    if trades.len() > limit {
        info!("... and {} more rows", trades.len() - limit);
    }
    Ok(())
}

fn progress(matches: &ArgMatches) -> anyhow::Result<()> {
    let store = SqliteStore::open(matches.value_of("db").unwrap_or(DEFAULT_DB))?;
    let entries = store.progress_log()?;
    if matches.is_present("json") {
        for entry in &entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }
    if entries.is_empty() {
        info!("Progress log is empty");
    }
    for entry in entries {
        info!(
            "{} {:<11} {:>4}/{:<4} {} {}",
            entry.trade_date,
            entry.status,
            entry.pages_completed,
            entry.pages_total,
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.filter_key
        );
    }
    Ok(())
}
