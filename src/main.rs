use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dotenv::dotenv;
use std::io::stdout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use alloc_scan::config::Args;
use alloc_scan::dispatcher;
use alloc_scan::fetcher::HttpFetcher;
use alloc_scan::inputs::{load_proxies, load_wallets};
use alloc_scan::sink::ResultSink;
use alloc_scan::table::ResultTable;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    println!("{}", "Starting Airdrop Allocator...".bold().green());
    println!(
        "{}\n",
        "IF ERRORS OCCUR - CHANGE PROXY OR wallet is INVALID OR UNELIGIBLE".bold().yellow()
    );

    let wallets = load_wallets(&args.wallets).context("failed to read wallet list")?;
    if wallets.is_empty() {
        info!("No wallet addresses found!");
        return Ok(());
    }
    info!("Total wallets: {}", wallets.len());

    let proxies = load_proxies(&args.proxies).context("failed to read proxy list")?;
    if !proxies.is_empty() {
        info!("Loaded {} proxies", proxies.len());
    }

    let fetcher =
        HttpFetcher::new(args.url(), args.retry_policy(), args.timeout(), args.insecure_tls);
    let sink = ResultSink::new(&args.logs_dir, &args.log_name, args.persist_mode);

    let mut table = ResultTable::new(stdout());
    table.header("Airdrop Allocation Results")?;

    let summary = dispatcher::run(
        &fetcher,
        &sink,
        &wallets,
        &proxies,
        args.concurrency_limit(),
        |row| {
            if let Err(e) = table.push(row) {
                warn!("cannot write table row: {e}");
            }
        },
    )
    .await;

    table.footer(&summary, args.usd_rate)?;
    info!("results written to {}", sink.csv_path().display());
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "alloc_scan=debug" } else { "alloc_scan=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
