use std::path::PathBuf;

use clap::Parser;
use tokio::time::Duration;

use crate::fetcher::{Endpoint, RetryPolicy};
use crate::sink::PersistMode;

#[derive(Parser, Debug, Clone)]
#[command(name = "alloc_scan", version, about)]
pub struct Args {
    #[arg(long, env = "WALLETS_FILE", default_value = "data/wallets.txt")]
    pub wallets: PathBuf,
    /// Optional; proxies are assigned round-robin by wallet position.
    #[arg(long, env = "PROXIES_FILE", default_value = "data/proxies.txt")]
    pub proxies: PathBuf,
    /// Maximum number of allocation requests in flight.
    #[arg(
        long,
        env = "THREADS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub threads: u16,
    #[arg(long, value_enum, env = "ENDPOINT", default_value_t = Endpoint::Final)]
    pub endpoint: Endpoint,
    /// Overrides the endpoint URL entirely.
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,
    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 5)]
    pub attempts: usize,
    #[arg(long = "backoff-ms", env = "BACKOFF_MS", default_value_t = 1000)]
    pub backoff_ms: u64,
    #[arg(long = "backoff-max-ms", env = "BACKOFF_MAX_MS", default_value_t = 8000)]
    pub backoff_max_ms: u64,
    #[arg(long = "timeout-secs", env = "TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
    /// Skip TLS certificate validation. Only for endpoints with a broken chain.
    #[arg(long = "insecure-tls", env = "INSECURE_TLS", default_value_t = false)]
    pub insecure_tls: bool,
    #[arg(long = "logs-dir", env = "LOGS_DIR", default_value = "logs")]
    pub logs_dir: PathBuf,
    #[arg(long = "log-name", env = "LOG_NAME", default_value = "airdrop_result")]
    pub log_name: String,
    #[arg(
        long = "persist-mode",
        value_enum,
        env = "PERSIST_MODE",
        default_value_t = PersistMode::Ledger
    )]
    pub persist_mode: PersistMode,
    /// USD value of one token, used for the summary line.
    #[arg(long = "usd-rate", env = "USD_RATE", default_value_t = 1.5)]
    pub usd_rate: f64,
    #[arg(long)]
    pub verbose: bool,
}

impl Args {
    pub fn url(&self) -> &str {
        self.base_url.as_deref().unwrap_or_else(|| self.endpoint.url())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.attempts,
            Duration::from_millis(self.backoff_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn concurrency_limit(&self) -> usize {
        usize::from(self.threads)
    }
}
