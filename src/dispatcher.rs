use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{Result, ScanError};
use crate::fetcher::{AllocationResponse, AllocationSource};
use crate::sink::ResultSink;
use crate::totals::{aggregate, numeric_points, Status, Totals};

/// One line of the results table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    /// 1-based position in the wallet list.
    pub index: usize,
    pub wallet: String,
    pub masked: String,
    pub total: f64,
    pub status: Status,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Sorted by index.
    pub rows: Vec<ResultRow>,
    pub grand_total: f64,
}

impl RunSummary {
    pub fn count(&self, status: Status) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }
}

pub fn mask_wallet(wallet: &str) -> String {
    let chars: Vec<char> = wallet.chars().collect();
    let head: String = chars.iter().take(6).collect();
    let tail: String = chars[chars.len().saturating_sub(6)..].iter().collect();
    format!("{head}...{tail}")
}

pub fn proxy_for(proxies: &[String], i: usize) -> Option<&str> {
    if proxies.is_empty() {
        None
    } else {
        Some(proxies[i % proxies.len()].as_str())
    }
}

/// Checks every wallet, with at most `concurrency_limit` fetches in flight.
///
/// Rows are passed to `on_row` as they complete; the returned summary holds
/// all of them in input order. A failing wallet becomes an `Error` row and
/// never affects the others.
pub async fn run<S, F>(
    source: &S,
    sink: &ResultSink,
    wallets: &[String],
    proxies: &[String],
    concurrency_limit: usize,
    mut on_row: F,
) -> RunSummary
where
    S: AllocationSource + ?Sized,
    F: FnMut(&ResultRow),
{
    let permits = Semaphore::new(concurrency_limit.max(1));

    let mut pending: FuturesUnordered<_> = wallets
        .iter()
        .enumerate()
        .map(|(i, wallet)| {
            check_wallet(source, sink, &permits, i + 1, wallet, proxy_for(proxies, i))
        })
        .collect();

    let mut summary = RunSummary { rows: Vec::with_capacity(wallets.len()), grand_total: 0.0 };
    while let Some(row) = pending.next().await {
        summary.grand_total += row.total;
        on_row(&row);
        summary.rows.push(row);
    }
    drop(pending);

    sink.finish();
    summary.rows.sort_by_key(|r| r.index);
    summary
}

async fn check_wallet<S>(
    source: &S,
    sink: &ResultSink,
    permits: &Semaphore,
    index: usize,
    wallet: &str,
    proxy: Option<&str>,
) -> ResultRow
where
    S: AllocationSource + ?Sized,
{
    let masked = mask_wallet(wallet);

    let fetched = match permits.acquire().await {
        Ok(_permit) => source.fetch(wallet, proxy).await,
        Err(e) => Err(ScanError::Network(format!("fetch window closed: {e}"))),
    };

    let evaluated = fetched.and_then(|resp| {
        let totals = evaluate(&resp)?;
        Ok((resp, totals))
    });

    match evaluated {
        Ok((resp, totals)) => {
            let status = totals.status();
            sink.persist(wallet, resp.raw(), &totals, status);
            debug!("#{index} {masked}: {status} {}", totals.all());
            ResultRow {
                index,
                wallet: wallet.to_string(),
                masked,
                total: totals.rounded_all(),
                status,
            }
        }
        Err(e) => {
            warn!("#{index} {masked}: {e}");
            ResultRow {
                index,
                wallet: wallet.to_string(),
                masked,
                total: 0.0,
                status: Status::Error,
            }
        }
    }
}

fn evaluate(resp: &AllocationResponse) -> Result<Totals> {
    let data = resp
        .data()
        .ok_or_else(|| ScanError::MalformedResponse("`result.data` is missing".into()))?;
    Ok(aggregate(numeric_points(data)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::PersistMode;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    /// Answers by wallet prefix and records concurrency and call details.
    #[derive(Default)]
    struct FakeSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<HashMap<String, (usize, Option<String>)>>,
    }

    #[async_trait]
    impl AllocationSource for FakeSource {
        async fn fetch(&self, wallet: &str, proxy: Option<&str>) -> Result<AllocationResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            {
                let mut calls = self.calls.lock().unwrap();
                let entry = calls.entry(wallet.to_string()).or_insert((0, None));
                entry.0 += 1;
                entry.1 = proxy.map(str::to_owned);
            }
            // stagger completion so later wallets can finish first
            let wait = 1 + (wallet.len() * 7 % 5) as u64;
            sleep(Duration::from_millis(wait)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let body = if wallet.starts_with("fail") {
                return Err(ScanError::Network("connection reset".into()));
            } else if wallet.starts_with("nodata") {
                json!({"result": {"status": "not found"}})
            } else if wallet.starts_with("text") {
                json!({"result": {"data": {"epoch1": "many"}}})
            } else if wallet.starts_with("sybil") {
                json!({"result": {"data": {"epoch1_sybil": 10, "epoch2": 5}}})
            } else {
                json!({"result": {"data": {"epoch1": 1.5, "epoch2": 2.25}}})
            };
            AllocationResponse::from_value(body)
        }
    }

    fn wallets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn sink(dir: &tempfile::TempDir) -> ResultSink {
        ResultSink::new(dir.path(), "airdrop_result", PersistMode::Ledger)
    }

    #[test]
    fn masks_first_and_last_six() {
        assert_eq!(mask_wallet("0x1234567890abcdef"), "0x1234...abcdef");
        assert_eq!(mask_wallet("short"), "short...short");
    }

    #[test]
    fn proxies_cycle_by_index() {
        let proxies = wallets(&["http://a:1", "http://b:2"]);
        assert_eq!(proxy_for(&proxies, 0), Some("http://a:1"));
        assert_eq!(proxy_for(&proxies, 3), Some("http://b:2"));
        assert_eq!(proxy_for(&[], 3), None);
    }

    #[tokio::test]
    async fn every_wallet_yields_exactly_one_row() {
        let list: Vec<String> = (0..30)
            .map(|i| match i % 4 {
                0 => format!("fail-{i}"),
                1 => format!("sybil-{i}"),
                2 => format!("nodata-{i}"),
                _ => format!("ok-wallet-{i}"),
            })
            .collect();

        for limit in [1, 3, 50] {
            let dir = tempfile::tempdir().unwrap();
            let source = FakeSource::default();
            let mut seen = Vec::new();
            let summary =
                run(&source, &sink(&dir), &list, &[], limit, |row| seen.push(row.index)).await;

            assert_eq!(summary.rows.len(), list.len());
            let indices: Vec<usize> = summary.rows.iter().map(|r| r.index).collect();
            assert_eq!(indices, (1..=list.len()).collect::<Vec<_>>());
            seen.sort_unstable();
            assert_eq!(seen, indices);

            // 8 sybil wallets at 15, 7 ok wallets at 3.75
            assert_eq!(summary.count(Status::Sybil), 8);
            assert_eq!(summary.count(Status::Eligible), 7);
            assert_eq!(summary.count(Status::Error), 15);
            assert_eq!(summary.grand_total, 8.0 * 15.0 + 7.0 * 3.75);
            let row_sum: f64 = summary.rows.iter().map(|r| r.total).sum();
            assert_eq!(row_sum, summary.grand_total);
        }
    }

    #[tokio::test]
    async fn fetches_never_exceed_limit() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        let list: Vec<String> = (0..20).map(|i| format!("ok-{i}")).collect();

        run(&source, &sink(&dir), &list, &[], 3, |_| {}).await;

        assert_eq!(source.peak.load(Ordering::SeqCst), 3);
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wallets_get_cycled_proxies() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        let list = wallets(&["ok-a", "ok-b", "ok-c"]);
        let proxies = wallets(&["http://p1:80", "http://p2:80"]);

        run(&source, &sink(&dir), &list, &proxies, 2, |_| {}).await;

        let calls = source.calls.lock().unwrap();
        assert_eq!(calls["ok-a"].1.as_deref(), Some("http://p1:80"));
        assert_eq!(calls["ok-b"].1.as_deref(), Some("http://p2:80"));
        assert_eq!(calls["ok-c"].1.as_deref(), Some("http://p1:80"));
    }

    #[tokio::test]
    async fn missing_data_is_error_and_fetched_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        let list = wallets(&["nodata-1", "text-1"]);

        let summary = run(&source, &sink(&dir), &list, &[], 2, |_| {}).await;

        assert!(summary.rows.iter().all(|r| r.status == Status::Error && r.total == 0.0));
        assert_eq!(summary.grand_total, 0.0);
        let calls = source.calls.lock().unwrap();
        assert_eq!(calls["nodata-1"].0, 1);
        assert_eq!(calls["text-1"].0, 1);
        assert!(!dir.path().join("eligibles.txt").exists());
    }

    #[tokio::test]
    async fn all_failures_still_complete() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        let list = wallets(&["fail-1", "fail-2", "fail-3"]);

        let summary = run(&source, &sink(&dir), &list, &[], 1, |_| {}).await;

        assert_eq!(summary.rows.len(), 3);
        assert_eq!(summary.count(Status::Error), 3);
        assert_eq!(summary.grand_total, 0.0);
    }

    #[tokio::test]
    async fn results_reach_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        let list = wallets(&["ok-0x1", "sybil-0x2", "fail-0x3"]);

        run(&source, &sink(&dir), &list, &[], 2, |_| {}).await;

        let read = |f: &str| std::fs::read_to_string(dir.path().join(f)).unwrap();
        assert_eq!(read("eligibles.txt"), "ok-0x1\n");
        assert_eq!(read("sybils.txt"), "sybil-0x2\n");
        let csv = read("airdrop_result.csv");
        assert!(csv.contains("ok-0x1,3.75\n"));
        assert!(csv.contains("sybil-0x2,15\n"));
        assert!(!csv.contains("fail-0x3"));
    }
}
