use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use async_trait::async_trait;
use clap::ValueEnum;
use rand::seq::SliceRandom;
use reqwest::header::{self, HeaderValue};
use reqwest::{Client, Proxy};
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::error::{Result, ScanError};

const BODY_SNIPPET_CHARS: usize = 200;
const ORIGIN: &str = "https://www.grassfoundation.io";
const REFERER: &str = "https://www.grassfoundation.io/";

static USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Endpoint {
    /// Final allocation snapshot.
    Final,
    /// Earlier v2 allocation listing.
    V2,
}

impl Endpoint {
    pub fn url(&self) -> &'static str {
        match self {
            Endpoint::Final => "https://api.getgrass.io/zvTlZ8PRouKKGTGNzg4k",
            Endpoint::V2 => "https://api.getgrass.io/airdropAllocationsV2",
        }
    }
}

/// Attempt ceiling and exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self { attempts: attempts.max(1), base_delay, max_delay: max_delay.max(base_delay) }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, try_no: usize) -> Duration {
        let shift = try_no.saturating_sub(1).min(31) as u32;
        self.base_delay.saturating_mul(1u32 << shift).min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempt ceiling is reached. The last error is returned in the latter case.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_err: Option<ScanError> = None;

    for try_no in 1..=attempts {
        match op(try_no).await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if try_no < attempts {
                    let delay = policy.delay_after(try_no);
                    debug!(
                        "{label}: attempt {try_no}/{attempts} failed ({e}); backing off {} ms",
                        delay.as_millis()
                    );
                    sleep(delay).await;
                } else {
                    debug!("{label}: attempt {try_no}/{attempts} failed ({e}); giving up");
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ScanError::Network(format!("{label}: exhausted retries"))))
}

/// A decoded allocation document whose `result` field is present and truthy.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResponse {
    raw: Value,
}

impl AllocationResponse {
    pub fn from_value(raw: Value) -> Result<Self> {
        match raw.get("result") {
            Some(r) if is_truthy(r) => Ok(Self { raw }),
            Some(_) => Err(ScanError::MalformedResponse("`result` is empty".into())),
            None => Err(ScanError::MalformedResponse("`result` is missing".into())),
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The `result.data` category map, if the service sent one.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.raw
            .get("result")
            .and_then(|r| r.get("data"))
            .and_then(|d| d.as_object())
    }
}

/// Leading part of an error body; proxies and CDNs like to send whole pages.
fn snippet(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(BODY_SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Where allocation documents come from.
#[async_trait]
pub trait AllocationSource: Send + Sync {
    async fn fetch(&self, wallet: &str, proxy: Option<&str>) -> Result<AllocationResponse>;
}

pub struct HttpFetcher {
    base_url: String,
    policy: RetryPolicy,
    timeout: Duration,
    insecure_tls: bool,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl HttpFetcher {
    pub fn new(
        base_url: &str,
        policy: RetryPolicy,
        timeout: Duration,
        insecure_tls: bool,
    ) -> Self {
        if insecure_tls {
            warn!("TLS certificate validation is disabled for {base_url}");
        }
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
            timeout,
            insecure_tls,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn request_url(&self, wallet: &str) -> String {
        let input = json!({ "walletAddress": wallet }).to_string();
        format!("{}?input={}", self.base_url, urlencoding::encode(&input))
    }

    /// One client per proxy; each gets its own random user agent.
    fn client_for(&self, proxy: Option<&str>) -> Result<Client> {
        let key = proxy.map(str::to_owned);
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(c) = clients.get(&key) {
            return Ok(c.clone());
        }
        let client = build_client(proxy, self.timeout, self.insecure_tls)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn attempt(&self, client: &Client, url: &str) -> Result<AllocationResponse> {
        let resp = client.get(url).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let body = snippet(&String::from_utf8_lossy(&bytes));
            return Err(ScanError::Network(format!("http {status}: {body}")));
        }
        let v: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ScanError::Network(format!("undecodable body: {e}")))?;
        AllocationResponse::from_value(v)
    }
}

#[async_trait]
impl AllocationSource for HttpFetcher {
    async fn fetch(&self, wallet: &str, proxy: Option<&str>) -> Result<AllocationResponse> {
        let client = self.client_for(proxy)?;
        let url = self.request_url(wallet);
        with_backoff(&self.policy, wallet, |_| self.attempt(&client, &url)).await
    }
}

fn build_client(proxy: Option<&str>, timeout: Duration, insecure_tls: bool) -> Result<Client> {
    let ua = USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0]);

    let mut headers = header::HeaderMap::new();
    let accept = "application/json, text/plain, */*";
    headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::ORIGIN, HeaderValue::from_static(ORIGIN));
    headers.insert(header::REFERER, HeaderValue::from_static(REFERER));
    headers.insert(header::USER_AGENT, HeaderValue::from_static(ua));

    let mut builder = Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::limited(4))
        .danger_accept_invalid_certs(insecure_tls);
    if let Some(p) = proxy {
        builder = builder.proxy(Proxy::all(p)?);
    }
    Ok(builder.build()?)
}
