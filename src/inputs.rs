use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Result, ScanError};

// scheme://[user:pass@]host:port
static URL_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(https?|socks5h?)://(?:([^:@/]+):([^@/]*)@)?([^:@/]+):(\d{1,5})/?$")
        .expect("valid proxy regex")
});
// user:pass@host:port
static AUTH_AT_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:@/]+):([^@/]*)@([^:@/]+):(\d{1,5})$").expect("valid proxy regex")
});
// host:port[:user:pass]
static COLON_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:@/]+):(\d{1,5})(?::([^:@/]+):([^@/]*))?$").expect("valid proxy regex")
});

/// Trimmed, non-empty lines of a text file.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ScanError::Input(format!("{}: {e}", path.display())))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

pub fn load_wallets(path: &Path) -> Result<Vec<String>> {
    let wallets = read_lines(path)?;
    debug!("read {} wallets from {}", wallets.len(), path.display());
    Ok(wallets)
}

/// Proxy list as request-ready URLs. A missing file means "no proxies".
pub fn load_proxies(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        info!("no proxy file at {}; connecting directly", path.display());
        return Ok(Vec::new());
    }
    read_lines(path)?
        .iter()
        .enumerate()
        .map(|(i, line)| {
            normalize_proxy(line)
                .map_err(|e| ScanError::Input(format!("{}:{}: {e}", path.display(), i + 1)))
        })
        .collect()
}

/// Accepts the usual proxy-list spellings and returns `scheme://[user:pass@]host:port`.
pub fn normalize_proxy(line: &str) -> Result<String> {
    let s = line.trim();

    if let Some(c) = URL_FORM.captures(s) {
        let scheme = c[1].to_lowercase();
        return Ok(match (c.get(2), c.get(3)) {
            (Some(u), Some(p)) => {
                format!("{scheme}://{}:{}@{}:{}", u.as_str(), p.as_str(), &c[4], &c[5])
            }
            _ => format!("{scheme}://{}:{}", &c[4], &c[5]),
        });
    }
    if let Some(c) = AUTH_AT_FORM.captures(s) {
        return Ok(format!("http://{}:{}@{}:{}", &c[1], &c[2], &c[3], &c[4]));
    }
    if let Some(c) = COLON_FORM.captures(s) {
        return Ok(match (c.get(3), c.get(4)) {
            (Some(u), Some(p)) => {
                format!("http://{}:{}@{}:{}", u.as_str(), p.as_str(), &c[1], &c[2])
            }
            _ => format!("http://{}:{}", &c[1], &c[2]),
        });
    }
    Err(ScanError::Input(format!("unrecognised proxy `{s}`")))
}
