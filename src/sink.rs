use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, ScanError};
use crate::totals::{Status, Totals, ALL_KEY};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PersistMode {
    /// `wallet,total` rows, one per wallet ever seen; first write wins.
    Ledger,
    /// Whole CSV rewritten at the end of each run with one column per category.
    Breakdown,
}

/// Writes per-wallet results to disk. Failures are logged, never returned.
pub struct ResultSink {
    dir: PathBuf,
    json_log: PathBuf,
    csv: PathBuf,
    mode: PersistMode,
    // guards every file write
    state: Mutex<SinkState>,
}

#[derive(Default)]
struct SinkState {
    /// Wallets already in the ledger CSV.
    seen: HashSet<String>,
    /// This run's rows in breakdown mode.
    pending: BTreeMap<String, Totals>,
}

impl ResultSink {
    pub fn new(dir: &Path, name: &str, mode: PersistMode) -> Self {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("cannot create {}: {e}", dir.display());
        }
        let csv = dir.join(format!("{name}.csv"));
        let mut state = SinkState::default();
        if mode == PersistMode::Ledger {
            match load_ledger(&csv) {
                Ok(seen) => state.seen = seen,
                Err(e) => warn!("cannot read {}: {e}", csv.display()),
            }
        }
        Self {
            dir: dir.to_path_buf(),
            json_log: dir.join(format!("{name}.json")),
            csv,
            mode,
            state: Mutex::new(state),
        }
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv
    }

    #[cfg(test)]
    fn json_log_path(&self) -> &Path {
        &self.json_log
    }

    pub fn persist(&self, wallet: &str, raw: &Value, totals: &Totals, status: Status) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Err(e) = self.append_bucket(wallet, status) {
            warn!("{wallet}: status bucket write failed: {e}");
        }
        if let Err(e) = self.append_json(raw) {
            warn!("{wallet}: json log write failed: {e}");
        }
        match self.mode {
            PersistMode::Ledger => {
                if let Err(e) = self.append_ledger(&mut state.seen, wallet, totals) {
                    warn!("{wallet}: csv write failed: {e}");
                }
            }
            PersistMode::Breakdown => {
                state.pending.insert(wallet.to_string(), totals.clone());
            }
        }
    }

    /// Flushes anything held back until the end of the run.
    pub fn finish(&self) {
        if self.mode != PersistMode::Breakdown {
            return;
        }
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.write_breakdown(&state.pending) {
            warn!("breakdown csv write failed: {e}");
        }
    }

    fn append_bucket(&self, wallet: &str, status: Status) -> Result<()> {
        let Some(file) = status.bucket_file() else {
            return Ok(());
        };
        let mut f = OpenOptions::new().create(true).append(true).open(self.dir.join(file))?;
        writeln!(f, "{wallet}")?;
        Ok(())
    }

    fn append_json(&self, raw: &Value) -> Result<()> {
        let mut buf = Vec::new();
        let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
        raw.serialize(&mut ser)
            .map_err(|e| ScanError::Persistence(e.to_string()))?;
        buf.push(b'\n');

        let mut f = OpenOptions::new().create(true).append(true).open(&self.json_log)?;
        f.write_all(&buf)?;
        Ok(())
    }

    fn append_ledger(
        &self,
        seen: &mut HashSet<String>,
        wallet: &str,
        totals: &Totals,
    ) -> Result<()> {
        if seen.contains(wallet) {
            debug!("{wallet}: already in {}, keeping first value", self.csv.display());
            return Ok(());
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.csv)?;
        let total = totals.all().to_string();
        let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        w.write_record([wallet, total.as_str()])?;
        w.flush()?;
        seen.insert(wallet.to_string());
        Ok(())
    }

    fn write_breakdown(&self, rows: &BTreeMap<String, Totals>) -> Result<()> {
        let categories: BTreeSet<&String> = rows
            .values()
            .flat_map(|t| t.categories().map(|(k, _)| k))
            .collect();

        let mut w = csv::Writer::from_path(&self.csv)?;
        let mut header = vec!["wallet".to_string()];
        header.extend(categories.iter().map(|c| c.to_string()));
        header.push(ALL_KEY.to_string());
        w.write_record(&header)?;

        for (wallet, totals) in rows {
            let mut record = vec![wallet.clone()];
            record.extend(
                categories
                    .iter()
                    .map(|c| totals.points().get(*c).map(f64::to_string).unwrap_or_default()),
            );
            record.push(totals.all().to_string());
            w.write_record(&record)?;
        }
        w.flush()?;
        debug!("wrote {} rows to {}", rows.len(), self.csv.display());
        Ok(())
    }
}

/// Wallet addresses already present in a ledger CSV.
fn load_ledger(path: &Path) -> Result<HashSet<String>> {
    let mut seen = HashSet::new();
    if !path.exists() {
        return Ok(seen);
    }
    let mut r = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    for record in r.records() {
        if let Some(wallet) = record?.get(0) {
            seen.insert(wallet.to_string());
        }
    }
    debug!("{} wallets already in {}", seen.len(), path.display());
    Ok(seen)
}
