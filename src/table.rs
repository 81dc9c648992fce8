use std::io::{self, Write};

use colored::Colorize;

use crate::dispatcher::{ResultRow, RunSummary};
use crate::totals::{round2, Status};

const HEADERS: [&str; 4] = ["#", "Wallet Address", "Total Tokens", "Status"];
const WIDTHS: [usize; 4] = [6, 19, 16, 10];

/// Console table that grows one row per finished wallet.
pub struct ResultTable<W: Write> {
    out: W,
    rows: usize,
}

impl<W: Write> ResultTable<W> {
    pub fn new(out: W) -> Self {
        Self { out, rows: 0 }
    }

    pub fn header(&mut self, title: &str) -> io::Result<()> {
        writeln!(self.out, "\n{}", title.bold())?;
        self.rule()?;
        let cells: Vec<String> = HEADERS
            .iter()
            .zip(WIDTHS)
            .map(|(h, w)| format!("{:^w$}", h.cyan(), w = w))
            .collect();
        writeln!(self.out, "|{}|", cells.join("|"))?;
        self.rule()
    }

    pub fn push(&mut self, row: &ResultRow) -> io::Result<()> {
        let status = match row.status {
            Status::Eligible => row.status.to_string().bright_green(),
            Status::Sybil => row.status.to_string().yellow(),
            Status::Error => row.status.to_string().red(),
        };
        writeln!(
            self.out,
            "|{:^w0$}|{:^w1$}|{:^w2$}|{:^w3$}|",
            row.index,
            row.masked,
            row.total,
            status,
            w0 = WIDTHS[0],
            w1 = WIDTHS[1],
            w2 = WIDTHS[2],
            w3 = WIDTHS[3],
        )?;
        self.rows += 1;
        self.out.flush()
    }

    pub fn footer(&mut self, summary: &RunSummary, usd_rate: f64) -> io::Result<()> {
        if self.rows > 0 {
            self.rule()?;
        }
        let total = round2(summary.grand_total);
        let line = format!("Total: {} $GRASS / {} $", total, round2(total * usd_rate));
        writeln!(self.out, "\n{}", line.bright_green().bold())?;
        writeln!(
            self.out,
            "eligible: {}  sybil: {}  error: {}",
            summary.count(Status::Eligible),
            summary.count(Status::Sybil),
            summary.count(Status::Error),
        )?;
        self.out.flush()
    }

    fn rule(&mut self) -> io::Result<()> {
        let segs: Vec<String> = WIDTHS.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(self.out, "+{}+", segs.join("+"))
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}
