//! Realized-gains CSV (1099-B export) import.
//!
//! Layout: one header row, then one row per closed lot. Only three columns
//! are read: 1 = date sold, 4 = date acquired, 7 = gain/loss. Dates are
//! `MM/DD/YY`; amounts are decimal strings and never go through `f64`.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use gains_db::ImportRecord;
use gains_portfolio::{Cents, Term, YearChange, LONG_TERM_THRESHOLD_DAYS};
use sha2::{Digest, Sha256};

const COL_SOLD: usize = 1;
const COL_ACQUIRED: usize = 4;
const COL_GAIN: usize = 7;
const DATE_FORMAT: &str = "%m/%d/%y";

pub const SOURCE: &str = "1099-csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedImport {
    pub file_sha256: String,
    pub rows: i64,
    pub by_tax_year: BTreeMap<i32, YearChange>,
}

impl ParsedImport {
    pub fn into_record(self, account_id: i64) -> ImportRecord {
        ImportRecord {
            account_id,
            file_sha256: self.file_sha256,
            source: SOURCE.to_string(),
            rows_imported: self.rows,
            by_tax_year: self.by_tax_year,
        }
    }
}

impl fmt::Display for ParsedImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "file_sha256={}", self.file_sha256)?;
        write!(f, "rows={}", self.rows)?;
        for (year, c) in &self.by_tax_year {
            write!(
                f,
                "\ntax_year={} net={} short_term={} long_term={}",
                year, c.net, c.short_term, c.long_term
            )?;
        }
        Ok(())
    }
}

fn parse_date(raw: &str, what: &str, row: usize) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .with_context(|| format!("row {row}: invalid {what} date {raw:?} (expected MM/DD/YY)"))
}

fn holding_term(acquired: NaiveDate, sold: NaiveDate) -> Term {
    if (sold - acquired).num_days() > LONG_TERM_THRESHOLD_DAYS {
        Term::Long
    } else {
        Term::Short
    }
}

/// Parse the whole file. Any bad row fails the import; nothing is partial.
pub fn parse_realized_gains(bytes: &[u8]) -> Result<ParsedImport> {
    let file_sha256 = hex::encode(Sha256::digest(bytes));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let mut by_tax_year: BTreeMap<i32, YearChange> = BTreeMap::new();
    let mut rows = 0i64;

    for (i, record) in reader.records().enumerate() {
        // 1-based, counting the header as row 1.
        let row = i + 2;
        let record = record.with_context(|| format!("row {row}: malformed CSV"))?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let field = |idx: usize| {
            record
                .get(idx)
                .ok_or_else(|| anyhow!("row {row}: missing column {idx}"))
        };

        let sold = parse_date(field(COL_SOLD)?, "sold", row)?;
        let acquired = parse_date(field(COL_ACQUIRED)?, "acquired", row)?;
        if sold < acquired {
            bail!("row {row}: sold {sold} before acquired {acquired}");
        }
        let gain = Cents::parse_decimal(field(COL_GAIN)?)
            .with_context(|| format!("row {row}: invalid gain/loss amount"))?;

        let entry = by_tax_year.entry(sold.year()).or_default();
        let overflow = || anyhow!("row {row}: running total overflows");
        entry.net = entry.net.checked_add(gain).ok_or_else(overflow)?;
        match holding_term(acquired, sold) {
            Term::Short => {
                entry.short_term = entry.short_term.checked_add(gain).ok_or_else(overflow)?
            }
            Term::Long => entry.long_term = entry.long_term.checked_add(gain).ok_or_else(overflow)?,
        }
        rows += 1;
    }

    if rows == 0 {
        bail!("no data rows in file");
    }

    Ok(ParsedImport {
        file_sha256,
        rows,
        by_tax_year,
    })
}
