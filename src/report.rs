//! Report Module
//!
//! Renders merged time ranges for people (plain text) and for tools (JSON).

use crate::error::ScanResult;
use crate::pii_detector::PiiCategory;
use crate::range_merger::TimeRange;
use log::info;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
struct Summary {
    range_count: usize,
    email_count: usize,
    password_count: usize,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    source: &'a Path,
    summary: Summary,
    ranges: &'a [TimeRange],
}

/// Distinct values of one category, in the order they were first seen.
fn unique_values(range: &TimeRange, category: PiiCategory) -> Vec<&str> {
    let mut seen = HashSet::new();
    range
        .values(category)
        .filter(|value| seen.insert(*value))
        .collect()
}

/// Renders every range as a header line plus one line per non-empty category.
///
/// Values are de-duplicated for display only.
pub fn render_text(ranges: &[TimeRange]) -> String {
    let mut out = String::new();
    for range in ranges {
        // `{:?}` keeps a fractional part on whole seconds ("2.0", not "2").
        let _ = writeln!(out, "From {:?} to {:?} seconds, found:", range.start, range.end);

        let emails = unique_values(range, PiiCategory::Email);
        if !emails.is_empty() {
            let _ = writeln!(out, "  Emails: {}", emails.join(", "));
        }
        let passwords = unique_values(range, PiiCategory::Password);
        if !passwords.is_empty() {
            let _ = writeln!(out, "  Passwords: {}", passwords.join(", "));
        }
    }
    out
}

/// Writes the full ranges, duplicates included, as pretty-printed JSON.
pub fn write_json(output_path: &Path, source: &Path, ranges: &[TimeRange]) -> ScanResult<()> {
    let count = |category| {
        ranges
            .iter()
            .map(|r| r.values(category).count())
            .sum::<usize>()
    };
    let report = JsonReport {
        source,
        summary: Summary {
            range_count: ranges.len(),
            email_count: count(PiiCategory::Email),
            password_count: count(PiiCategory::Password),
        },
        ranges,
    };

    if let Some(parent_dir) = output_path.parent() {
        if !parent_dir.as_os_str().is_empty() {
            fs::create_dir_all(parent_dir)?;
        }
    }
    fs::write(output_path, serde_json::to_string_pretty(&report)?)?;
    info!("Wrote JSON report to {:?}", output_path);
    Ok(())
}
