//! Inspect command implementation.

use super::{CliError, OutputFormat};
use quiver_core::read_journal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Journal summary.
#[derive(Debug, Default, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Bytes holding complete frames.
    pub valid_len: u64,
    /// Bytes of a torn final frame.
    pub truncated_tail: u64,
    /// Number of records.
    pub record_count: usize,
    /// Per-namespace statistics.
    pub namespaces: BTreeMap<String, NamespaceSummary>,
}

/// Statistics for one namespace in the journal.
#[derive(Debug, Default, Serialize)]
pub struct NamespaceSummary {
    /// Number of records.
    pub records: usize,
    /// Records per kind.
    pub kinds: BTreeMap<String, usize>,
    /// Highest LSN seen.
    pub last_lsn: String,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(CliError::JournalNotFound(path.display().to_string()).into());
    }
    let result = inspect(path)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

/// Builds the summary of the journal at `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let contents = read_journal(path)?;
    let mut result = InspectResult {
        path: path.display().to_string(),
        file_size: std::fs::metadata(path)?.len(),
        valid_len: contents.valid_len,
        truncated_tail: contents.truncated_tail,
        record_count: contents.records.len(),
        ..InspectResult::default()
    };

    for shared in &contents.records {
        let view = shared.unpack()?;
        let kind = view.record()?.record_type().name().to_string();
        let summary = result
            .namespaces
            .entry(view.ns_name.to_string())
            .or_default();
        summary.records += 1;
        *summary.kinds.entry(kind).or_default() += 1;
        summary.last_lsn = view.origin_lsn.to_string();
    }
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Journal: {}", result.path);
    println!("================");
    println!("Size:      {} bytes", result.file_size);
    println!("Valid:     {} bytes", result.valid_len);
    if result.truncated_tail > 0 {
        println!("Torn tail: {} bytes", result.truncated_tail);
    }
    println!("Records:   {}", result.record_count);

    for (name, summary) in &result.namespaces {
        println!();
        println!("{} ({} records, last lsn {})", name, summary.records, summary.last_lsn);
        for (kind, count) in &summary.kinds {
            println!("  {:<20} {}", kind, count);
        }
    }
}
