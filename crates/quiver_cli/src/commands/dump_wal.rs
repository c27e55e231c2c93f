//! Dump WAL command implementation.

use super::{CliError, OutputFormat};
use quiver_core::{cjson_viewer, read_journal, CoreResult, WalRecord};
use serde_json::json;
use std::path::Path;
use tracing::warn;

/// One journal entry prepared for output.
#[derive(Debug)]
pub struct JournalEntry {
    /// Position in the journal.
    pub index: usize,
    /// Namespace the record belongs to.
    pub ns_name: String,
    /// LSN assigned by the writing namespace.
    pub origin_lsn: String,
    /// Upstream LSN, if the update was applied from elsewhere.
    pub upstream_lsn: Option<String>,
    /// The decoded record.
    pub record: WalRecord,
}

/// Runs the dump-wal command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    namespace: Option<&str>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(CliError::JournalNotFound(path.display().to_string()).into());
    }
    let (entries, truncated) = load_entries(path, limit, namespace)?;
    if truncated > 0 {
        warn!(bytes = truncated, "journal ends with a torn frame");
    }

    let viewer = cjson_viewer();
    match format {
        OutputFormat::Json => {
            let out: Vec<_> = entries
                .iter()
                .map(|e| {
                    json!({
                        "index": e.index,
                        "namespace": e.ns_name,
                        "lsn": e.origin_lsn,
                        "upstream_lsn": e.upstream_lsn,
                        "record": e.record.to_json(&viewer),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Journal Records ({} shown)", entries.len());
            println!("================");
            println!();
            for e in &entries {
                print!("[{:08}] {:<16} lsn={}", e.index, e.ns_name, e.origin_lsn);
                if let Some(upstream) = &e.upstream_lsn {
                    print!(" upstream={}", upstream);
                }
                println!(" {}", e.record.dump(&viewer));
            }
        }
    }
    Ok(())
}

/// Reads the journal and keeps the entries that pass the filters.
///
/// Returns the entries and the number of bytes dropped from a torn tail.
pub fn load_entries(
    path: &Path,
    limit: Option<usize>,
    namespace: Option<&str>,
) -> CoreResult<(Vec<JournalEntry>, u64)> {
    let contents = read_journal(path)?;
    let max = limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();

    for (index, shared) in contents.records.iter().enumerate() {
        if entries.len() >= max {
            break;
        }
        let view = shared.unpack()?;
        if namespace.is_some_and(|ns| ns != view.ns_name) {
            continue;
        }
        entries.push(JournalEntry {
            index,
            ns_name: view.ns_name.to_string(),
            origin_lsn: view.origin_lsn.to_string(),
            upstream_lsn: (!view.upstream_lsn.is_empty()).then(|| view.upstream_lsn.to_string()),
            record: view.record()?,
        });
    }
    Ok((entries, contents.truncated_tail))
}
