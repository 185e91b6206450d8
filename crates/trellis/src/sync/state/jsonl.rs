//! JSONL snapshots of sync state.
//!
//! A snapshot holds one JSON object per line, tagged by `kind`:
//!
//! ```text
//! {"kind":"record","key":{"project":"acme/app","issue":"7"},"dirty":true,...}
//! {"kind":"timeline","key":{"project":"acme/app","issue":"7"},"attempts":0,...}
//! {"kind":"event","project":"acme/app","remote_event_id":"ev-1",...}
//! ```
//!
//! Writes go to a `.tmp` sibling first, are synced to disk and then renamed
//! into place, so a crash or power loss mid-write leaves the previous
//! snapshot intact. Reads are resilient:
//! lines that fail to parse are skipped and reported as [`LoadWarning`]s.

use super::{RemoteIssueRecord, TimelineCacheEntry, TimelineEventRecord};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

/// One line of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub(crate) enum StateLine {
    Record(RemoteIssueRecord),
    Timeline(TimelineCacheEntry),
    Event(TimelineEventRecord),
}

/// Non-fatal problems found while loading a snapshot.
///
/// The offending line is skipped; everything else still loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// A line was not valid JSON, or not a known record kind
    MalformedLine {
        /// 1-based line number
        line_number: usize,
        /// Parser error
        error: String,
    },
}

/// Write `lines` to `path` atomically.
pub(crate) async fn write_snapshot(path: &Path, lines: &[StateLine]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path).await?;
    let mut writer = BufWriter::new(file);

    for line in lines {
        let json = serde_json::to_string(line)
            .map_err(|e| Error::Storage(format!("JSON serialization failed: {e}")))?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;
    writer.get_ref().sync_all().await?;

    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

/// Read a snapshot, skipping lines that don't parse.
pub(crate) async fn read_snapshot(path: &Path) -> Result<(Vec<StateLine>, Vec<LoadWarning>)> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file).lines();

    let mut lines = Vec::new();
    let mut warnings = Vec::new();
    let mut line_number = 0;

    while let Some(raw) = reader.next_line().await? {
        line_number += 1;
        if raw.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StateLine>(&raw) {
            Ok(line) => lines.push(line),
            Err(e) => warnings.push(LoadWarning::MalformedLine {
                line_number,
                error: e.to_string(),
            }),
        }
    }

    Ok((lines, warnings))
}
