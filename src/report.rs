//! Report writers for the command line front end
//!
//! Listings are CSV with one row per walked entry. Hash matches are JSON
//! Lines, flushed per match so a long scan can be followed with `tail -f`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{EvidenceError, EvidenceResult};
use crate::evidence::{HashMatch, Volume};
use crate::filesystem::EntryKind;
use crate::walker::WalkEntry;

pub const LISTING_HEADERS: [&str; 9] = [
    "Partition",
    "File",
    "File Ext",
    "File Type",
    "Create Date",
    "Modify Date",
    "Change Date",
    "Size",
    "File Path",
];

/// `YYYY-MM-DD HH:MM:SS` in UTC, or empty when the time is not recorded
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn kind_label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Directory => "DIR",
        EntryKind::File => "FILE",
        EntryKind::Other => "OTHER",
    }
}

#[derive(Serialize)]
struct ListingRow<'a> {
    partition: String,
    file: &'a str,
    extension: String,
    file_type: &'static str,
    created: String,
    modified: String,
    changed: String,
    size: u64,
    path: &'a str,
}

/// Streaming CSV metadata listing
pub struct ListingWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl ListingWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> EvidenceResult<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> ListingWriter<W> {
    /// Wrap `inner` and write the header row
    pub fn new(inner: W) -> EvidenceResult<Self> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(inner);
        writer.write_record(LISTING_HEADERS)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn write_entry(&mut self, volume: &Volume, item: &WalkEntry) -> EvidenceResult<()> {
        let entry = &item.entry;
        let extension = if entry.is_file() { entry.extension() } else { String::new() };
        self.writer.serialize(ListingRow {
            partition: format!("PARTITION {}", volume.label()),
            file: &entry.name,
            extension,
            file_type: kind_label(entry.kind),
            created: format_time(entry.times.created),
            modified: format_time(entry.times.modified),
            changed: format_time(entry.times.changed),
            size: entry.size,
            path: &item.path,
        })?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and return the inner writer
    pub fn finish(mut self) -> EvidenceResult<W> {
        self.writer.flush()?;
        self.writer
            .into_inner()
            .map_err(|e| EvidenceError::Io(e.into_error()))
    }
}

/// Hash matches as JSON Lines
pub struct MatchWriter<W: Write> {
    inner: W,
}

impl MatchWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> EvidenceResult<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> MatchWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_match(&mut self, found: &HashMatch) -> EvidenceResult<()> {
        serde_json::to_writer(&mut self.inner, found)?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
