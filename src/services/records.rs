//! JSON-Lines persistence for fingerprint tables and match results.

use crate::config::MatchConfig;
use crate::core::engine::{MatchQuality, MatchRecord};
use crate::core::fingerprint::CorpusEntry;
use crate::error::{ConfigError, RecordError};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RecordError + '_ {
    move |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<(), RecordError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut out = BufWriter::new(file);
    for item in items {
        writeln!(out, "{}", serde_json::to_string(item)?).map_err(io_err(path))?;
    }
    out.flush().map_err(io_err(path))
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, RecordError> {
    let file = File::open(path).map_err(io_err(path))?;
    let mut items = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line).map_err(|source| RecordError::Malformed {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        items.push(item);
    }
    Ok(items)
}

/// Persist a fingerprint table, one entry per line.
pub fn write_entries(path: &Path, entries: &[CorpusEntry]) -> Result<(), RecordError> {
    write_jsonl(path, entries)
}

/// Load a fingerprint table, checking every row against `bit_width`.
pub fn read_entries(path: &Path, bit_width: usize) -> Result<Vec<CorpusEntry>, RecordError> {
    let entries: Vec<CorpusEntry> = read_jsonl(path)?;
    if let Some(bad) = entries
        .iter()
        .find(|e| e.fingerprint.bit_width() != bit_width)
    {
        return Err(ConfigError::BitWidthMismatch {
            expected: bit_width,
            found: bad.fingerprint.bit_width(),
            id: bad.id.clone(),
        }
        .into());
    }
    Ok(entries)
}

/// Persistence sink for match results.
pub fn write_records(path: &Path, records: &[MatchRecord]) -> Result<(), RecordError> {
    write_jsonl(path, records)
}

pub fn read_records(path: &Path) -> Result<Vec<MatchRecord>, RecordError> {
    read_jsonl(path)
}

/// Aggregate counts for one matching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub config: MatchConfig,
    pub references: usize,
    pub queries: usize,
    pub matched: usize,
    pub used_similarity: usize,
    pub confirmed: usize,
    pub weak: usize,
    pub unconfirmed: usize,
    pub unmatched: usize,
    pub skipped_images: usize,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn from_records(
        config: &MatchConfig,
        references: usize,
        records: &[MatchRecord],
        skipped_images: usize,
        elapsed_secs: f64,
    ) -> Self {
        let count = |quality: MatchQuality| records.iter().filter(|r| r.quality == quality).count();
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            config: config.clone(),
            references,
            queries: records.len(),
            matched: records.iter().filter(|r| r.reference_id.is_some()).count(),
            used_similarity: records.iter().filter(|r| r.used_similarity).count(),
            confirmed: count(MatchQuality::Confirmed),
            weak: count(MatchQuality::Weak),
            unconfirmed: count(MatchQuality::Unconfirmed),
            unmatched: count(MatchQuality::None),
            skipped_images,
            elapsed_secs,
        }
    }

    /// Append this summary as one JSON line.
    pub fn append_to(&self, path: &Path) -> Result<(), RecordError> {
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err(path))?;
        writeln!(out, "{}", serde_json::to_string(self)?).map_err(io_err(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::Fingerprint;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn entry(id: &str, hex: &str, bits: usize) -> CorpusEntry {
        CorpusEntry {
            id: id.to_string(),
            path: PathBuf::from(format!("/data/{id}")),
            fingerprint: Fingerprint::from_hex(hex, bits).unwrap(),
        }
    }

    fn record(query: &str, reference: Option<&str>, quality: MatchQuality) -> MatchRecord {
        MatchRecord {
            query_id: query.to_string(),
            query_path: PathBuf::from(query),
            reference_id: reference.map(str::to_string),
            reference_path: reference.map(PathBuf::from),
            hamming_distance: reference.map(|_| 3),
            similarity: matches!(quality, MatchQuality::Confirmed | MatchQuality::Weak)
                .then_some(0.8),
            used_similarity: matches!(quality, MatchQuality::Confirmed | MatchQuality::Weak),
            quality,
        }
    }

    #[test]
    fn test_entry_table_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hashes.jsonl");
        let entries = vec![entry("a.jpg", "00ff", 16), entry("b.jpg", "abcd", 16)];

        write_entries(&path, &entries).unwrap();
        let first_line = fs::read_to_string(&path).unwrap();
        let expected = r#"{"id":"a.jpg","path":"/data/a.jpg","hash":{"bits":16,"hex":"00ff"}}"#;
        assert!(first_line.starts_with(expected));

        assert_eq!(read_entries(&path, 16).unwrap(), entries);
    }

    #[test]
    fn test_read_entries_rejects_width_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hashes.jsonl");
        write_entries(&path, &[entry("a.jpg", "00ff", 16)]).unwrap();

        let err = read_entries(&path, 64).unwrap_err();
        assert!(matches!(
            err,
            RecordError::Config(ConfigError::BitWidthMismatch { .. })
        ));
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hashes.jsonl");
        fs::write(
            &path,
            "{\"id\":\"a\",\"path\":\"a\",\"hash\":{\"bits\":8,\"hex\":\"00\"}}\n\nnot json\n",
        )
        .unwrap();

        let err = read_entries(&path, 8).unwrap_err();
        assert!(matches!(err, RecordError::Malformed { line: 3, .. }));
    }

    #[test]
    fn test_records_and_summary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("matches.jsonl");
        let records = vec![
            record("q1", Some("r1"), MatchQuality::Confirmed),
            record("q2", Some("r1"), MatchQuality::Weak),
            record("q3", Some("r2"), MatchQuality::Unconfirmed),
            record("q4", None, MatchQuality::None),
        ];

        write_records(&path, &records).unwrap();
        assert_eq!(read_records(&path).unwrap(), records);

        let summary = RunSummary::from_records(&MatchConfig::default(), 2, &records, 1, 0.5);
        assert_eq!(summary.queries, 4);
        assert_eq!(summary.matched, 3);
        assert_eq!(summary.used_similarity, 2);
        assert_eq!(
            (summary.confirmed, summary.weak, summary.unconfirmed, summary.unmatched),
            (1, 1, 1, 1)
        );

        let summary_path = temp_dir.path().join("matches.summary.jsonl");
        summary.append_to(&summary_path).unwrap();
        summary.append_to(&summary_path).unwrap();
        let lines = fs::read_to_string(&summary_path).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }
}
