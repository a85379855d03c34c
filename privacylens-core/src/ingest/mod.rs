//! Ingestion layer for App Privacy Report exports
//!
//! This module turns raw export text (Layer 0) into canonical database
//! records (Layer 1).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Report export  │ ──► │     Importer     │ ──► │    Database     │
//! │ (.ndjson/.json) │     │                  │     │ (access/domain) │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │ ParseState::detect   │  one line at a time
//!                    │   └─ normalize_*     │  canonical records
//!                    └──────────────────────┘
//! ```
//!
//! The whole file is parsed before anything is written, so a malformed line
//! never touches the store. The write phase runs in one transaction: a record
//! the store refuses (a duplicate key) rolls back to the previous import and
//! is reported against the export line it came from.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use privacylens_core::{Config, Database, Importer};
//!
//! let db = Database::open(&Config::load()?.database_path())?;
//! db.migrate()?;
//! let summary = Importer::new(&db).import_path(Path::new("App_Privacy_Report.ndjson"))?;
//! println!("{} access records, {} domains", summary.access_records, summary.domain_records);
//! ```

pub mod detect;
pub mod normalize;

pub use detect::{Detected, ParseState};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{AccessRecord, DomainRecord, ImportRecord};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Extensions accepted for report files.
pub const REPORT_EXTENSIONS: &[&str] = &["json", "ndjson"];

/// Canonical records of one export, not yet stored.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedReport {
    pub access: Vec<AccessRecord>,
    pub domains: Vec<DomainRecord>,
    /// Where each entry of `domains` was read, index for index
    pub domain_origins: Vec<RecordOrigin>,
}

/// The export text a record was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOrigin {
    /// 1-based line; the opening `{` line for legacy tail records
    pub line: usize,
    pub content: String,
}

impl ParsedReport {
    /// Origin of the `index`-th record of `table` in `text`.
    fn origin(&self, text: &str, table: &str, index: usize) -> Option<RecordOrigin> {
        match table {
            "access" => {
                let line = self.access.get(index)?.line_number;
                let content = text.lines().nth(line.checked_sub(1)?)?;
                Some(RecordOrigin {
                    line,
                    content: content.to_string(),
                })
            }
            _ => self.domain_origins.get(index).cloned(),
        }
    }
}

/// Result of importing one report.
#[derive(Debug, Clone)]
pub struct ImportSummary {
    /// File identifier the rows were stored under
    pub source_file: String,
    /// Access rows written
    pub access_records: usize,
    /// Domain rows written
    pub domain_records: usize,
    /// Access rows removed from a previous import of the same file
    pub replaced_access: usize,
    /// Domain rows removed from a previous import of the same file
    pub replaced_domain: usize,
    /// Hex SHA-256 of the imported text
    pub content_sha256: String,
}

/// Result of importing several reports.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub imported: Vec<ImportSummary>,
    /// Errors encountered (file path → error message)
    pub errors: Vec<(PathBuf, String)>,
}

/// Parse a whole export into canonical records.
///
/// Fails on the first malformed line; the error names the 1-based line
/// number and its content.
pub fn parse_report(text: &str) -> Result<ParsedReport> {
    let lines: Vec<&str> = text.lines().collect();
    let mut report = ParsedReport::default();
    let mut state = ParseState::default();

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;
        let at_line = |e: Error| e.at_line(line_number, line);

        let (next, detected) = state.detect(line).map_err(at_line)?;
        state = next;

        match detected {
            Detected::Blank | Detected::Metadata(_) | Detected::EndOfSection => {}
            Detected::Access(access) => {
                report
                    .access
                    .push(normalize::normalize_access(line_number, access).map_err(at_line)?);
            }
            Detected::Domain(domain) => {
                report
                    .domains
                    .push(normalize::normalize_domain(domain).map_err(at_line)?);
                report.domain_origins.push(RecordOrigin {
                    line: line_number,
                    content: line.to_string(),
                });
            }
            Detected::LegacyTail => {
                let tail = lines[idx..].join("\n");
                for (bundle_id, record, rendered) in
                    detect::parse_legacy_tail(&tail).map_err(at_line)?
                {
                    report.domains.push(
                        normalize::normalize_legacy_domain(&bundle_id, record).map_err(at_line)?,
                    );
                    report.domain_origins.push(RecordOrigin {
                        line: line_number,
                        content: rendered,
                    });
                }
                break;
            }
        }
    }

    Ok(report)
}

/// Derive a file identifier from a report path.
///
/// The file name must be `[A-Za-z0-9_-]+` followed by `.json` or `.ndjson`;
/// the identifier is the stem.
pub fn file_id_from_path(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidFileName(path.display().to_string()))?;

    let (stem, extension) = name
        .rsplit_once('.')
        .ok_or_else(|| Error::InvalidFileName(name.to_string()))?;

    if !REPORT_EXTENSIONS.contains(&extension) || !is_valid_file_id(stem) {
        return Err(Error::InvalidFileName(name.to_string()));
    }
    Ok(stem.to_string())
}

/// File identifiers are non-empty runs of ASCII letters, digits, `_` and `-`.
pub fn is_valid_file_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Find report files directly inside `dir`, sorted by path.
pub fn discover_reports(dir: &Path) -> Result<Vec<PathBuf>> {
    let root = glob::Pattern::escape(&dir.to_string_lossy());
    let mut found = Vec::new();

    for extension in REPORT_EXTENSIONS {
        let pattern = format!("{}/*.{}", root, extension);
        let entries = glob::glob(&pattern).map_err(|e| {
            Error::InvalidFileName(format!("invalid glob pattern {}: {}", pattern, e))
        })?;
        for entry in entries {
            let path = entry.map_err(std::io::Error::from)?;
            if path.is_file() {
                found.push(path);
            }
        }
    }

    found.sort();
    tracing::debug!(dir = %dir.display(), count = found.len(), "Discovered reports");
    Ok(found)
}

/// Imports report exports into the canonical store.
///
/// Each import replaces everything previously stored under the same file
/// identifier.
pub struct Importer<'a> {
    db: &'a Database,
}

impl<'a> Importer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Import one export's text under `file_id`.
    pub fn import_report_file(&self, text: &str, file_id: &str) -> Result<ImportSummary> {
        if !is_valid_file_id(file_id) {
            return Err(Error::InvalidFileName(file_id.to_string()));
        }

        let report = parse_report(text)?;
        tracing::debug!(
            file = %file_id,
            access = report.access.len(),
            domains = report.domains.len(),
            "Parsed report"
        );

        let content_sha256 = hex::encode(Sha256::digest(text.as_bytes()));
        let ledger = ImportRecord {
            source_file: file_id.to_string(),
            content_sha256: content_sha256.clone(),
            access_count: report.access.len(),
            domain_count: report.domains.len(),
            imported_at: Utc::now(),
        };

        let (replaced_access, replaced_domain) = self
            .db
            .replace_file(file_id, &report.access, &report.domains, &ledger)
            .map_err(|e| match e {
                Error::RecordRejected {
                    table,
                    index,
                    message,
                } => match report.origin(text, table, index) {
                    Some(origin) => Error::Parse {
                        line: origin.line,
                        message: format!("{} record rejected by the store: {}", table, message),
                        content: origin.content,
                    },
                    None => Error::RecordRejected {
                        table,
                        index,
                        message,
                    },
                },
                other => other,
            })?;

        tracing::info!(
            file = %file_id,
            access = report.access.len(),
            domains = report.domains.len(),
            replaced_access,
            replaced_domain,
            "Imported report"
        );

        Ok(ImportSummary {
            source_file: file_id.to_string(),
            access_records: report.access.len(),
            domain_records: report.domains.len(),
            replaced_access,
            replaced_domain,
            content_sha256,
        })
    }

    /// Read and import a report file; the identifier comes from its name.
    pub fn import_path(&self, path: &Path) -> Result<ImportSummary> {
        let file_id = file_id_from_path(path)?;
        let text = std::fs::read_to_string(path)?;
        self.import_report_file(&text, &file_id)
    }

    /// Import several files, continuing past failures.
    ///
    /// The callback receives `(current_file_index, total_files, file_path)`
    /// before each file is processed.
    pub fn import_paths_with_progress<F>(&self, paths: &[PathBuf], mut on_progress: F) -> BatchResult
    where
        F: FnMut(usize, usize, &Path),
    {
        let total = paths.len();
        let mut result = BatchResult::default();

        for (i, path) in paths.iter().enumerate() {
            on_progress(i, total, path);

            match self.import_path(path) {
                Ok(summary) => result.imported.push(summary),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Import failed");
                    result.errors.push((path.clone(), e.to_string()));
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessGeneration, DomainGeneration};

    #[test]
    fn test_file_id_from_path() {
        assert_eq!(
            file_id_from_path(Path::new("/tmp/App_Privacy_Report-2021.ndjson")).unwrap(),
            "App_Privacy_Report-2021"
        );
        assert_eq!(file_id_from_path(Path::new("report.json")).unwrap(), "report");
        assert!(file_id_from_path(Path::new("report.txt")).is_err());
        assert!(file_id_from_path(Path::new("my report.ndjson")).is_err());
        assert!(file_id_from_path(Path::new(".ndjson")).is_err());
        assert!(file_id_from_path(Path::new("report.v2.json")).is_err());
    }

    #[test]
    fn test_parse_report_mixed_generations() {
        let text = concat!(
            r#"{"version":3,"recordType":"access","exportTimestamp":"2021-06-25T09:51:51.222-05:00","_marker":"<metadata>"}"#,
            "\n",
            r#"{"accessor":{"identifier":"com.example.app","identifierType":"bundleID"},"category":"photos","identifier":"A1","kind":"intervalBegin","timestamp":"2021-06-25T09:00:00.000-05:00"}"#,
            "\n\n",
            r#"{"recordType":"networkActivity","_marker":"<metadata>","exportTimestamp":"2021-06-25T09:51:51.767-05:00","version":1}"#,
            "\n",
            r#"{"domain":"example.com","firstTimeStamp":"2021-06-18T05:55:10.417-05:00","domainType":2,"timeStamp":"2021-06-23T04:02:13.891-05:00","context":"","initiatedType":"AppInitiated","hits":7,"domainOwner":"","bundleID":"com.example.app"}"#,
            "\n",
        );
        let report = parse_report(text).unwrap();

        assert_eq!(report.access.len(), 1);
        assert_eq!(report.access[0].line_number, 2);
        assert_eq!(report.access[0].generation, AccessGeneration::V2);
        assert_eq!(report.domains.len(), 1);
        assert_eq!(report.domains[0].generation, DomainGeneration::V2);
        assert_eq!(report.domains[0].timestamp.as_str(), "2021-06-23T09:02:13.891Z");
        assert_eq!(report.domain_origins.len(), 1);
        assert_eq!(report.domain_origins[0].line, 5);
        assert!(report.domain_origins[0].content.contains("example.com"));
    }

    #[test]
    fn test_parse_report_error_names_line() {
        let text = concat!(
            r#"{"_marker":"<end-of-section>"}"#,
            "\n",
            r#"{"type":"access","oops":1}"#,
            "\n",
        );
        match parse_report(text) {
            Err(Error::Parse { line, content, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(content, r#"{"type":"access","oops":1}"#);
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_import_rejects_bad_file_id() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let err = Importer::new(&db)
            .import_report_file("", "../escape")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFileName(_)));
    }

    #[test]
    fn test_discover_reports() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.ndjson"), "").unwrap();
        std::fs::write(dir.path().join("a.json"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let found = discover_reports(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.ndjson"]);
    }
}
