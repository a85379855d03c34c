//! Database repository layer
//!
//! Provides clear, insert and scan operations for the canonical tables and
//! the facet queries the summarizer and CLI build on.

use crate::error::{Error, Result};
use crate::ingest::normalize::stream_display;
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        tracing::debug!(path = %path.display(), "Opened database");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.lock()
    }

    // Recovers the guard if a previous holder panicked
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================
    // Access operations
    // ============================================

    /// Delete every access row of a file. Returns the number removed.
    pub fn clear_access(&self, file: &str) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM access WHERE source_file = ?1", [file])?;
        Ok(removed)
    }

    /// Insert one access record. Fails if the `(file, line)` key already exists.
    pub fn insert_access(&self, file: &str, record: &AccessRecord) -> Result<()> {
        insert_access_row(&self.lock(), file, record)
    }

    /// All access records of a file in line order
    pub fn scan_access(&self, file: &str) -> Result<Vec<AccessRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM access WHERE source_file = ?1 ORDER BY line",
        )?;
        let records = stmt
            .query_map([file], Self::row_to_access)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn row_to_access(row: &Row) -> rusqlite::Result<AccessRecord> {
        let line: i64 = row.get("line")?;
        let kind: String = row.get("kind")?;

        Ok(AccessRecord {
            line_number: line as usize,
            stream: row.get("stream")?,
            tcc_service: row.get("tcc_service")?,
            category: row.get("category")?,
            accessor_id: row.get("accessor_id")?,
            accessor_id_type: row.get("accessor_id_type")?,
            kind: AccessKind::parse(&kind),
            session_id: row.get("session_id")?,
            timestamp: timestamp_column(row, "timestamp")?,
            format_version: row.get("format_version")?,
            out_of_process: row.get("out_of_process")?,
            generation: parsed_column(row, "generation")?,
        })
    }

    // ============================================
    // Domain operations
    // ============================================

    /// Delete every domain row of a file. Returns the number removed.
    pub fn clear_domain(&self, file: &str) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM domain WHERE source_file = ?1", [file])?;
        Ok(removed)
    }

    /// Insert one domain record. Fails if its natural key already exists in the file.
    pub fn insert_domain(&self, file: &str, record: &DomainRecord) -> Result<()> {
        insert_domain_row(&self.lock(), file, record)
    }

    /// All domain records of a file, most recent contact first
    pub fn scan_domain(&self, file: &str) -> Result<Vec<DomainRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM domain WHERE source_file = ?1
            ORDER BY timestamp DESC, bundle_id, domain
            "#,
        )?;
        let records = stmt
            .query_map([file], Self::row_to_domain)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn row_to_domain(row: &Row) -> rusqlite::Result<DomainRecord> {
        Ok(DomainRecord {
            bundle_id: row.get("bundle_id")?,
            domain: row.get("domain")?,
            context: row.get("context")?,
            initiated_type: row.get("initiated_type")?,
            domain_type: row.get("domain_type")?,
            timestamp: timestamp_column(row, "timestamp")?,
            first_timestamp: timestamp_column(row, "first_timestamp")?,
            hits: row.get("hits")?,
            domain_owner: row.get("domain_owner")?,
            effective_user_id: row.get("effective_user_id")?,
            has_app_bundle_name: row.get("has_app_bundle_name")?,
            generation: parsed_column(row, "generation")?,
        })
    }

    // ============================================
    // Facet queries
    // ============================================

    /// Every file that has at least one access or domain row
    pub fn list_files(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT source_file FROM access
            UNION
            SELECT source_file FROM domain
            ORDER BY source_file
            "#,
        )?;
        let files = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(files)
    }

    /// Distinct UTC days with any record in the file, newest first
    pub fn list_dates(&self, file: &str) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT substr(timestamp, 1, 10) AS day FROM access WHERE source_file = ?1
            UNION
            SELECT substr(timestamp, 1, 10) AS day FROM domain WHERE source_file = ?1
            ORDER BY day DESC
            "#,
        )?;
        let dates = stmt
            .query_map([file], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(dates)
    }

    /// Distinct app identifiers across access and domain rows, ascending
    pub fn list_bundle_ids(&self, file: &str) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT accessor_id AS bundle_id FROM access WHERE source_file = ?1
            UNION
            SELECT bundle_id FROM domain WHERE source_file = ?1
            ORDER BY bundle_id
            "#,
        )?;
        let ids = stmt
            .query_map([file], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Distinct display streams of the file's access records, ascending
    pub fn list_access_types(&self, file: &str) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category, stream, tcc_service FROM access WHERE source_file = ?1",
        )?;
        let rows = stmt.query_map([file], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut types = BTreeSet::new();
        for row in rows {
            let (category, stream, tcc_service) = row?;
            types.insert(stream_display(
                category.as_deref(),
                stream.as_deref(),
                tcc_service.as_deref(),
            ));
        }
        Ok(types.into_iter().collect())
    }

    /// Whether the file has any domain rows
    pub fn has_domains(&self, file: &str) -> Result<bool> {
        let conn = self.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM domain WHERE source_file = ?1)",
            [file],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // ============================================
    // Import ledger
    // ============================================

    /// Insert or replace the ledger row for a file
    pub fn record_import(&self, record: &ImportRecord) -> Result<()> {
        upsert_import_row(&self.lock(), record)
    }

    // ============================================
    // Whole-file replacement
    // ============================================

    /// Replace everything stored for a file in one transaction.
    ///
    /// Clears the file's access and domain rows, inserts the new records and
    /// writes the ledger row. On any failure the transaction is rolled back
    /// and the previous import is left as it was. A record the store refuses
    /// comes back as [`Error::RecordRejected`] with its position in the batch.
    ///
    /// Returns the number of access and domain rows removed.
    pub fn replace_file(
        &self,
        file: &str,
        access: &[AccessRecord],
        domains: &[DomainRecord],
        ledger: &ImportRecord,
    ) -> Result<(usize, usize)> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let replaced_access = tx.execute("DELETE FROM access WHERE source_file = ?1", [file])?;
        let replaced_domain = tx.execute("DELETE FROM domain WHERE source_file = ?1", [file])?;

        for (index, record) in access.iter().enumerate() {
            insert_access_row(&tx, file, record).map_err(|e| rejected("access", index, e))?;
        }
        for (index, record) in domains.iter().enumerate() {
            insert_domain_row(&tx, file, record).map_err(|e| rejected("domain", index, e))?;
        }
        upsert_import_row(&tx, ledger)?;

        tx.commit()?;
        Ok((replaced_access, replaced_domain))
    }

    /// Get the ledger row for a file
    pub fn get_import(&self, file: &str) -> Result<Option<ImportRecord>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM imports WHERE source_file = ?1",
            [file],
            Self::row_to_import,
        )
        .optional()
        .map_err(Error::from)
    }

    /// All ledger rows, most recent import first
    pub fn list_imports(&self) -> Result<Vec<ImportRecord>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM imports ORDER BY imported_at DESC, source_file")?;
        let records = stmt
            .query_map([], Self::row_to_import)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn row_to_import(row: &Row) -> rusqlite::Result<ImportRecord> {
        let access_count: i64 = row.get("access_count")?;
        let domain_count: i64 = row.get("domain_count")?;
        let imported_at_str: String = row.get("imported_at")?;

        Ok(ImportRecord {
            source_file: row.get("source_file")?,
            content_sha256: row.get("content_sha256")?,
            access_count: access_count as usize,
            domain_count: domain_count as usize,
            imported_at: DateTime::parse_from_rfc3339(&imported_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(row, "imported_at", e))?,
        })
    }
}

fn insert_access_row(conn: &Connection, file: &str, record: &AccessRecord) -> Result<()> {
    let affected = conn.execute(
        r#"
        INSERT INTO access (source_file, line, stream, tcc_service, category,
                            accessor_id, accessor_id_type, session_id, kind, timestamp,
                            format_version, out_of_process, generation)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            file,
            record.line_number as i64,
            record.stream,
            record.tcc_service,
            record.category,
            record.accessor_id,
            record.accessor_id_type,
            record.session_id,
            record.kind.as_str(),
            record.timestamp.as_str(),
            record.format_version,
            record.out_of_process,
            record.generation.as_str(),
        ],
    )?;
    expect_one_row("access", affected)
}

fn insert_domain_row(conn: &Connection, file: &str, record: &DomainRecord) -> Result<()> {
    let affected = conn.execute(
        r#"
        INSERT INTO domain (source_file, bundle_id, domain, context, initiated_type,
                            domain_type, timestamp, first_timestamp, hits, domain_owner,
                            effective_user_id, has_app_bundle_name, generation)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            file,
            record.bundle_id,
            record.domain,
            record.context,
            record.initiated_type,
            record.domain_type,
            record.timestamp.as_str(),
            record.first_timestamp.as_str(),
            record.hits,
            record.domain_owner,
            record.effective_user_id,
            record.has_app_bundle_name,
            record.generation.as_str(),
        ],
    )?;
    expect_one_row("domain", affected)
}

fn upsert_import_row(conn: &Connection, record: &ImportRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO imports (source_file, content_sha256, access_count, domain_count, imported_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(source_file) DO UPDATE SET
            content_sha256 = excluded.content_sha256,
            access_count = excluded.access_count,
            domain_count = excluded.domain_count,
            imported_at = excluded.imported_at
        "#,
        params![
            record.source_file,
            record.content_sha256,
            record.access_count as i64,
            record.domain_count as i64,
            record.imported_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn rejected(table: &'static str, index: usize, err: Error) -> Error {
    Error::RecordRejected {
        table,
        index,
        message: err.to_string(),
    }
}

fn expect_one_row(table: &'static str, affected: usize) -> Result<()> {
    if affected == 1 {
        Ok(())
    } else {
        Err(Error::StoreInvariant { table, affected })
    }
}

fn conversion_error<E>(row: &Row, column: &str, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let idx = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_column(row: &Row, column: &str) -> rusqlite::Result<UtcTimestamp> {
    let raw: String = row.get(column)?;
    UtcTimestamp::parse(&raw).map_err(|e| conversion_error(row, column, e))
}

fn parsed_column<T>(row: &Row, column: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(column)?;
    raw.parse()
        .map_err(|e: String| conversion_error(row, column, Error::Schema(e)))
}
