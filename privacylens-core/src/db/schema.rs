//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Canonical record tables
    r#"
    -- ============================================
    -- LAYER 1: Canonical
    -- ============================================

    -- One row per access line; line is the 1-based physical line in the export
    CREATE TABLE IF NOT EXISTS access (
        source_file      TEXT NOT NULL,
        line             INTEGER NOT NULL,
        stream           TEXT,
        tcc_service      TEXT,
        category         TEXT,
        accessor_id      TEXT NOT NULL,
        accessor_id_type TEXT NOT NULL,
        session_id       TEXT NOT NULL,
        kind             TEXT NOT NULL,
        timestamp        TEXT NOT NULL,
        format_version   INTEGER,
        out_of_process   INTEGER,
        generation       TEXT NOT NULL,

        PRIMARY KEY (source_file, line)
    ) WITHOUT ROWID;

    -- One row per (app, hostname, context, initiator) aggregate
    CREATE TABLE IF NOT EXISTS domain (
        source_file         TEXT NOT NULL,
        bundle_id           TEXT NOT NULL,
        domain              TEXT NOT NULL,
        context             TEXT NOT NULL,
        initiated_type      TEXT NOT NULL,
        domain_type         INTEGER NOT NULL,
        timestamp           TEXT NOT NULL,
        first_timestamp     TEXT NOT NULL,
        hits                INTEGER NOT NULL CHECK (hits >= 1),
        domain_owner        TEXT NOT NULL,
        effective_user_id   INTEGER,
        has_app_bundle_name TEXT,
        generation          TEXT NOT NULL,

        PRIMARY KEY (source_file, bundle_id, domain, context, initiated_type)
    ) WITHOUT ROWID;
    "#,
    // Version 2: Import ledger and lookup indexes
    r#"
    CREATE TABLE IF NOT EXISTS imports (
        source_file      TEXT PRIMARY KEY,
        content_sha256   TEXT NOT NULL,
        access_count     INTEGER NOT NULL,
        domain_count     INTEGER NOT NULL,
        imported_at      DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_access_session ON access(source_file, session_id);
    CREATE INDEX IF NOT EXISTS idx_access_accessor ON access(source_file, accessor_id);
    CREATE INDEX IF NOT EXISTS idx_domain_timestamp ON domain(source_file, timestamp);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["access", "domain", "imports"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_domain_rejects_zero_hits() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO domain (source_file, bundle_id, domain, context, initiated_type,
                                 domain_type, timestamp, first_timestamp, hits, domain_owner, generation)
             VALUES ('f', 'b', 'd', '', 'AppInitiated', 2, 't', 't', 0, '', 'v2')",
            [],
        );
        assert!(result.is_err());
    }
}
