//! Database schema migrations.
//!
//! Applies the initial schema: regions, governorates, hazards, alerts,
//! the two alert join tables, and the schema_migrations tracking table.
//! Embedding BLOB columns exist only on the three tables with meaningful
//! free text; alerts are reached through their relations instead.

use rusqlite::Connection;
use tracing::info;

use nadhir_core::error::NadhirError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<(), NadhirError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| NadhirError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| NadhirError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), NadhirError> {
    conn.execute_batch(
        "
        -- Geographic hierarchy: regions at the top.
        CREATE TABLE IF NOT EXISTS regions (
            region_id        TEXT PRIMARY KEY NOT NULL,
            name_ar          TEXT NOT NULL DEFAULT '',
            name_en          TEXT NOT NULL DEFAULT '',
            embedding        BLOB,
            embedding_status TEXT NOT NULL DEFAULT 'pending'
                             CHECK (embedding_status IN ('ready', 'pending')),
            created_at       INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Governorates belong to exactly one region.
        CREATE TABLE IF NOT EXISTS governorates (
            gov_id           TEXT PRIMARY KEY NOT NULL,
            region_id        TEXT NOT NULL,
            name_ar          TEXT NOT NULL DEFAULT '',
            name_en          TEXT NOT NULL DEFAULT '',
            latitude         REAL,
            longitude        REAL,
            embedding        BLOB,
            embedding_status TEXT NOT NULL DEFAULT 'pending'
                             CHECK (embedding_status IN ('ready', 'pending')),
            created_at       INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            FOREIGN KEY (region_id) REFERENCES regions(region_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_governorates_region
            ON governorates (region_id);

        -- Canonical hazard descriptions.
        CREATE TABLE IF NOT EXISTS hazards (
            hazard_id        TEXT PRIMARY KEY NOT NULL,
            description_ar   TEXT NOT NULL DEFAULT '',
            description_en   TEXT NOT NULL DEFAULT '',
            embedding        BLOB,
            embedding_status TEXT NOT NULL DEFAULT 'pending'
                             CHECK (embedding_status IN ('ready', 'pending')),
            created_at       INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Alerts keyed by the feed's own integer identity. No embedding:
        -- semantic relevance is derived through the join tables.
        CREATE TABLE IF NOT EXISTS alerts (
            alert_id        INTEGER PRIMARY KEY NOT NULL,
            title           TEXT NOT NULL DEFAULT '',
            hazard_type_ar  TEXT NOT NULL DEFAULT '',
            hazard_type_en  TEXT NOT NULL DEFAULT '',
            from_date       INTEGER,
            to_date         INTEGER,
            status_ar       TEXT NOT NULL DEFAULT '',
            status_en       TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_from_date
            ON alerts (from_date DESC);

        -- Many-to-many joins, keyed by the referenced pair.
        CREATE TABLE IF NOT EXISTS alert_hazards (
            alert_id    INTEGER NOT NULL,
            hazard_id   TEXT NOT NULL,
            PRIMARY KEY (alert_id, hazard_id),
            FOREIGN KEY (alert_id) REFERENCES alerts(alert_id) ON DELETE CASCADE,
            FOREIGN KEY (hazard_id) REFERENCES hazards(hazard_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_alert_hazards_hazard
            ON alert_hazards (hazard_id);

        CREATE TABLE IF NOT EXISTS alert_governorates (
            alert_id    INTEGER NOT NULL,
            gov_id      TEXT NOT NULL,
            PRIMARY KEY (alert_id, gov_id),
            FOREIGN KEY (alert_id) REFERENCES alerts(alert_id) ON DELETE CASCADE,
            FOREIGN KEY (gov_id) REFERENCES governorates(gov_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_alert_governorates_gov
            ON alert_governorates (gov_id);

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| NadhirError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        // Running again should be idempotent.
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_entity_tables_exist() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO regions (region_id, name_ar, name_en) VALUES ('R1', 'شمال', 'North')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO governorates (gov_id, region_id, name_en) VALUES ('G1', 'R1', 'Alpha')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO hazards (hazard_id, description_en) VALUES ('H1', 'Flood')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO alerts (alert_id, title) VALUES (1, 'Heavy rain')",
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM governorates", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_governorate_requires_region() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO governorates (gov_id, region_id) VALUES ('G1', 'missing')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_join_tables_enforce_foreign_keys() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO alert_hazards (alert_id, hazard_id) VALUES (99, 'H9')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_join_rows_cascade_on_alert_delete() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute("INSERT INTO alerts (alert_id) VALUES (1)", [])
            .unwrap();
        conn.execute("INSERT INTO hazards (hazard_id) VALUES ('H1')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO alert_hazards (alert_id, hazard_id) VALUES (1, 'H1')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM alerts WHERE alert_id = 1", [])
            .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM alert_hazards", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_embedding_status_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO regions (region_id, embedding_status) VALUES ('R1', 'stale')",
            [],
        );
        assert!(result.is_err());
    }
}
