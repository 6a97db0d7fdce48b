use std::path::Path;

use rusqlite::{params, Connection};

use super::DatabaseError;

/// Schema migrations in apply order. Each script records its own version row.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    include_str!("../../resources/migrations/001_initial.sql"),
)];

/// Open (or create) the Folia database at `path`, migrated to the latest schema.
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    prepare(Connection::open(path)?)
}

/// Private in-memory database, used by tests and throwaway stores.
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    prepare(Connection::open_in_memory()?)
}

fn prepare(conn: Connection) -> Result<Connection, DatabaseError> {
    // busy_timeout lets a second writer wait out an IMMEDIATE transaction.
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Apply every migration newer than the stored schema version. Each one
/// runs in its own transaction so a failed script leaves the previous
/// version intact.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;

    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        tracing::info!(from = current, to = version, "Applying schema migration");
        let failed = |e: rusqlite::Error| DatabaseError::MigrationFailed {
            version,
            reason: e.to_string(),
        };
        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(sql).map_err(failed)?;
        tx.commit().map_err(failed)?;
    }
    Ok(())
}

/// Highest applied migration, or 0 on a database that has never been migrated.
pub fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let has_table: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params!["schema_version"],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(0);
    }
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn fresh_database_has_folia_schema() {
        let conn = open_memory_database().unwrap();
        assert_eq!(
            table_names(&conn),
            vec![
                "alert_invalidations",
                "alerts",
                "schema_version",
                "symptom_events",
                "treatment_events",
                "users",
            ]
        );
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn unmigrated_database_is_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn broken_version_table_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE schema_version (applied_at TEXT);")
            .unwrap();
        assert!(schema_version(&conn).is_err());
        assert!(run_migrations(&conn).is_err());
        assert_eq!(table_names(&conn), vec!["schema_version"]);
    }

    #[test]
    fn rerunning_migrations_is_a_no_op() {
        let conn = open_memory_database().unwrap();
        run_migrations(&conn).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn foreign_keys_enforced() {
        let conn = open_memory_database().unwrap();
        let orphan = conn.execute(
            "INSERT INTO symptom_events (user_id, symptom, severity, occurred_at)
             VALUES (42, 'pain', 3, '2025-01-01 00:00:00')",
            [],
        );
        assert!(orphan.is_err());
    }

    #[test]
    fn on_disk_database_persists_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folia.db");
        {
            let conn = open_database(&path).unwrap();
            conn.execute("INSERT INTO users (email, name) VALUES ('a@b.c', 'A')", [])
                .unwrap();
        }
        let conn = open_database(&path).unwrap();
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(users, 1);
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }
}
