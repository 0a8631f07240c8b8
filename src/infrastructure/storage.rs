use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::Path;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Creates the key/value schema and upgrades caches written before replication tracking.
pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    if !has_column(&connection, "kv_store", "synced")? {
        log::info!("adding replication flag to {}", path.display());
        // Rows from an older cache have unknown remote state; treat them as unsynced.
        connection.execute_batch("ALTER TABLE kv_store ADD COLUMN synced INTEGER NOT NULL DEFAULT 0")?;
    }
    Ok(())
}

fn has_column(connection: &Connection, table: &str, column: &str) -> Result<bool, InfraError> {
    let mut statement = connection.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = statement
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn upgrades_cache_without_replication_flag() {
        let dir = std::env::temp_dir().join(format!("studyclock-storage-tests-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("legacy.sqlite");
        let _ = fs::remove_file(&path);
        {
            let connection = Connection::open(&path).expect("open legacy db");
            connection
                .execute_batch(
                    "CREATE TABLE kv_store (
                       namespace TEXT NOT NULL, key TEXT NOT NULL, value TEXT NOT NULL,
                       updated_at TEXT NOT NULL, PRIMARY KEY (namespace, key));
                     INSERT INTO kv_store VALUES ('default', 'timer.phase', '\"idle\"', '2026-02-16');",
                )
                .expect("legacy schema");
        }

        initialize_database(&path).expect("upgrade");
        initialize_database(&path).expect("second run is a no-op");

        let connection = Connection::open(&path).expect("reopen");
        let synced: i64 = connection
            .query_row("SELECT synced FROM kv_store WHERE key = 'timer.phase'", [], |row| row.get(0))
            .expect("synced column");
        assert_eq!(synced, 0);
        let _ = fs::remove_dir_all(&dir);
    }
}
