//! Durable offset storage using SQLite.
//!
//! Offsets are namespaced by connector name so several connectors can share
//! one database file.

use super::{OffsetReader, SourceOffset, SourcePartition};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Offset store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE source_offsets (
///     connector       TEXT NOT NULL,
///     partition_key   TEXT NOT NULL,
///     partition_value TEXT NOT NULL,
///     offset_key      TEXT NOT NULL,
///     offset_value    INTEGER NOT NULL,
///     updated_at      TEXT NOT NULL,   -- ISO 8601 timestamp
///     PRIMARY KEY(connector, partition_key, partition_value)
/// );
/// ```
///
/// Only the offset writer writes here. Everything read back has therefore
/// been flushed.
pub struct SqliteOffsetStore {
    conn: Mutex<Connection>,
    connector: String,
}

impl SqliteOffsetStore {
    /// Creates or opens an offset store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `connector` - Connector name the offsets belong to
    pub fn new<P: AsRef<Path>>(db_path: P, connector: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open offset database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS source_offsets (
                connector TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                partition_value TEXT NOT NULL,
                offset_key TEXT NOT NULL,
                offset_value INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY(connector, partition_key, partition_value)
            )
            "#,
            [],
        )
        .context("Failed to create source_offsets table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            connector: connector.to_string(),
        })
    }

    pub fn connector(&self) -> &str {
        &self.connector
    }

    /// Writes a batch of offsets in one transaction (upsert).
    ///
    /// # Returns
    /// Number of offsets written
    pub fn write_batch(&self, batch: &HashMap<SourcePartition, SourceOffset>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .context("Failed to begin offset transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO source_offsets (
                        connector, partition_key, partition_value,
                        offset_key, offset_value, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(connector, partition_key, partition_value) DO UPDATE SET
                        offset_key = excluded.offset_key,
                        offset_value = excluded.offset_value,
                        updated_at = excluded.updated_at
                    "#,
                )
                .context("Failed to prepare offset upsert")?;

            for (partition, offset) in batch {
                stmt.execute(params![
                    self.connector,
                    partition.key,
                    partition.value,
                    offset.key,
                    offset.value,
                    now,
                ])
                .with_context(|| format!("Failed to write offset for {}", partition))?;
            }
        }
        tx.commit().context("Failed to commit offsets")?;

        Ok(batch.len())
    }

    /// Reads the flushed offset of a single partition.
    pub fn get(&self, partition: &SourcePartition) -> Result<Option<SourceOffset>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT offset_key, offset_value
            FROM source_offsets
            WHERE connector = ?1 AND partition_key = ?2 AND partition_value = ?3
            "#,
            params![self.connector, partition.key, partition.value],
            |row| Ok(SourceOffset::new(row.get::<_, String>(0)?, row.get(1)?)),
        )
        .optional()
        .context("Failed to read offset")
    }

    /// Number of partitions with a stored offset for this connector.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM source_offsets WHERE connector = ?1",
                params![self.connector],
                |row| row.get(0),
            )
            .context("Failed to count offsets")?;
        Ok(count as usize)
    }
}

impl OffsetReader for SqliteOffsetStore {
    fn offsets(
        &self,
        partitions: &[SourcePartition],
    ) -> Result<HashMap<SourcePartition, SourceOffset>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT offset_key, offset_value
                FROM source_offsets
                WHERE connector = ?1 AND partition_key = ?2 AND partition_value = ?3
                "#,
            )
            .context("Failed to prepare offset query")?;

        let mut found = HashMap::with_capacity(partitions.len());
        for partition in partitions {
            let offset = stmt
                .query_row(
                    params![self.connector, partition.key, partition.value],
                    |row| Ok(SourceOffset::new(row.get::<_, String>(0)?, row.get(1)?)),
                )
                .optional()
                .with_context(|| format!("Failed to read offset for {}", partition))?;

            if let Some(offset) = offset {
                found.insert(partition.clone(), offset);
            }
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(job: &str) -> SourcePartition {
        SourcePartition::new("jobName", job)
    }

    fn offset(build: i64) -> SourceOffset {
        SourceOffset::new("buildNumber", build)
    }

    fn create_test_store() -> SqliteOffsetStore {
        SqliteOffsetStore::new(":memory:", "jenkins").expect("Failed to create test store")
    }

    #[test]
    fn test_write_and_read() {
        let store = create_test_store();
        let batch = HashMap::from([(partition("demo"), offset(42))]);

        assert_eq!(store.write_batch(&batch).unwrap(), 1);
        assert_eq!(store.get(&partition("demo")).unwrap(), Some(offset(42)));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_replaces_offset() {
        let store = create_test_store();
        store
            .write_batch(&HashMap::from([(partition("demo"), offset(42))]))
            .unwrap();
        store
            .write_batch(&HashMap::from([(partition("demo"), offset(43))]))
            .unwrap();

        assert_eq!(store.get(&partition("demo")).unwrap(), Some(offset(43)));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_bulk_read_returns_only_stored_partitions() {
        let store = create_test_store();
        store
            .write_batch(&HashMap::from([
                (partition("a"), offset(1)),
                (partition("b"), offset(2)),
                (partition("c"), offset(3)),
            ]))
            .unwrap();

        let found = store
            .offsets(&[partition("a"), partition("c"), partition("missing")])
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found.get(&partition("a")), Some(&offset(1)));
        assert_eq!(found.get(&partition("c")), Some(&offset(3)));
        assert!(!found.contains_key(&partition("missing")));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let store = create_test_store();
        assert_eq!(store.write_batch(&HashMap::new()).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_offsets_are_namespaced_by_connector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.db");

        let jenkins = SqliteOffsetStore::new(&path, "jenkins").unwrap();
        let other = SqliteOffsetStore::new(&path, "other").unwrap();

        jenkins
            .write_batch(&HashMap::from([(partition("demo"), offset(5))]))
            .unwrap();

        assert_eq!(other.get(&partition("demo")).unwrap(), None);
        assert_eq!(jenkins.connector(), "jenkins");
    }

    #[test]
    fn test_offsets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.db");

        {
            let store = SqliteOffsetStore::new(&path, "jenkins").unwrap();
            store
                .write_batch(&HashMap::from([(partition("demo"), offset(42))]))
                .unwrap();
        }

        let reopened = SqliteOffsetStore::new(&path, "jenkins").unwrap();
        assert_eq!(reopened.get(&partition("demo")).unwrap(), Some(offset(42)));
    }
}
