use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use tripwire_core::error::{Result, TripwireError};

use crate::backend::{GraphRecord, StepRecord, StorageBackend, SCHEMA_VERSION};

/// Ordered migrations; entry `n` takes the schema from version `n` to `n + 1`.
const MIGRATIONS: [fn(&Connection) -> rusqlite::Result<()>; 3] =
    [create_base_tables, add_updated_at, add_subgraphs];

fn create_base_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS graphs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            last_step_id TEXT,
            constants TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS steps (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            previous_step_id TEXT,
            inputs TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_graphs_name ON graphs(name);",
    )
}

fn add_updated_at(conn: &Connection) -> rusqlite::Result<()> {
    for table in ["graphs", "steps"] {
        if !has_column(conn, table, "updated_at")? {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN updated_at TEXT"))?;
        }
    }
    Ok(())
}

fn add_subgraphs(conn: &Connection) -> rusqlite::Result<()> {
    if !has_column(conn, "graphs", "subgraphs")? {
        conn.execute_batch("ALTER TABLE graphs ADD COLUMN subgraphs TEXT NOT NULL DEFAULT '{}'")?;
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn db_err(e: impl std::fmt::Display) -> TripwireError {
    TripwireError::Database(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(db_err)
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(db_err)
}

/// Raw graph row; JSON columns are decoded outside the rusqlite closure.
struct GraphRow {
    id: String,
    name: String,
    last_step_id: Option<String>,
    constants: String,
    subgraphs: String,
}

impl GraphRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            last_step_id: row.get(2)?,
            constants: row.get(3)?,
            subgraphs: row.get(4)?,
        })
    }

    fn decode(self) -> Result<GraphRecord> {
        Ok(GraphRecord {
            id: self.id,
            name: self.name,
            last_step_id: self.last_step_id,
            constants: from_json(&self.constants)?,
            subgraphs: from_json(&self.subgraphs)?,
        })
    }
}

/// Backend storing graphs and steps in a SQLite database.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a database file. The schema is not touched until
    /// [`StorageBackend::upgrade_if_needed`].
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TripwireError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        debug!(path = %path.display(), "SQLite graph store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(db_err)
    }

    fn read_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
        conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get::<_, u32>(0)
        })
        .optional()
    }
}

impl StorageBackend for SqliteBackend {
    fn schema_version(&self) -> Result<Option<u32>> {
        let conn = self.conn()?;
        Self::read_version(&conn).map_err(db_err)
    }

    fn upgrade_if_needed(&self) -> Result<u32> {
        let mut conn = self.conn()?;

        let found = match Self::read_version(&conn) {
            Ok(version) => version.unwrap_or(0),
            Err(e) => {
                debug!(error = %e, "Schema version unreadable, treating store as fresh");
                0
            }
        };
        if found >= SCHEMA_VERSION {
            return Ok(found);
        }

        let tx = conn.transaction().map_err(db_err)?;
        for migration in &MIGRATIONS[found as usize..] {
            migration(&tx).map_err(db_err)?;
        }
        tx.execute_batch(
            "DROP TABLE IF EXISTS schema_version;
             CREATE TABLE schema_version (version INTEGER NOT NULL);",
        )
        .map_err(db_err)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        info!(from = found, to = SCHEMA_VERSION, "Graph store schema upgraded");
        Ok(found)
    }

    fn put_graph(&self, record: &GraphRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO graphs (id, name, last_step_id, constants, subgraphs, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 last_step_id = excluded.last_step_id,
                 constants = excluded.constants,
                 subgraphs = excluded.subgraphs,
                 updated_at = excluded.updated_at",
            params![
                record.id,
                record.name,
                record.last_step_id,
                to_json(&record.constants)?,
                to_json(&record.subgraphs)?,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_graph(&self, id: &str) -> Result<Option<GraphRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, last_step_id, constants, subgraphs FROM graphs WHERE id = ?1",
                params![id],
                GraphRow::read,
            )
            .optional()
            .map_err(db_err)?;
        row.map(GraphRow::decode).transpose()
    }

    fn remove_graph(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM graphs WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(removed > 0)
    }

    fn put_step(&self, record: &StepRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO steps (id, name, kind, previous_step_id, inputs, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 kind = excluded.kind,
                 previous_step_id = excluded.previous_step_id,
                 inputs = excluded.inputs,
                 updated_at = excluded.updated_at",
            params![
                record.id,
                record.name,
                record.kind,
                record.previous_step_id,
                to_json(&record.inputs)?,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_step(&self, id: &str) -> Result<Option<StepRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, kind, previous_step_id, inputs FROM steps WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        row.map(|(id, name, kind, previous_step_id, inputs)| {
            Ok(StepRecord {
                id,
                name,
                kind,
                previous_step_id,
                inputs: from_json(&inputs)?,
            })
        })
        .transpose()
    }

    fn remove_step(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM steps WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(removed > 0)
    }

    fn list_graphs(&self) -> Result<Vec<GraphRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, last_step_id, constants, subgraphs
                 FROM graphs ORDER BY name, id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], GraphRow::read)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(GraphRow::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn graph_record(id: &str, name: &str) -> GraphRecord {
        GraphRecord {
            id: id.into(),
            name: name.into(),
            last_step_id: Some("s2".into()),
            constants: HashMap::from([("limit".to_string(), json!(3))]),
            subgraphs: HashMap::new(),
        }
    }

    #[test]
    fn test_fresh_store_gets_full_schema() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.schema_version().is_err());
        assert_eq!(backend.upgrade_if_needed().unwrap(), 0);
        assert_eq!(backend.schema_version().unwrap(), Some(SCHEMA_VERSION));
        assert_eq!(backend.upgrade_if_needed().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_graph_and_step_records() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.upgrade_if_needed().unwrap();

        let graph = graph_record("g1", "alpha");
        backend.put_graph(&graph).unwrap();
        assert_eq!(backend.get_graph("g1").unwrap(), Some(graph.clone()));

        let mut renamed = graph.clone();
        renamed.name = "beta".into();
        backend.put_graph(&renamed).unwrap();
        assert_eq!(backend.get_graph("g1").unwrap().unwrap().name, "beta");

        let step = StepRecord {
            id: "s1".into(),
            name: "first".into(),
            kind: "Emit".into(),
            previous_step_id: None,
            inputs: HashMap::from([("value".to_string(), json!("{{graph.limit}}"))]),
        };
        backend.put_step(&step).unwrap();
        assert_eq!(backend.get_step("s1").unwrap(), Some(step));

        assert!(backend.remove_step("s1").unwrap());
        assert!(!backend.remove_step("s1").unwrap());
        assert!(backend.remove_graph("g1").unwrap());
        assert_eq!(backend.get_graph("g1").unwrap(), None);
    }

    #[test]
    fn test_list_sorted_by_name() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.upgrade_if_needed().unwrap();
        backend.put_graph(&graph_record("b", "zeta")).unwrap();
        backend.put_graph(&graph_record("a", "alpha")).unwrap();
        let names: Vec<String> = backend
            .list_graphs()
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_upgrade_from_version_one_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphs.db");
        {
            let conn = Connection::open(&path).unwrap();
            create_base_tables(&conn).unwrap();
            conn.execute_batch(
                "CREATE TABLE schema_version (version INTEGER NOT NULL);
                 INSERT INTO schema_version (version) VALUES (1);
                 INSERT INTO graphs (id, name, last_step_id, constants)
                     VALUES ('g1', 'legacy', NULL, '{\"k\":1}');",
            )
            .unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.schema_version().unwrap(), Some(1));
        assert_eq!(backend.upgrade_if_needed().unwrap(), 1);
        assert_eq!(backend.schema_version().unwrap(), Some(SCHEMA_VERSION));

        let legacy = backend.get_graph("g1").unwrap().unwrap();
        assert_eq!(legacy.name, "legacy");
        assert_eq!(legacy.constants["k"], json!(1));
        assert!(legacy.subgraphs.is_empty());
    }

    #[test]
    fn test_unreadable_version_treated_as_fresh() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TABLE schema_version (label TEXT);
                 INSERT INTO schema_version (label) VALUES ('garbage');",
            )
            .unwrap();

        assert!(backend.schema_version().is_err());
        assert_eq!(backend.upgrade_if_needed().unwrap(), 0);
        assert_eq!(backend.schema_version().unwrap(), Some(SCHEMA_VERSION));
        backend.put_graph(&graph_record("g1", "ok")).unwrap();
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graphs.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.upgrade_if_needed().unwrap();
            backend.put_graph(&graph_record("g1", "kept")).unwrap();
        }
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.upgrade_if_needed().unwrap(), SCHEMA_VERSION);
        assert_eq!(backend.get_graph("g1").unwrap().unwrap().name, "kept");
    }
}
