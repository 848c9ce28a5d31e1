//! SQLite implementation of [`RecordStore`].
//!
//! Uses `rusqlite` synchronously behind a mutex; calls are short and tool
//! handlers invoke them inline. WAL mode is enabled so the CLI can read while
//! another process writes.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde_json::Value;

use super::{Record, RecordStore, StoreError};

// ─── SqliteRecordStore ───────────────────────────────────────────────────────

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) the store at `path`. Pass `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::Open {
                        path: path.to_string(),
                        reason: e.to_string(),
                    })?;
                }
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        tracing::debug!(path = %path, "record store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // The connection holds no in-memory invariants a panic could break.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_collection
                ON records(collection, created_at);
            ",
        )?;
        Ok(())
    }

    fn query(&self, sql: &str, values: Vec<String>) -> Result<Vec<Record>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_raw)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(raw_to_record(row?)?);
        }
        Ok(records)
    }
}

type RawRecord = (String, String, String, String);

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn raw_to_record((id, collection, data, created_at): RawRecord) -> Result<Record, StoreError> {
    Ok(Record {
        id,
        collection,
        data: serde_json::from_str(&data)?,
        created_at,
    })
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

/// Escape LIKE wildcards so the needle matches literally.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

const SELECT: &str = "SELECT id, collection, data, created_at FROM records";

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteRecordStore {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let raw = self
            .conn()
            .query_row(
                &format!("{SELECT} WHERE collection = ?1 AND id = ?2"),
                params![collection, id],
                row_to_raw,
            )
            .optional()?;
        raw.map(raw_to_record).transpose()
    }

    fn list(&self, collection: &str, limit: usize) -> Result<Vec<Record>, StoreError> {
        self.query(
            &format!("{SELECT} WHERE collection = ?1 ORDER BY created_at, rowid LIMIT {limit}"),
            vec![collection.to_string()],
        )
    }

    fn search(
        &self,
        collection: &str,
        fields: &[&str],
        needle: &str,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        if fields.is_empty() {
            return self.list(collection, limit);
        }

        let mut values = vec![collection.to_string()];
        let mut clauses = Vec::with_capacity(fields.len());
        let pattern = like_pattern(needle);
        for field in fields {
            values.push(json_path(field));
            let path_idx = values.len();
            values.push(pattern.clone());
            let pattern_idx = values.len();
            clauses.push(format!(
                "lower(json_extract(data, ?{path_idx})) LIKE ?{pattern_idx} ESCAPE '\\'"
            ));
        }

        self.query(
            &format!(
                "{SELECT} WHERE collection = ?1 AND ({}) ORDER BY created_at, rowid LIMIT {limit}",
                clauses.join(" OR ")
            ),
            values,
        )
    }

    fn filter(
        &self,
        collection: &str,
        filters: &[(&str, &str)],
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let mut values = vec![collection.to_string()];
        let mut sql = format!("{SELECT} WHERE collection = ?1");
        for (field, value) in filters {
            values.push(json_path(field));
            let path_idx = values.len();
            values.push(value.to_string());
            let value_idx = values.len();
            sql.push_str(&format!(" AND json_extract(data, ?{path_idx}) = ?{value_idx}"));
        }
        sql.push_str(&format!(" ORDER BY created_at, rowid LIMIT {limit}"));
        self.query(&sql, values)
    }

    fn insert(&self, collection: &str, id: &str, data: &Value) -> Result<Record, StoreError> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let body = serde_json::to_string(data)?;

        let inserted = self.conn().execute(
            "INSERT INTO records (collection, id, data, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, body, created_at],
        );

        match inserted {
            Ok(_) => Ok(Record {
                id: id.to_string(),
                collection: collection.to_string(),
                data: data.clone(),
                created_at,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Conflict {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as usize)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
