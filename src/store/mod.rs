//! Record store backing the built-in content tools.
//!
//! Records are JSON documents grouped into named collections (`clients`,
//! `content`). The trait keeps tool handlers independent of SQLite so tests
//! can run against an in-memory database.

pub mod sqlite;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use sqlite::SqliteRecordStore;

pub const CLIENTS: &str = "clients";
pub const CONTENT: &str = "content";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record already exists: {collection}/{id}")]
    Conflict { collection: String, id: String },

    #[error("failed to open record store at {path}: {reason}")]
    Open { path: String, reason: String },
}

/// One stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub collection: String,
    pub data: Value,
    pub created_at: String,
}

impl Record {
    /// The document with `id` and `created_at` merged in, as shown to the model.
    pub fn to_json(&self) -> Value {
        let mut map = match &self.data {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other.clone());
                map
            }
        };
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert("created_at".into(), Value::String(self.created_at.clone()));
        Value::Object(map)
    }
}

pub trait RecordStore: Send + Sync {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError>;

    /// Records in insertion order.
    fn list(&self, collection: &str, limit: usize) -> Result<Vec<Record>, StoreError>;

    /// Case-insensitive substring match on any of `fields`.
    fn search(
        &self,
        collection: &str,
        fields: &[&str],
        needle: &str,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// Exact match on every `(field, value)` pair.
    fn filter(
        &self,
        collection: &str,
        filters: &[(&str, &str)],
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// Insert a new record; fails with [`StoreError::Conflict`] if the id exists.
    fn insert(&self, collection: &str, id: &str, data: &Value) -> Result<Record, StoreError>;

    fn count(&self, collection: &str) -> Result<usize, StoreError>;
}
