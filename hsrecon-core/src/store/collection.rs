//! Document collections with single-field equality indexes
//!
//! A collection holds JSON object documents keyed by a monotonic `DocId`.
//! Only the fields named at creation are indexed, and the only query is
//! equality on one indexed field. Anything richer is filtered by the caller.
//!
//! Each collection is a SQLite table of `(id, doc)` rows plus a side table of
//! `(field, value, doc_id)` entries for its indexed fields.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{DocId, StoreError};

/// Native document representation
pub type Document = Map<String, Value>;

/// Database file shared by every collection of a store directory
pub const DB_FILE: &str = "evidence.db";

/// A named collection of documents
pub struct Collection {
    name: String,
    indexed: Vec<String>,
    conn: Mutex<Connection>,
}

/// Collection operations bound to one locked connection
pub struct Txn<'a> {
    conn: &'a Connection,
    collection: &'a Collection,
}

fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Txn<'_> {
    fn table(&self) -> &str {
        &self.collection.name
    }

    fn add_fields(&self, id: DocId, doc: &Document) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO {}_fields (field, value, doc_id) VALUES (?1, ?2, ?3)",
            self.table()
        ))?;
        for field in &self.collection.indexed {
            if let Some(key) = doc.get(field).and_then(index_key) {
                stmt.execute(params![field, key, id as i64])?;
            }
        }
        Ok(())
    }

    fn remove_fields(&self, id: DocId) -> Result<(), StoreError> {
        self.conn.execute(
            &format!("DELETE FROM {}_fields WHERE doc_id = ?1", self.table()),
            params![id as i64],
        )?;
        Ok(())
    }

    /// Insert a document, returning its fresh id
    pub fn insert(&self, doc: Document) -> Result<DocId, StoreError> {
        let text = Value::Object(doc.clone()).to_string();
        self.conn.execute(
            &format!("INSERT INTO {} (doc) VALUES (?1)", self.table()),
            params![text],
        )?;
        let id = self.conn.last_insert_rowid() as DocId;
        self.add_fields(id, &doc)?;
        Ok(id)
    }

    /// Read a document; `None` if the id is unknown
    pub fn read(&self, id: DocId) -> Result<Option<Document>, StoreError> {
        let text: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT doc FROM {} WHERE id = ?1", self.table()),
                params![id as i64],
                |row| row.get(0),
            )
            .optional()?;

        match text {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    collection: self.collection.name.clone(),
                    id,
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Replace a document in place
    pub fn update(&self, id: DocId, doc: Document) -> Result<(), StoreError> {
        let text = Value::Object(doc.clone()).to_string();
        let changed = self.conn.execute(
            &format!("UPDATE {} SET doc = ?2 WHERE id = ?1", self.table()),
            params![id as i64, text],
        )?;
        if changed == 0 {
            return Err(self.collection.not_found(id));
        }
        self.remove_fields(id)?;
        self.add_fields(id, &doc)
    }

    /// Remove a document
    pub fn delete(&self, id: DocId) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table()),
            params![id as i64],
        )?;
        if changed == 0 {
            return Err(self.collection.not_found(id));
        }
        self.remove_fields(id)
    }

    /// Ids of documents whose indexed `field` equals `value`
    pub fn query_eq(&self, field: &str, value: &str) -> Result<BTreeSet<DocId>, StoreError> {
        if !self.collection.indexed.iter().any(|f| f == field) {
            return Err(StoreError::NoIndex {
                collection: self.collection.name.clone(),
                field: field.to_string(),
            });
        }

        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT doc_id FROM {}_fields WHERE field = ?1 AND value = ?2",
            self.table()
        ))?;
        let ids = stmt
            .query_map(params![field, value], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(|id| id as DocId))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

impl Collection {
    fn with_connection(
        name: &str,
        indexed: &[&str],
        conn: Connection,
    ) -> Result<Self, StoreError> {
        // AUTOINCREMENT keeps ids monotonic across deletes
        conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {name} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {name}_fields (
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                doc_id INTEGER NOT NULL,
                PRIMARY KEY (field, value, doc_id)
            ) WITHOUT ROWID;
            CREATE INDEX IF NOT EXISTS idx_{name}_fields_doc ON {name}_fields(doc_id);
            "
        ))?;

        Ok(Self {
            name: name.to_string(),
            indexed: indexed.iter().map(|f| f.to_string()).collect(),
            conn: Mutex::new(conn),
        })
    }

    /// Create a collection that lives only in memory
    pub fn in_memory(name: &str, indexed: &[&str]) -> Result<Self, StoreError> {
        Self::with_connection(name, indexed, Connection::open_in_memory()?)
    }

    /// Open (or create) a collection in the store database under `dir`
    pub fn open(dir: &Path, name: &str, indexed: &[&str]) -> Result<Self, StoreError> {
        let conn = Connection::open(dir.join(DB_FILE))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let collection = Self::with_connection(name, indexed, conn)?;
        debug!("Opened collection {} ({} documents)", name, collection.len());
        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn not_found(&self, id: DocId) -> StoreError {
        StoreError::NotFound(format!("{} document {}", self.name, id))
    }

    /// Run `f` in one immediate transaction, committed only if it succeeds
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Txn<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&Txn {
            conn: &*tx,
            collection: self,
        })?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` against the connection without opening a transaction
    pub fn view<T>(
        &self,
        f: impl FnOnce(&Txn<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock();
        f(&Txn {
            conn: &*conn,
            collection: self,
        })
    }

    pub fn insert(&self, doc: Document) -> Result<DocId, StoreError> {
        self.transaction(|txn| txn.insert(doc))
    }

    pub fn read(&self, id: DocId) -> Result<Option<Document>, StoreError> {
        self.view(|txn| txn.read(id))
    }

    pub fn update(&self, id: DocId, doc: Document) -> Result<(), StoreError> {
        self.transaction(|txn| txn.update(id, doc))
    }

    pub fn delete(&self, id: DocId) -> Result<(), StoreError> {
        self.transaction(|txn| txn.delete(id))
    }

    pub fn query_eq(&self, field: &str, value: &str) -> Result<BTreeSet<DocId>, StoreError> {
        self.view(|txn| txn.query_eq(field, value))
    }

    pub fn len(&self) -> usize {
        match self.view(|txn| txn.count()) {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to count {}: {}", self.name, e);
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
