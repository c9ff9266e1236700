//! Evidence store - durable crawl snapshots and the correlation graph
//!
//! Two collections back the store:
//! - `crawls`: append-only page snapshots, indexed on `url`
//! - `relationships`: mutable edges, indexed on each quad field
//!
//! Multi-field predicates are never evaluated by the collection. A lookup
//! fetches the superset from one indexed field and filters the rest here.

mod collection;

pub use collection::{Collection, Document, Txn, DB_FILE};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{CrawlRecord, DocId, Page, Relationship, StoreError};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const CRAWLS: &str = "crawls";
const RELATIONSHIPS: &str = "relationships";
const RELATIONSHIP_FIELDS: &[&str] = &["onion", "from", "type", "identifier"];

/// Persistent store shared by every scan in a run
pub struct EvidenceStore {
    crawls: Collection,
    relationships: Collection,
    /// Serializes read-modify-write on the edges of one onion.
    /// Entries live only while some caller holds them.
    onion_locks: DashMap<String, Arc<Mutex<()>>>,
    clock: Clock,
}

fn to_document<T: Serialize>(value: &T) -> Document {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => Document::new(),
    }
}

fn from_document<T: DeserializeOwned>(
    collection: &str,
    id: DocId,
    doc: Document,
) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::Object(doc)).map_err(|source| StoreError::Decode {
        collection: collection.to_string(),
        id,
        source,
    })
}

/// Decode the edges behind `ids`, skipping ones that are gone or unreadable
fn load_relationships(txn: &Txn<'_>, ids: impl IntoIterator<Item = DocId>) -> Vec<Relationship> {
    let mut rels = Vec::new();
    for id in ids {
        let doc = match txn.read(id) {
            Ok(Some(doc)) => doc,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping relationship {}: {}", id, e);
                continue;
            }
        };
        match from_document::<Relationship>(RELATIONSHIPS, id, doc) {
            Ok(mut rel) => {
                rel.id = id;
                rels.push(rel);
            }
            Err(e) => warn!("Skipping relationship {}: {}", id, e),
        }
    }
    rels
}

fn find_quad(
    txn: &Txn<'_>,
    onion: &str,
    from: &str,
    kind: &str,
    identifier: &str,
) -> Result<Option<Relationship>, StoreError> {
    let ids = txn.query_eq("onion", onion)?;
    Ok(load_relationships(txn, ids)
        .into_iter()
        .find(|rel| rel.matches(onion, from, kind, identifier)))
}

impl EvidenceStore {
    fn with_collections(crawls: Collection, relationships: Collection) -> Self {
        Self {
            crawls,
            relationships,
            onion_locks: DashMap::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Open (or create) a durable store in `dir`
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let crawls = Collection::open(dir, CRAWLS, &["url"])?;
        let relationships = Collection::open(dir, RELATIONSHIPS, RELATIONSHIP_FIELDS)?;

        info!(
            "Opened evidence store at {} ({} crawls, {} relationships)",
            dir.display(),
            crawls.len(),
            relationships.len()
        );
        Ok(Self::with_collections(crawls, relationships))
    }

    /// A store that lives only in memory
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::with_collections(
            Collection::in_memory(CRAWLS, &["url"])?,
            Collection::in_memory(RELATIONSHIPS, RELATIONSHIP_FIELDS)?,
        ))
    }

    /// Replace the clock (tests pin time with this)
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Run `f` holding the lock for `onion`, then drop the lock entry if idle
    fn with_onion_lock<T>(&self, onion: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .onion_locks
            .entry(onion.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let out = {
            let _guard = lock.lock();
            f()
        };

        drop(lock);
        self.onion_locks
            .remove_if(onion, |_, lock| Arc::strong_count(lock) == 1);
        out
    }

    // ---- crawl records ----

    /// Store a page snapshot for `url`, returning its id
    pub fn insert_crawl_record(&self, url: &str, page: &Page) -> Result<DocId, StoreError> {
        let record = CrawlRecord {
            id: 0,
            url: url.to_string(),
            timestamp: self.now(),
            page: page.clone(),
        };
        let id = self.crawls.insert(to_document(&record))?;
        debug!("Stored crawl record {} for {}", id, url);
        Ok(id)
    }

    pub fn get_crawl_record(&self, id: DocId) -> Result<CrawlRecord, StoreError> {
        let doc = self
            .crawls
            .read(id)?
            .ok_or_else(|| StoreError::NotFound(format!("crawl record {}", id)))?;
        let mut record: CrawlRecord = from_document(CRAWLS, id, doc)?;
        record.id = id;
        Ok(record)
    }

    /// Find a record for `url` whose timestamp is after `now + max_age`.
    ///
    /// `max_age` is normally negative: "crawled within the last N".
    /// The newest qualifying record wins.
    pub fn has_recent_crawl_record(
        &self,
        url: &str,
        max_age: Duration,
    ) -> Result<Option<DocId>, StoreError> {
        let cutoff = self.now() + max_age;

        for id in self.crawls.query_eq("url", url)?.into_iter().rev() {
            match self.get_crawl_record(id) {
                Ok(record) if record.timestamp > cutoff => return Ok(Some(id)),
                Ok(_) => {}
                Err(e) => warn!("Skipping crawl record {}: {}", id, e),
            }
        }
        Ok(None)
    }

    // ---- relationships ----

    fn query_relationships(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<Relationship>, StoreError> {
        self.relationships.view(|txn| {
            let ids = txn.query_eq(field, value)?;
            Ok(load_relationships(txn, ids))
        })
    }

    /// Insert the quad, or refresh `last_seen` if it already exists
    pub fn upsert_relationship(
        &self,
        onion: &str,
        from: &str,
        kind: &str,
        identifier: &str,
    ) -> Result<DocId, StoreError> {
        let now = self.now();

        self.with_onion_lock(onion, || {
            self.relationships.transaction(|txn| {
                if let Some(mut rel) = find_quad(txn, onion, from, kind, identifier)? {
                    debug!("Updating {} --- {} ---> {} ({})", onion, from, identifier, kind);
                    rel.last_seen = now.max(rel.first_seen);
                    txn.update(rel.id, to_document(&rel))?;
                    return Ok(rel.id);
                }

                debug!("Inserting {} --- {} ---> {} ({})", onion, from, identifier, kind);
                let rel = Relationship {
                    id: 0,
                    onion: onion.to_string(),
                    from: from.to_string(),
                    kind: kind.to_string(),
                    identifier: identifier.to_string(),
                    first_seen: now,
                    last_seen: now,
                };
                txn.insert(to_document(&rel))
            })
        })
    }

    pub fn relationships_for_onion(&self, onion: &str) -> Result<Vec<Relationship>, StoreError> {
        self.query_relationships("onion", onion)
    }

    /// Edges whose `type`, `from` or `identifier` equals `identifier`.
    ///
    /// The three scans are concatenated as-is: an edge matching on two fields
    /// is returned twice.
    pub fn relationships_for_identifier(
        &self,
        identifier: &str,
    ) -> Result<Vec<Relationship>, StoreError> {
        let mut rels = self.query_relationships("type", identifier)?;
        rels.extend(self.query_relationships("from", identifier)?);
        rels.extend(self.query_relationships("identifier", identifier)?);
        Ok(rels)
    }

    /// Edges on `identifier` discovered via `from_onion`, keyed by type.
    /// The last edge of a given type wins.
    pub fn user_relationships_from_onion(
        &self,
        identifier: &str,
        from_onion: &str,
    ) -> Result<HashMap<String, Relationship>, StoreError> {
        let mut by_type = HashMap::new();
        for rel in self.relationships_for_onion(identifier)? {
            if rel.from == from_onion {
                by_type.insert(rel.kind.clone(), rel);
            }
        }
        Ok(by_type)
    }

    pub fn count_all_relationships(&self) -> usize {
        self.relationships.len()
    }

    pub fn count_relationships_for_identifier(
        &self,
        identifier: &str,
    ) -> Result<usize, StoreError> {
        Ok(self.relationships.query_eq("identifier", identifier)?.len())
    }

    /// Remove the edge carrying exactly this quad
    pub fn delete_relationship(
        &self,
        onion: &str,
        from: &str,
        kind: &str,
        identifier: &str,
    ) -> Result<(), StoreError> {
        self.with_onion_lock(onion, || {
            self.relationships.transaction(|txn| {
                let rel = find_quad(txn, onion, from, kind, identifier)?.ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "relationship {} --- {} ---> {} ({})",
                        onion, from, identifier, kind
                    ))
                })?;
                txn.delete(rel.id)
            })
        })
    }

    /// Raw access for tooling that inspects stored documents
    pub fn crawls(&self) -> &Collection {
        &self.crawls
    }

    pub fn relationships(&self) -> &Collection {
        &self.relationships
    }
}
