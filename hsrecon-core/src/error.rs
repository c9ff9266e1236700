//! Error types for the evidence store and configuration

use thiserror::Error;

use crate::DocId;

/// Errors from the evidence store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested record or edge is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored document does not fit the typed record
    #[error("Failed to decode document {id} in {collection}: {source}")]
    Decode {
        collection: String,
        id: DocId,
        #[source]
        source: serde_json::Error,
    },

    /// Query on a field that carries no index
    #[error("Field {field} is not indexed in {collection}")]
    NoIndex { collection: String, field: String },

    /// Database could not be opened, queried or written
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Store directory could not be created
    #[error("Store directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the store itself is unusable (as opposed to a single lookup failing)
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Storage(_) | StoreError::Io(_))
    }
}

/// Errors loading scan configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
