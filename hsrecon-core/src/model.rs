//! Crawl evidence and correlation edges
//!
//! These are the typed shapes of the documents held by the evidence store:
//! - `CrawlRecord`: an append-only snapshot of one fetched page
//! - `Relationship`: an edge linking a hidden service to an identifier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Store-assigned document identifier
pub type DocId = u64;

/// A hyperlink extracted from a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Visible link text
    pub text: String,
    /// Raw href target (not resolved)
    pub target: String,
}

impl Anchor {
    pub fn new(text: &str, target: &str) -> Self {
        Self {
            text: text.to_string(),
            target: target.to_string(),
        }
    }
}

/// Snapshot of a fetched page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// HTTP status code
    pub status: u16,
    /// Contents of `<title>`, empty if absent
    #[serde(default)]
    pub title: String,
    /// Response headers, names lower-cased
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Anchors in document order
    #[serde(default)]
    pub anchors: Vec<Anchor>,
}

impl Page {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchors.push(anchor);
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Whether the page was served as hypertext
    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false)
    }
}

/// A stored page snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRecord {
    /// Assigned by the store, never serialized into the document body
    #[serde(skip)]
    pub id: DocId,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub page: Page,
}

/// A correlation edge `(onion, from, type, identifier)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(skip)]
    pub id: DocId,
    /// Hidden service the identifier was seen on
    pub onion: String,
    /// Discovery mechanism, e.g. "mailto"
    pub from: String,
    /// Identifier category, e.g. "email-address"
    #[serde(rename = "type")]
    pub kind: String,
    /// The identifier value itself
    pub identifier: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Relationship {
    /// Whether this edge carries the given quad
    pub fn matches(&self, onion: &str, from: &str, kind: &str, identifier: &str) -> bool {
        self.onion == onion && self.from == from && self.kind == kind && self.identifier == identifier
    }
}
