//! hsrecon Core - data model and evidence store for hidden-service reconnaissance
//!
//! This crate provides the foundational pieces shared by every scan:
//! - Crawl records and correlation edges
//! - The evidence store (document collections with field indexes)
//! - Scan and anonymity reports
//! - Scan configuration and the explicit scan context

pub mod config;
pub mod error;
pub mod model;
pub mod onion;
pub mod protocol;
pub mod report;
pub mod store;

pub use config::*;
pub use error::*;
pub use model::*;
pub use onion::*;
pub use protocol::*;
pub use report::*;
pub use store::{Clock, EvidenceStore};

/// Relationship `from` label for identifiers found in mail links
pub const FROM_MAILTO: &str = "mailto";

/// Relationship type for email addresses
pub const TYPE_EMAIL_ADDRESS: &str = "email-address";
