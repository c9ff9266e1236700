//! Per-scan reports
//!
//! `ScanReport` is shared by every scanner running against one hidden service,
//! so its mutable state sits behind a mutex. `AnonymityReport` is the findings
//! accumulator the analysis passes append to.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use crate::{DocId, Protocol};

/// Structured result attached by a protocol scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub port: u16,
    pub info: serde_json::Value,
}

/// Mutable scan state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanState {
    pub web_detected: bool,
    pub vnc_detected: bool,
    pub ftp_detected: bool,
    /// URL -> crawl record id
    pub crawls: BTreeMap<String, DocId>,
    /// protocol name -> result blob (at most one per protocol)
    pub protocol_info: BTreeMap<String, ProtocolInfo>,
}

/// Scan-local report for one hidden service
#[derive(Debug)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub hidden_service: String,
    pub date_scanned: DateTime<Utc>,
    state: Mutex<ScanState>,
}

impl ScanReport {
    pub fn new(hidden_service: &str) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            hidden_service: hidden_service.to_string(),
            date_scanned: Utc::now(),
            state: Mutex::new(ScanState::default()),
        }
    }

    pub fn set_detected(&self, protocol: Protocol, detected: bool) {
        let mut state = self.state.lock();
        match protocol {
            Protocol::Web => state.web_detected = detected,
            Protocol::Vnc => state.vnc_detected = detected,
            Protocol::Ftp => state.ftp_detected = detected,
        }
    }

    pub fn is_detected(&self, protocol: Protocol) -> bool {
        let state = self.state.lock();
        match protocol {
            Protocol::Web => state.web_detected,
            Protocol::Vnc => state.vnc_detected,
            Protocol::Ftp => state.ftp_detected,
        }
    }

    /// Register a crawl record against its URL
    pub fn add_crawl(&self, url: &str, id: DocId) {
        self.state.lock().crawls.insert(url.to_string(), id);
    }

    /// Copy of the URL -> crawl id index
    pub fn crawls(&self) -> BTreeMap<String, DocId> {
        self.state.lock().crawls.clone()
    }

    /// Attach a result blob, replacing any earlier blob for the same protocol
    pub fn add_protocol_info<T: Serialize>(&self, protocol: &str, port: u16, info: &T) {
        let info = match serde_json::to_value(info) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping {} result for {}: {}", protocol, self.hidden_service, e);
                return;
            }
        };
        self.state
            .lock()
            .protocol_info
            .insert(protocol.to_string(), ProtocolInfo { port, info });
    }

    pub fn protocol_info(&self, protocol: &str) -> Option<ProtocolInfo> {
        self.state.lock().protocol_info.get(protocol).cloned()
    }

    pub fn snapshot(&self) -> ScanState {
        self.state.lock().clone()
    }
}

/// Deanonymizing signals collected during one scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnonymityReport {
    pub hidden_service: String,
    pub email_addresses: Vec<String>,
    pub open_directories: Vec<String>,
    /// Other services that share an identifier with this one
    pub related_onions: Vec<String>,
}

impl AnonymityReport {
    pub fn new(hidden_service: &str) -> Self {
        Self {
            hidden_service: hidden_service.to_string(),
            ..Default::default()
        }
    }
}
