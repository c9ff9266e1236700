//! Web scanner (port 80)
//!
//! Confirms the port answers through the proxy, then hands the service to the
//! crawler, which files crawl records in the evidence store.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use hsrecon_core::{Protocol, ScanContext, ScanReport};
use hsrecon_tor::{dial, Crawler, OnionSpider};

use crate::ProtocolScanner;

pub struct WebScanner {
    crawler: Arc<dyn Crawler>,
}

impl WebScanner {
    pub fn new(crawler: Arc<dyn Crawler>) -> Self {
        Self { crawler }
    }
}

impl Default for WebScanner {
    fn default() -> Self {
        Self::new(Arc::new(OnionSpider::new()))
    }
}

#[async_trait]
impl ProtocolScanner for WebScanner {
    fn protocol(&self) -> Protocol {
        Protocol::Web
    }

    async fn scan_protocol(&self, hidden_service: &str, ctx: &ScanContext, report: &ScanReport) {
        info!("Checking {} {}", hidden_service, Protocol::Web);

        match dial(hidden_service, Protocol::Web.port(), &ctx.config.tor).await {
            Ok(stream) => drop(stream),
            Err(e) => {
                info!("Failed to connect to service on port {}: {}", Protocol::Web.port(), e);
                report.set_detected(Protocol::Web, false);
                return;
            }
        }

        info!("Found potential service on port {}", Protocol::Web.port());
        report.set_detected(Protocol::Web, true);

        self.crawler.crawl(hidden_service, ctx, report).await;
    }
}
