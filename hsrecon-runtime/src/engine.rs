//! Scan engine
//!
//! Drives one hidden-service scan: every enabled scanner runs in its own task,
//! so a scanner that panics or stalls cannot stop the others. Once all
//! scanners have finished, the analysis passes run in order over the crawl
//! index, followed by the correlation lookup. Batch scans run several services
//! at once, bounded by `batch_concurrency`.

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info};
use uuid::Uuid;

use hsrecon_agents::{default_passes, default_scanners, AnalysisPass, ProtocolScanner};
use hsrecon_core::{AnonymityReport, EvidenceStore, ScanConfig, ScanContext, ScanReport, ScanState};
use hsrecon_tor::{Crawler, OnionSpider};

use crate::correlate::related_onions;

/// Everything one scan produced
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan_id: Uuid,
    pub hidden_service: String,
    pub date_scanned: DateTime<Utc>,
    pub scan: ScanState,
    pub findings: AnonymityReport,
}

pub struct ScanEngine {
    ctx: Arc<ScanContext>,
    scanners: Vec<Arc<dyn ProtocolScanner>>,
    passes: Vec<Arc<dyn AnalysisPass>>,
}

impl ScanEngine {
    pub fn new(
        ctx: ScanContext,
        scanners: Vec<Arc<dyn ProtocolScanner>>,
        passes: Vec<Arc<dyn AnalysisPass>>,
    ) -> Self {
        Self {
            ctx: Arc::new(ctx),
            scanners,
            passes,
        }
    }

    /// Engine with the default scanners, the onion spider and the default passes
    pub fn with_defaults(ctx: ScanContext) -> Self {
        let crawler: Arc<dyn Crawler> = Arc::new(OnionSpider::new());
        Self::new(ctx, default_scanners(crawler), default_passes())
    }

    /// Open the evidence store under `config.db_dir` and build a default engine.
    ///
    /// Failing to open the store is the one error that aborts a run.
    pub fn open(config: ScanConfig) -> anyhow::Result<Self> {
        let store = EvidenceStore::open(&config.db_dir).with_context(|| {
            format!("Failed to open evidence store at {}", config.db_dir.display())
        })?;
        Ok(Self::with_defaults(ScanContext::new(config, Arc::new(store))))
    }

    pub fn context(&self) -> &ScanContext {
        &self.ctx
    }

    pub fn store(&self) -> &EvidenceStore {
        &self.ctx.store
    }

    pub async fn scan(&self, hidden_service: &str) -> ScanOutcome {
        info!("Scanning {}", hidden_service);
        let report = Arc::new(ScanReport::new(hidden_service));

        self.run_scanners(&report).await;

        let findings = self.analyze(&report).await;

        info!(
            "Finished {}: {} pages, {} emails, {} open directories, {} related services",
            hidden_service,
            report.crawls().len(),
            findings.email_addresses.len(),
            findings.open_directories.len(),
            findings.related_onions.len()
        );

        ScanOutcome {
            scan_id: report.scan_id,
            hidden_service: report.hidden_service.clone(),
            date_scanned: report.date_scanned,
            scan: report.snapshot(),
            findings,
        }
    }

    /// Scan several services, at most `batch_concurrency` at a time.
    /// Outcomes arrive in completion order.
    pub async fn scan_batch(&self, hidden_services: Vec<String>) -> Vec<ScanOutcome> {
        let limit = self.ctx.config.batch_concurrency.max(1);
        info!("Scanning {} services, {} at a time", hidden_services.len(), limit);

        stream::iter(hidden_services)
            .map(|hs| async move { self.scan(&hs).await })
            .buffer_unordered(limit)
            .collect()
            .await
    }

    /// Run the passes and the correlation lookup off the async workers
    async fn analyze(&self, report: &Arc<ScanReport>) -> AnonymityReport {
        let ctx = self.ctx.clone();
        let passes = self.passes.clone();
        let scan = report.clone();

        let analysis = task::spawn_blocking(move || {
            let mut findings = AnonymityReport::new(&scan.hidden_service);
            for pass in &passes {
                debug!("Running {} pass on {}", pass.name(), scan.hidden_service);
                pass.run(&scan, &mut findings, &ctx);
            }
            findings.related_onions = related_onions(&ctx.store, &findings);
            findings
        })
        .await;

        analysis.unwrap_or_else(|e| {
            error!("Analysis of {} failed: {}", report.hidden_service, e);
            AnonymityReport::new(&report.hidden_service)
        })
    }

    async fn run_scanners(&self, report: &Arc<ScanReport>) {
        let mut tasks = JoinSet::new();

        for scanner in &self.scanners {
            let protocol = scanner.protocol();
            if !self.ctx.config.is_enabled(protocol) {
                debug!("Skipping disabled protocol {}", protocol);
                continue;
            }

            let scanner = scanner.clone();
            let ctx = self.ctx.clone();
            let report = report.clone();
            tasks.spawn(async move {
                scanner
                    .scan_protocol(&report.hidden_service, &ctx, &report)
                    .await;
                protocol
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(protocol) => debug!("{} scan of {} done", protocol, report.hidden_service),
                Err(e) => error!("Scanner task for {} failed: {}", report.hidden_service, e),
            }
        }
    }
}
