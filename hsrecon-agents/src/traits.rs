//! Common traits for scanners and analysis passes

use async_trait::async_trait;
use hsrecon_core::{AnonymityReport, Protocol, ScanContext, ScanReport};

/// Probes one protocol on a hidden service through the proxy.
///
/// Implementations never fail the scan: every outcome, including a refused or
/// timed-out dial, is recorded in the report and logged.
#[async_trait]
pub trait ProtocolScanner: Send + Sync {
    /// The protocol this scanner speaks
    fn protocol(&self) -> Protocol;

    async fn scan_protocol(&self, hidden_service: &str, ctx: &ScanContext, report: &ScanReport);
}

/// Reads the crawl records of one scan and derives findings.
///
/// A pass may also persist correlation edges through `ctx.store`. Passes are
/// independent of each other and may run in any order.
pub trait AnalysisPass: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, scan: &ScanReport, findings: &mut AnonymityReport, ctx: &ScanContext);
}
