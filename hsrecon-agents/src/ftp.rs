//! FTP scanner (port 21), detection only

use async_trait::async_trait;
use tracing::info;

use hsrecon_core::{Protocol, ScanContext, ScanReport};
use hsrecon_tor::dial;

use crate::ProtocolScanner;

#[derive(Debug, Default, Clone)]
pub struct FtpScanner;

#[async_trait]
impl ProtocolScanner for FtpScanner {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    async fn scan_protocol(&self, hidden_service: &str, ctx: &ScanContext, report: &ScanReport) {
        info!("Checking {} {}", hidden_service, Protocol::Ftp);

        match dial(hidden_service, Protocol::Ftp.port(), &ctx.config.tor).await {
            Ok(stream) => {
                drop(stream);
                info!("Detected possible FTP server on {}", hidden_service);
                report.set_detected(Protocol::Ftp, true);
            }
            Err(e) => {
                info!("Failed to connect to service on port {}: {}", Protocol::Ftp.port(), e);
                report.set_detected(Protocol::Ftp, false);
            }
        }
    }
}
