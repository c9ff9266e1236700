//! Exposed directory pass
//!
//! Flags crawled pages that look like web server directory listings.

use percent_encoding::percent_decode_str;
use tracing::{info, warn};
use url::Url;

use hsrecon_core::{AnonymityReport, ScanContext, ScanReport};

use crate::AnalysisPass;

const LISTING_MARKER: &str = "Index of";

#[derive(Debug, Default, Clone)]
pub struct ExposedDirectories;

impl AnalysisPass for ExposedDirectories {
    fn name(&self) -> &'static str {
        "exposed-directories"
    }

    fn run(&self, scan: &ScanReport, findings: &mut AnonymityReport, ctx: &ScanContext) {
        for (url, id) in scan.crawls() {
            let record = match ctx.store.get_crawl_record(id) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping crawl record {} ({}): {}", id, url, e);
                    continue;
                }
            };

            if record.page.status != 200 || !record.page.title.contains(LISTING_MARKER) {
                continue;
            }

            match Url::parse(&url) {
                Ok(parsed) => {
                    info!("Found potential open directory {}", url);
                    let path = percent_decode_str(parsed.path()).decode_utf8_lossy();
                    findings.open_directories.push(path.into_owned());
                }
                Err(e) => warn!("Listing at unparseable URL {}: {}", url, e),
            }
        }
    }
}
