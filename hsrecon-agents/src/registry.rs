//! Explicit tables of the scanners and passes the runtime iterates

use std::sync::Arc;

use hsrecon_tor::Crawler;

use crate::{
    AnalysisPass, ExposedDirectories, FtpScanner, MailtoLinks, ProtocolScanner, VncScanner,
    WebScanner,
};

pub fn default_scanners(crawler: Arc<dyn Crawler>) -> Vec<Arc<dyn ProtocolScanner>> {
    vec![
        Arc::new(WebScanner::new(crawler)),
        Arc::new(VncScanner),
        Arc::new(FtpScanner),
    ]
}

pub fn default_passes() -> Vec<Arc<dyn AnalysisPass>> {
    vec![Arc::new(ExposedDirectories), Arc::new(MailtoLinks)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsrecon_core::{
        Anchor, AnonymityReport, EvidenceStore, Page, Protocol, ScanConfig, ScanContext,
        ScanReport,
    };
    use hsrecon_tor::OnionSpider;

    #[test]
    fn test_one_scanner_per_protocol() {
        let scanners = default_scanners(Arc::new(OnionSpider::new()));
        let protocols: Vec<Protocol> = scanners.iter().map(|s| s.protocol()).collect();
        assert_eq!(protocols, Protocol::ALL.to_vec());
    }

    #[test]
    fn test_pass_names() {
        let names: Vec<&str> = default_passes().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["exposed-directories", "mailto"]);
    }

    fn run_passes(passes: &[Arc<dyn AnalysisPass>]) -> (AnonymityReport, usize) {
        let store = Arc::new(EvidenceStore::in_memory().unwrap());
        let ctx = ScanContext::new(ScanConfig::default(), store);
        let report = ScanReport::new("x.onion");

        for (url, page) in [
            (
                "http://x.onion/",
                Page::new(200)
                    .with_title("Index of /")
                    .with_header("content-type", "text/html")
                    .with_anchor(Anchor::new("", "mailto:a@b.com")),
            ),
            (
                "http://x.onion/contact",
                Page::new(200)
                    .with_title("Contact")
                    .with_header("content-type", "text/html")
                    .with_anchor(Anchor::new("", "mailto:c@d.com")),
            ),
        ] {
            let id = ctx.store.insert_crawl_record(url, &page).unwrap();
            report.add_crawl(url, id);
        }

        let mut findings = AnonymityReport::new("x.onion");
        for pass in passes {
            pass.run(&report, &mut findings, &ctx);
        }
        (findings, ctx.store.count_all_relationships())
    }

    #[test]
    fn test_pass_order_does_not_matter() {
        let forward = default_passes();
        let mut reverse = default_passes();
        reverse.reverse();

        let (a, edges_a) = run_passes(&forward);
        let (b, edges_b) = run_passes(&reverse);

        assert_eq!(a, b);
        assert_eq!(edges_a, edges_b);
        assert_eq!(a.open_directories, vec!["/".to_string()]);
        assert_eq!(a.email_addresses.len(), 2);
    }
}
