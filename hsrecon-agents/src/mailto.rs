//! Mail link pass
//!
//! Collects addresses from `mailto:` anchors on HTML pages and records each one
//! as an `email-address` edge on the scanned service, so later scans of other
//! services can be correlated through the shared address.

use tracing::{info, warn};

use hsrecon_core::{AnonymityReport, ScanContext, ScanReport, FROM_MAILTO, TYPE_EMAIL_ADDRESS};

use crate::AnalysisPass;

const MAILTO_PREFIX: &str = "mailto:";

#[derive(Debug, Default, Clone)]
pub struct MailtoLinks;

impl AnalysisPass for MailtoLinks {
    fn name(&self) -> &'static str {
        "mailto"
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

            if !record.page.is_html() {
                continue;
            }

            for anchor in &record.page.anchors {
                let Some(address) = anchor.target.strip_prefix(MAILTO_PREFIX) else {
                    continue;
                };

                info!("Found email address: {}", address);
                findings.email_addresses.push(address.to_string());

                if let Err(e) = ctx.store.upsert_relationship(
                    &scan.hidden_service,
                    FROM_MAILTO,
                    TYPE_EMAIL_ADDRESS,
                    address,
                ) {
                    warn!("Could not record {} for {}: {}", address, scan.hidden_service, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsrecon_core::{Anchor, EvidenceStore, Page, ScanConfig};
    use std::sync::Arc;

    fn setup() -> (ScanContext, ScanReport) {
        let store = Arc::new(EvidenceStore::in_memory().unwrap());
        let ctx = ScanContext::new(ScanConfig::default(), store);
        (ctx, ScanReport::new("x.onion"))
    }

    fn crawl(ctx: &ScanContext, report: &ScanReport, url: &str, page: Page) {
        let id = ctx.store.insert_crawl_record(url, &page).unwrap();
        report.add_crawl(url, id);
    }

    fn html_page() -> Page {
        Page::new(200).with_header("Content-Type", "text/html; charset=utf-8")
    }

    #[test]
    fn test_mailto_creates_finding_and_edge() {
        let (ctx, report) = setup();
        crawl(
            &ctx,
            &report,
            "http://x.onion/",
            html_page()
                .with_anchor(Anchor::new("contact", "mailto:a@b.com"))
                .with_anchor(Anchor::new("next", "/next")),
        );

        let mut findings = AnonymityReport::new("x.onion");
        MailtoLinks.run(&report, &mut findings, &ctx);

        assert_eq!(findings.email_addresses, vec!["a@b.com".to_string()]);

        let edges = ctx.store.relationships_for_onion("x.onion").unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, FROM_MAILTO);
        assert_eq!(edges[0].kind, TYPE_EMAIL_ADDRESS);
        assert_eq!(edges[0].identifier, "a@b.com");
    }

    #[test]
    fn test_non_html_pages_are_ignored() {
        let (ctx, report) = setup();
        crawl(
            &ctx,
            &report,
            "http://x.onion/data.json",
            Page::new(200)
                .with_header("content-type", "application/json")
                .with_anchor(Anchor::new("", "mailto:hidden@b.com")),
        );

        let mut findings = AnonymityReport::new("x.onion");
        MailtoLinks.run(&report, &mut findings, &ctx);

        assert!(findings.email_addresses.is_empty());
        assert_eq!(ctx.store.count_all_relationships(), 0);
    }

    #[test]
    fn test_query_suffix_kept_verbatim() {
        let (ctx, report) = setup();
        crawl(
            &ctx,
            &report,
            "http://x.onion/",
            html_page().with_anchor(Anchor::new("", "mailto:ops@b.com?subject=hi")),
        );

        let mut findings = AnonymityReport::new("x.onion");
        MailtoLinks.run(&report, &mut findings, &ctx);

        assert_eq!(findings.email_addresses, vec!["ops@b.com?subject=hi".to_string()]);
        let edges = ctx.store.count_relationships_for_identifier("ops@b.com?subject=hi");
        assert_eq!(edges.unwrap(), 1);
    }

    #[test]
    fn test_repeat_address_is_one_edge() {
        let (ctx, report) = setup();
        crawl(
            &ctx,
            &report,
            "http://x.onion/",
            html_page().with_anchor(Anchor::new("", "mailto:a@b.com")),
        );
        crawl(
            &ctx,
            &report,
            "http://x.onion/about",
            html_page().with_anchor(Anchor::new("", "mailto:a@b.com")),
        );

        let mut findings = AnonymityReport::new("x.onion");
        MailtoLinks.run(&report, &mut findings, &ctx);

        assert_eq!(findings.email_addresses.len(), 2);
        assert_eq!(ctx.store.count_all_relationships(), 1);
    }
}
