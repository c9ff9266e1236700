//! Onion spider
//!
//! Walks a hidden service's web root breadth-first and files each page in the
//! evidence store as a crawl record, registering it in the scan's URL index.
//! Pages crawled within the rescan window are reused instead of refetched.

use async_trait::async_trait;
use chrono::Duration;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use tokio::task;
use tracing::{debug, info, warn};
use url::Url;

use hsrecon_core::{Anchor, DocId, EvidenceStore, Page, ScanContext, ScanReport, StoreError};

use crate::{create_tor_client, TorError};

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Populates the evidence store with crawl records for a hidden service
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, hidden_service: &str, ctx: &ScanContext, report: &ScanReport);
}

/// Default crawler, fetching pages over Tor
#[derive(Debug, Default, Clone)]
pub struct OnionSpider;

impl OnionSpider {
    pub fn new() -> Self {
        Self
    }

    async fn fetch_page(client: &Client, url: &str, max_retries: u32) -> Result<Page, TorError> {
        let attempts = max_retries.max(1);
        for attempt in 1..=attempts {
            match Self::fetch_once(client, url).await {
                Ok(page) => return Ok(page),
                Err(e) => debug!("Fetch {} attempt {}/{} failed: {}", url, attempt, attempts, e),
            }
        }
        Err(TorError::MaxRetries(attempts))
    }

    async fn fetch_once(client: &Client, url: &str) -> Result<Page, TorError> {
        let response = client.get(url).send().await?;

        let mut page = Page::new(response.status().as_u16());
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                page = page.with_header(name.as_str(), value);
            }
        }

        if page.is_html() {
            let html = response.text().await?;
            let (title, anchors) = parse_page(&html);
            page.title = title;
            page.anchors = anchors;
        }

        Ok(page)
    }

    /// Reuse a recent record for `url` or fetch and store a new one
    /// Reuse a record from the rescan window if one exists
    fn cached_record(store: &EvidenceStore, url: &str, max_age: Duration) -> Option<(DocId, Page)> {
        match store.has_recent_crawl_record(url, max_age) {
            Ok(Some(id)) => match store.get_crawl_record(id) {
                Ok(record) => {
                    debug!("Reusing crawl record {} for {}", id, url);
                    return Some((id, record.page));
                }
                Err(e) => warn!("Recent record {} unreadable, refetching: {}", id, e),
            },
            Ok(None) => {}
            Err(e) => warn!("Recency lookup for {} failed: {}", url, e),
        }
        None
    }

    async fn record_for(
        client: &Client,
        url: &str,
        ctx: &ScanContext,
    ) -> Option<(DocId, Page)> {
        let store = ctx.store.clone();
        let key = url.to_string();
        let max_age = ctx.config.rescan_max_age();
        let cached =
            task::spawn_blocking(move || Self::cached_record(&store, &key, max_age)).await;
        match cached {
            Ok(Some(hit)) => return Some(hit),
            Ok(None) => {}
            Err(e) => warn!("Recency lookup task for {} failed: {}", url, e),
        }

        let page = match Self::fetch_page(client, url, ctx.config.tor.max_retries).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                return None;
            }
        };

        let store = ctx.store.clone();
        let key = url.to_string();
        let stored = task::spawn_blocking(move || {
            let id = store.insert_crawl_record(&key, &page)?;
            Ok::<_, StoreError>((id, page))
        })
        .await;

        match stored {
            Ok(Ok(record)) => Some(record),
            Ok(Err(e)) => {
                warn!("Failed to store crawl of {}: {}", url, e);
                None
            }
            Err(e) => {
                warn!("Store task for {} failed: {}", url, e);
                None
            }
        }
    }
}

#[async_trait]
impl Crawler for OnionSpider {
    async fn crawl(&self, hidden_service: &str, ctx: &ScanContext, report: &ScanReport) {
        let client = match create_tor_client(&ctx.config.tor) {
            Ok(client) => client,
            Err(e) => {
                warn!("Spider for {} could not start: {}", hidden_service, e);
                return;
            }
        };

        let limits = &ctx.config.crawl;
        let root = format!("http://{}/", hidden_service);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(root.clone(), 0)]);
        let mut visited: HashSet<String> = HashSet::from([root]);
        let mut crawled = 0usize;

        info!("Spidering {}", hidden_service);

        while let Some((url, depth)) = queue.pop_front() {
            if crawled >= limits.max_pages {
                debug!("Page limit {} reached for {}", limits.max_pages, hidden_service);
                break;
            }

            let Some((id, page)) = Self::record_for(&client, &url, ctx).await else {
                continue;
            };
            report.add_crawl(&url, id);
            crawled += 1;

            if depth >= limits.max_depth {
                continue;
            }

            for link in same_service_links(&url, hidden_service, &page.anchors) {
                if visited.insert(link.clone()) {
                    queue.push_back((link, depth + 1));
                }
            }
        }

        info!("Spider finished {}: {} pages", hidden_service, crawled);
    }
}

/// Extract the title and anchors from an HTML document
pub fn parse_page(html: &str) -> (String, Vec<Anchor>) {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .unwrap_or_default();

    let anchors = document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|el| {
            let target = el.value().attr("href")?.trim();
            let text = normalize_whitespace(&el.text().collect::<String>());
            Some(Anchor::new(&text, target))
        })
        .collect();

    (title, anchors)
}

/// Absolute http(s) links that stay on `hidden_service`, fragments removed
fn same_service_links(base: &str, hidden_service: &str, anchors: &[Anchor]) -> Vec<String> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };

    anchors
        .iter()
        .filter_map(|anchor| {
            let mut resolved = base.join(&anchor.target).ok()?;
            if !matches!(resolved.scheme(), "http" | "https") {
                return None;
            }
            if resolved.host_str() != Some(hidden_service) {
                return None;
            }
            resolved.set_fragment(None);
            Some(resolved.to_string())
        })
        .collect()
}

/// Normalize whitespace in text
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
