//! Multi-page website crawler.
//!
//! Breadth-first from a seed URL with `visited`/`discovered` dedup, optional
//! sitemap preload, same-domain restriction, and a per-request delay for
//! backpressure.

use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{info, warn};
use url::Url;

use crate::config::ScrapingConfig;
use crate::error::Result;
use crate::ingestion::scrapers::WebScraper;

/// Extensions that never hold crawlable content.
const SKIP_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".zip", ".tar", ".gz", ".mp4",
    ".mp3", ".wav", ".css", ".js",
];

static SITEMAP_LOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<loc>\s*([^<]+?)\s*</loc>").expect("hard-coded pattern is valid"));

/// One crawled page.
#[derive(Clone, Debug)]
pub struct CrawledPage {
    pub url: String,
    pub final_url: String,
    pub title: String,
    pub text: String,
    pub depth: usize,
}

pub struct WebCrawler {
    scraper: WebScraper,
    max_pages: usize,
    max_depth: usize,
    same_domain_only: bool,
    delay: Duration,
}

impl WebCrawler {
    pub fn new(config: &ScrapingConfig) -> Result<Self> {
        Ok(Self {
            scraper: WebScraper::new(config)?,
            max_pages: config.crawl_max_pages,
            max_depth: config.crawl_max_depth,
            same_domain_only: true,
            delay: Duration::from_millis(config.rate_limit_ms),
        })
    }

    #[must_use]
    pub fn with_limits(mut self, max_pages: usize, max_depth: usize) -> Self {
        self.max_pages = max_pages;
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn allow_cross_domain(mut self) -> Self {
        self.same_domain_only = false;
        self
    }

    /// Crawl breadth-first from `start_url`.
    pub async fn crawl(&self, start_url: &str, follow_sitemap: bool) -> Result<Vec<CrawledPage>> {
        let start_domain = domain_of(start_url);
        let mut visited: HashSet<String> = HashSet::new();
        let mut discovered: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        if follow_sitemap {
            for url in self.sitemap_urls(start_url).await.into_iter().take(self.max_pages) {
                if self.same_domain_only && domain_of(&url) != start_domain {
                    continue;
                }
                if discovered.insert(url.clone()) {
                    queue.push_back((url, 0));
                }
            }
            if !queue.is_empty() {
                info!(urls = queue.len(), "seeded crawl from sitemap");
            }
        }

        if discovered.insert(start_url.to_string()) {
            queue.push_back((start_url.to_string(), 0));
        }

        let mut pages: Vec<CrawledPage> = Vec::new();

        while let Some((url, depth)) = queue.pop_front() {
            if pages.len() >= self.max_pages {
                break;
            }
            if visited.contains(&url) || depth > self.max_depth {
                continue;
            }

            if !self.delay.is_zero() && !pages.is_empty() {
                tokio::time::sleep(self.delay).await;
            }

            let page = match self.scraper.fetch_raw(&url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(%url, error = %e, "failed to crawl page");
                    continue;
                }
            };
            let (final_url, html) = page;
            visited.insert(url.clone());

            let (title, text, links) = extract_page(&html, &final_url);
            pages.push(CrawledPage {
                url: url.clone(),
                final_url,
                title,
                text,
                depth,
            });
            info!(
                crawled = pages.len(),
                max = self.max_pages,
                url,
                depth,
                "crawled page"
            );

            if depth < self.max_depth {
                for link in links {
                    if self.same_domain_only && domain_of(&link) != start_domain {
                        continue;
                    }
                    if !discovered.contains(&link) && !visited.contains(&link) {
                        discovered.insert(link.clone());
                        queue.push_back((link, depth + 1));
                    }
                }
            }
        }

        info!(
            pages = pages.len(),
            discovered = discovered.len(),
            "crawl complete"
        );
        Ok(pages)
    }

    async fn sitemap_urls(&self, base_url: &str) -> Vec<String> {
        for path in ["/sitemap.xml", "/sitemap_index.xml"] {
            let Ok(sitemap_url) = Url::parse(base_url).and_then(|u| u.join(path)) else {
                continue;
            };
            match self.scraper.fetch_raw(sitemap_url.as_str()).await {
                Ok((_, xml)) => {
                    let urls = parse_sitemap(&xml);
                    if !urls.is_empty() {
                        return urls;
                    }
                }
                Err(_) => continue,
            }
        }
        Vec::new()
    }
}

/// Pull `<loc>` entries out of a sitemap document.
///
/// Handles both urlsets and sitemap indexes in the
/// `http://www.sitemaps.org/schemas/sitemap/0.9` namespace; a lexical scan
/// is enough for either.
pub(crate) fn parse_sitemap(xml: &str) -> Vec<String> {
    SITEMAP_LOC_RE
        .captures_iter(xml)
        .map(|c| c[1].to_string())
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .collect()
}

fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Parse out title, text, and candidate links. Synchronous because
/// `scraper::Html` is not `Send`.
fn extract_page(html: &str, base_url: &str) -> (String, String, Vec<String>) {
    let page = super::scrapers::web::parse_page(html, base_url);

    let document = Html::parse_document(html);
    let anchor = Selector::parse("a[href]").expect("hard-coded pattern is valid");
    let base = Url::parse(base_url).ok();

    let mut links = Vec::new();
    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('#')
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("javascript:")
        {
            continue;
        }

        let absolute = match &base {
            Some(base) => match base.join(href) {
                Ok(mut u) => {
                    u.set_fragment(None);
                    u.to_string()
                }
                Err(_) => continue,
            },
            None => continue,
        };

        if !absolute.starts_with("http://") && !absolute.starts_with("https://") {
            continue;
        }
        let lower = absolute.to_lowercase();
        if SKIP_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            continue;
        }
        links.push(absolute);
    }

    (page.title, page.text, links)
}
