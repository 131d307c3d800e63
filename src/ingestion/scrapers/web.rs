//! Single-page web scraper.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::RegexBuilder;
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::config::ScrapingConfig;
use crate::error::{EngineError, Result};
use crate::ingestion::scrapers::FetchedPage;
use crate::ingestion::validation::validate_url;
use crate::retry::{RetryPolicy, retry_async};

/// Containers likely to hold the main content, tried in order.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    r#"[role="main"]"#,
    ".content",
    ".main-content",
    "#content",
    "#main-content",
];

static CHROME_RES: LazyLock<Vec<regex::Regex>> = LazyLock::new(|| {
    ["script", "style", "nav", "footer", "header"]
        .iter()
        .map(|tag| {
            RegexBuilder::new(&format!(r"<{tag}[^>]*>.*?</{tag}>"))
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .build()
                .expect("hard-coded pattern is valid")
        })
        .collect()
});

fn selector(s: &str) -> Selector {
    Selector::parse(s).unwrap_or_else(|e| panic!("bad selector {s}: {e}"))
}

/// Scrapes single pages with redirects, a rolling 1 req/s rate limit, and
/// retry on transient failures.
pub struct WebScraper {
    client: reqwest::Client,
    rate_limit: Duration,
    retry: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl WebScraper {
    pub fn new(config: &ScrapingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            rate_limit: Duration::from_millis(config.rate_limit_ms),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
            last_request: Mutex::new(None),
        })
    }

    /// Fetch and extract one page.
    pub async fn scrape(&self, url: &str) -> Result<FetchedPage> {
        let url = validate_url(url)?;
        self.apply_rate_limit().await;

        info!(%url, "scraping page");
        let (final_url, html) = retry_async(self.retry, "web_scrape", || {
            let client = self.client.clone();
            let url = url.clone();
            async move {
                let response = client.get(&url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(EngineError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                let final_url = response.url().to_string();
                let html = response.text().await?;
                Ok((final_url, html))
            }
        })
        .await?;

        let page = parse_page(&html, &final_url);
        info!(
            url = %final_url,
            chars = page.text.len(),
            title = %page.title,
            "scraped page"
        );
        Ok(page)
    }

    /// Fetch raw body text without extraction (sitemaps, raw files).
    pub async fn fetch_raw(&self, url: &str) -> Result<(String, String)> {
        self.apply_rate_limit().await;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().to_string();
        Ok((final_url, response.text().await?))
    }

    async fn apply_rate_limit(&self) {
        if self.rate_limit.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let since = at.elapsed();
            if since < self.rate_limit {
                let wait = self.rate_limit - since;
                debug!(wait_ms = wait.as_millis() as u64, "rate limiting");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Extract title, main content, and metadata from a fetched page.
///
/// Kept synchronous: `scraper::Html` is not `Send`, so the whole parse
/// happens between awaits.
pub(crate) fn parse_page(html: &str, url: &str) -> FetchedPage {
    // Drop page chrome before parsing; their text would pollute extraction.
    let mut stripped = html.to_string();
    for re in CHROME_RES.iter() {
        stripped = re.replace_all(&stripped, "").into_owned();
    }
    let document = Html::parse_document(&stripped);

    let title = extract_title(&document, url);
    let text = extract_content(&document);
    let metadata = extract_metadata(&document, url);

    FetchedPage {
        title,
        text,
        final_url: url.to_string(),
        metadata,
    }
}

fn extract_title(document: &Html, url: &str) -> String {
    if let Some(el) = document.select(&selector("title")).next() {
        let title = el.text().collect::<String>().trim().to_string();
        if !title.is_empty() {
            return title;
        }
    }
    if let Some(el) = document.select(&selector("h1")).next() {
        let title = el.text().collect::<String>().trim().to_string();
        if !title.is_empty() {
            return title;
        }
    }
    if let Some(el) = document
        .select(&selector(r#"meta[property="og:title"]"#))
        .next()
        && let Some(content) = el.value().attr("content")
    {
        let title = content.trim().to_string();
        if !title.is_empty() {
            return title;
        }
    }
    Url::parse(url)
        .map(|u| format!("{}{}", u.host_str().unwrap_or(""), u.path()))
        .unwrap_or_else(|_| url.to_string())
}

fn extract_content(document: &Html) -> String {
    let root = CONTENT_SELECTORS
        .iter()
        .find_map(|s| document.select(&selector(s)).next())
        .or_else(|| document.select(&selector("body")).next());

    let Some(root) = root else {
        return String::new();
    };

    let lines: Vec<String> = root
        .text()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    lines.join("\n\n")
}

fn meta_content(document: &Html, sel: &str) -> Option<String> {
    document
        .select(&selector(sel))
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn extract_metadata(document: &Html, url: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("source_url".to_string(), url.to_string());

    if let Some(v) = meta_content(document, r#"meta[name="description"]"#) {
        metadata.insert("description".to_string(), v);
    }
    if let Some(v) = meta_content(document, r#"meta[property="og:description"]"#) {
        metadata.insert("og_description".to_string(), v);
    }
    if let Some(v) = meta_content(document, r#"meta[name="author"]"#) {
        metadata.insert("author".to_string(), v);
    }
    if let Some(v) = meta_content(document, r#"meta[name="keywords"]"#) {
        metadata.insert("keywords".to_string(), v);
    }
    if let Some(canonical) = document
        .select(&selector(r#"link[rel="canonical"]"#))
        .next()
        .and_then(|el| el.value().attr("href"))
    {
        metadata.insert("canonical_url".to_string(), canonical.to_string());
    }
    if let Ok(parsed) = Url::parse(url)
        && let Some(host) = parsed.host_str()
    {
        metadata.insert("domain".to_string(), host.to_string());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<!DOCTYPE html>
<html><head>
  <title>Sample Page</title>
  <meta name="description" content="A sample page">
  <meta name="author" content="Jane Doe">
  <link rel="canonical" href="https://example.com/sample">
</head><body>
  <nav>Home | About</nav>
  <header>Site header</header>
  <main>
    <h1>Welcome</h1>
    <p>This is the main content of the page.</p>
    <script>console.log("hidden")</script>
  </main>
  <footer>Copyright</footer>
</body></html>"#;

    #[test]
    fn title_and_content_are_extracted() {
        let page = parse_page(SAMPLE, "https://example.com/sample");
        assert_eq!(page.title, "Sample Page");
        assert!(page.text.contains("main content"));
        assert!(!page.text.contains("Home | About"));
        assert!(!page.text.contains("Copyright"));
        assert!(!page.text.contains("console.log"));
    }

    #[test]
    fn metadata_fields_are_collected() {
        let page = parse_page(SAMPLE, "https://example.com/sample");
        assert_eq!(page.metadata["description"], "A sample page");
        assert_eq!(page.metadata["author"], "Jane Doe");
        assert_eq!(page.metadata["canonical_url"], "https://example.com/sample");
        assert_eq!(page.metadata["domain"], "example.com");
    }

    #[test]
    fn title_falls_back_to_h1_then_url() {
        let no_title = "<html><body><h1>Heading Title</h1><p>x</p></body></html>";
        let page = parse_page(no_title, "https://example.com/a");
        assert_eq!(page.title, "Heading Title");

        let bare = "<html><body><p>x</p></body></html>";
        let page = parse_page(bare, "https://example.com/path");
        assert_eq!(page.title, "example.com/path");
    }
}
