//! URL→document adapters.
//!
//! Three adapters sit behind one output shape: a plain HTTP scraper for
//! single pages, a GitHub adapter for markdown files and repositories, and
//! an opaque headless-browser seam for JavaScript-heavy sites. Multi-page
//! crawling builds on the web scraper in [`crate::ingestion::crawler`].

pub mod browser;
pub mod github;
pub mod web;

use std::collections::HashMap;

pub use browser::HeadlessBrowser;
pub use github::GitHubScraper;
pub use web::WebScraper;

/// A fetched page, normalized across adapters.
#[derive(Clone, Debug, Default)]
pub struct FetchedPage {
    pub title: String,
    pub text: String,
    pub final_url: String,
    pub metadata: HashMap<String, String>,
}

/// Caller hint selecting the fetch strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchHint {
    /// Pick an adapter from the URL shape.
    #[default]
    Auto,
    /// Fetch exactly one page.
    SinglePage,
    /// BFS-crawl from the seed.
    Crawl,
    /// Treat as a GitHub repository or file.
    Repo,
    /// Render with the headless browser.
    Browser,
}
