//! Opaque headless-browser seam.

use async_trait::async_trait;

use crate::error::Result;
use crate::ingestion::scrapers::FetchedPage;

/// Contract for a browser-backed fetcher.
///
/// Implementations navigate to the URL, wait for network idle, auto-scroll
/// toward the bottom (up to ten viewports, stopping once the scroll height
/// stabilizes) so lazy-loaded content materializes, and return the full
/// visible text content. The browser engine itself lives outside this
/// crate; deployments inject an implementation.
#[async_trait]
pub trait HeadlessBrowser: Send + Sync {
    async fn fetch_rendered(&self, url: &str) -> Result<FetchedPage>;
}
