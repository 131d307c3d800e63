//! GitHub markdown adapter.
//!
//! Blob and raw URLs are converted to raw content and fetched directly;
//! repository URLs resolve to the README. Markdown discovery walks the git
//! tree through the REST API.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::config::ScrapingConfig;
use crate::error::{EngineError, Result};
use crate::ingestion::scrapers::FetchedPage;
use crate::retry::{RetryPolicy, retry_async};

static MD_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").expect("hard-coded pattern is valid"));

/// A markdown file discovered in a repository tree.
#[derive(Clone, Debug)]
pub struct MarkdownFileInfo {
    pub path: String,
    pub name: String,
    pub download_url: String,
    pub size: u64,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    size: u64,
}

pub struct GitHubScraper {
    client: reqwest::Client,
    token: Option<String>,
    retry: RetryPolicy,
}

impl GitHubScraper {
    pub fn new(config: &ScrapingConfig, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            token,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
        })
    }

    /// Fetch markdown content for a GitHub URL (file, raw, or repo root).
    pub async fn scrape(&self, url: &str) -> Result<FetchedPage> {
        if url.contains("/blob/") || url.contains("/raw/") || url.contains("raw.githubusercontent")
        {
            self.scrape_file(url).await
        } else if let Some((owner, repo)) = parse_repo_url(url) {
            self.scrape_repo_readme(url, &owner, &repo).await
        } else {
            Err(EngineError::Fetch(format!(
                "unsupported GitHub URL format: {url}"
            )))
        }
    }

    /// Walk the repository tree for `.md`/`.markdown` files.
    pub async fn discover_markdown_files(
        &self,
        repo_url: &str,
        max_files: usize,
    ) -> Result<Vec<MarkdownFileInfo>> {
        let (owner, repo) = parse_repo_url(repo_url)
            .ok_or_else(|| EngineError::Fetch(format!("invalid repository URL: {repo_url}")))?;

        let api_url =
            format!("https://api.github.com/repos/{owner}/{repo}/git/trees/HEAD?recursive=1");
        let body: TreeResponse = self.get_json(&api_url).await?;

        let files: Vec<MarkdownFileInfo> = body
            .tree
            .into_iter()
            .filter(|entry| {
                entry.entry_type == "blob"
                    && (entry.path.ends_with(".md") || entry.path.ends_with(".markdown"))
            })
            .take(max_files)
            .map(|entry| {
                let name = entry
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or(entry.path.as_str())
                    .to_string();
                MarkdownFileInfo {
                    download_url: format!(
                        "https://raw.githubusercontent.com/{owner}/{repo}/HEAD/{}",
                        entry.path
                    ),
                    name,
                    path: entry.path,
                    size: entry.size,
                }
            })
            .collect();

        info!(repo = %format!("{owner}/{repo}"), files = files.len(), "discovered markdown files");
        Ok(files)
    }

    async fn scrape_file(&self, url: &str) -> Result<FetchedPage> {
        let raw_url = convert_to_raw_url(url);
        let content = self.get_text(&raw_url).await?;
        let title = extract_title_from_markdown(&content)
            .unwrap_or_else(|| prettify_filename(url));

        Ok(FetchedPage {
            title,
            text: content,
            final_url: url.to_string(),
            metadata: HashMap::from([
                ("source".to_string(), "github".to_string()),
                ("content_type".to_string(), "markdown".to_string()),
                ("raw_url".to_string(), raw_url),
            ]),
        })
    }

    async fn scrape_repo_readme(
        &self,
        url: &str,
        owner: &str,
        repo: &str,
    ) -> Result<FetchedPage> {
        let readme_url = format!("https://raw.githubusercontent.com/{owner}/{repo}/HEAD/README.md");
        let content = self.get_text(&readme_url).await?;

        Ok(FetchedPage {
            title: format!("{owner}/{repo} - README"),
            text: content,
            final_url: url.to_string(),
            metadata: HashMap::from([
                ("source".to_string(), "github".to_string()),
                ("repository".to_string(), format!("{owner}/{repo}")),
                ("content_type".to_string(), "markdown".to_string()),
            ]),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        retry_async(self.retry, "github_fetch", || {
            let request = self.request(url);
            let url = url.to_string();
            async move {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(EngineError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                Ok(response.text().await?)
            }
        })
        .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        retry_async(self.retry, "github_api", || {
            let request = self.request(url);
            let url = url.to_string();
            async move {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(EngineError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                response
                    .json()
                    .await
                    .map_err(|e| EngineError::Fetch(format!("malformed GitHub API response: {e}")))
            }
        })
        .await
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }
}

/// Convert a GitHub blob URL to its raw content URL.
pub(crate) fn convert_to_raw_url(url: &str) -> String {
    if url.contains("raw.githubusercontent.com") {
        return url.to_string();
    }
    url.replace("github.com", "raw.githubusercontent.com")
        .replace("/blob/", "/")
}

/// `Some((owner, repo))` for a repository-root URL.
pub(crate) fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    if !parsed.host_str()?.contains("github.com") {
        return None;
    }
    let parts: Vec<&str> = parsed.path().split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() == 2 {
        Some((parts[0].to_string(), parts[1].to_string()))
    } else {
        None
    }
}

fn extract_title_from_markdown(content: &str) -> Option<String> {
    MD_TITLE_RE
        .captures(content)
        .map(|c| c[1].trim().to_string())
}

fn prettify_filename(url: &str) -> String {
    let filename = url.rsplit('/').next().unwrap_or(url);
    let stem = filename.rsplit_once('.').map_or(filename, |(s, _)| s);
    stem.replace(['-', '_'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_urls_convert_to_raw() {
        assert_eq!(
            convert_to_raw_url("https://github.com/user/repo/blob/main/docs/intro.md"),
            "https://raw.githubusercontent.com/user/repo/main/docs/intro.md"
        );
        let already_raw = "https://raw.githubusercontent.com/user/repo/main/file.md";
        assert_eq!(convert_to_raw_url(already_raw), already_raw);
    }

    #[test]
    fn repo_urls_parse_owner_and_name() {
        assert_eq!(
            parse_repo_url("https://github.com/rust-lang/rust"),
            Some(("rust-lang".to_string(), "rust".to_string()))
        );
        assert_eq!(
            parse_repo_url("https://github.com/rust-lang/rust/issues"),
            None
        );
        assert_eq!(parse_repo_url("https://example.com/a/b"), None);
    }

    #[test]
    fn markdown_title_extraction() {
        assert_eq!(
            extract_title_from_markdown("intro\n# The Title\nbody"),
            Some("The Title".to_string())
        );
        assert_eq!(extract_title_from_markdown("no heading here"), None);
        assert_eq!(prettify_filename("https://x/y/getting-started.md"), "getting started");
    }
}
