//! Resource orchestration: the entry point the RPC surface delegates to for
//! ingesting, inspecting, and deleting per-user resources.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ScrapingConfig;
use crate::error::{EngineError, Result};
use crate::ingestion::crawler::WebCrawler;
use crate::ingestion::scrapers::{FetchHint, FetchedPage, GitHubScraper, HeadlessBrowser, WebScraper};
use crate::ingestion::validation::validate_url;
use crate::ingestion::{DocumentProcessor, DocumentType, IngestionOverrides, SourceDocument};
use crate::store::models::JobStatus;
use crate::store::{DocumentStore, JobStore};

/// Exactly one source is present per resource.
#[derive(Clone, Debug)]
pub enum SourceContent {
    Url(String),
    Text(String),
    File(Vec<u8>),
}

/// Resource lifecycle status surfaced to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceStatus {
    Unspecified,
    Queued,
    Processing,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl From<JobStatus> for ResourceStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => Self::Queued,
            JobStatus::Processing => Self::Processing,
            JobStatus::Completed => Self::Completed,
            JobStatus::Partial => Self::Partial,
            JobStatus::Failed => Self::Failed,
            JobStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Result of queueing a resource for ingestion.
#[derive(Clone, Debug)]
pub struct AddResourceOutcome {
    pub job_id: Uuid,
    pub resource_id: Uuid,
    pub status: ResourceStatus,
}

/// Progress snapshot for a job or resource.
#[derive(Clone, Debug)]
pub struct ResourceStatusInfo {
    pub job_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
    pub status: ResourceStatus,
    pub chunks_created: i64,
    pub error: Option<String>,
    pub progress: f64,
}

/// One entry of a resource listing.
#[derive(Clone, Debug)]
pub struct ResourceItem {
    pub id: Uuid,
    pub document_type: String,
    pub content_preview: String,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub documents: u32,
    pub chunks: i64,
}

/// Resource metadata for cross-database synchronization.
#[derive(Clone, Debug)]
pub struct ResourceSyncInfo {
    pub resource_id: Uuid,
    pub user_id: String,
    pub title: String,
    pub document_type: String,
    pub status: &'static str,
    pub chunks_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub metadata: serde_json::Value,
}

pub struct Engine {
    documents: DocumentStore,
    jobs: JobStore,
    processor: DocumentProcessor,
    web: WebScraper,
    github: GitHubScraper,
    scraping: ScrapingConfig,
    browser: Option<Arc<dyn HeadlessBrowser>>,
}

impl Engine {
    pub fn new(
        documents: DocumentStore,
        jobs: JobStore,
        processor: DocumentProcessor,
        scraping: ScrapingConfig,
        browser: Option<Arc<dyn HeadlessBrowser>>,
    ) -> Result<Self> {
        Ok(Self {
            web: WebScraper::new(&scraping)?,
            github: GitHubScraper::new(&scraping, None)?,
            documents,
            jobs,
            processor,
            scraping,
            browser,
        })
    }

    /// Queue a resource for ingestion, fetching URLs as needed.
    #[instrument(skip(self, content, metadata, overrides))]
    pub async fn add_resource(
        &self,
        user_id: &str,
        resource_id: Option<Uuid>,
        content: SourceContent,
        title: Option<String>,
        document_type: DocumentType,
        metadata: HashMap<String, String>,
        overrides: Option<IngestionOverrides>,
    ) -> Result<AddResourceOutcome> {
        let (text, source_url, document_type, fetched_title) = match content {
            SourceContent::Text(text) => (text, None, document_type, None),
            SourceContent::File(bytes) => (
                String::from_utf8_lossy(&bytes).into_owned(),
                None,
                document_type,
                None,
            ),
            SourceContent::Url(url) => {
                let url = validate_url(&url)?;
                match self.fetch_url(&url, FetchHint::Auto).await {
                    Ok(pages) if !pages.is_empty() => {
                        let title = pages[0].title.clone();
                        let combined = pages
                            .iter()
                            .map(|p| {
                                format!("# {}\nSource: {}\n\n{}", p.title, p.final_url, p.text)
                            })
                            .collect::<Vec<_>>()
                            .join("\n\n");
                        info!(%url, pages = pages.len(), "fetched URL content");
                        (combined, Some(url), DocumentType::Website, Some(title))
                    }
                    Ok(_) => {
                        warn!(%url, "no content fetched from URL");
                        (format!("URL: {url}"), Some(url), DocumentType::Website, None)
                    }
                    Err(e) => {
                        error!(%url, "failed to fetch URL: {e}");
                        return Err(e);
                    }
                }
            }
        };

        let resource_id = resource_id.unwrap_or_else(Uuid::new_v4);
        let document = SourceDocument {
            id: Some(resource_id),
            title: title.or(fetched_title),
            content: text,
            document_type,
            source_url,
            metadata,
        };

        let job_id = self
            .processor
            .process_batch(user_id, vec![document], overrides.as_ref(), false)
            .await?;

        Ok(AddResourceOutcome {
            job_id,
            resource_id,
            status: ResourceStatus::Queued,
        })
    }

    /// Fetch a URL through the adapter selected by its shape or the hint.
    pub async fn fetch_url(&self, url: &str, hint: FetchHint) -> Result<Vec<FetchedPage>> {
        let is_github = url.contains("github.com") || url.contains("raw.githubusercontent.com");

        match hint {
            FetchHint::Repo => Ok(vec![self.github.scrape(url).await?]),
            FetchHint::Browser => match &self.browser {
                Some(browser) => Ok(vec![browser.fetch_rendered(url).await?]),
                None => Err(EngineError::Fetch(
                    "no headless browser configured".into(),
                )),
            },
            FetchHint::SinglePage => Ok(vec![self.web.scrape(url).await?]),
            FetchHint::Crawl => self.crawl_pages(url).await,
            FetchHint::Auto if is_github => Ok(vec![self.github.scrape(url).await?]),
            FetchHint::Auto => self.crawl_pages(url).await,
        }
    }

    async fn crawl_pages(&self, url: &str) -> Result<Vec<FetchedPage>> {
        let crawler = WebCrawler::new(&self.scraping)?;
        let pages = crawler.crawl(url, false).await?;
        Ok(pages
            .into_iter()
            .map(|p| FetchedPage {
                title: p.title,
                text: p.text,
                final_url: p.final_url,
                metadata: HashMap::from([("depth".to_string(), p.depth.to_string())]),
            })
            .collect())
    }

    /// Resolve the status of a job, or of a resource via its stashed job id.
    pub async fn get_resource_status(
        &self,
        job_id: Option<&str>,
        resource_id: Option<&str>,
        user_id: &str,
    ) -> Result<ResourceStatusInfo> {
        let mut resolved_job = None;
        let mut resolved_resource = None;

        if let Some(job_id) = job_id.filter(|s| !s.is_empty()) {
            let id = Uuid::parse_str(job_id)
                .map_err(|_| EngineError::Validation(format!("invalid job ID: {job_id}")))?;
            let job = self.jobs.get_job(id).await?.ok_or(EngineError::NotFound {
                kind: "job",
                id: job_id.to_string(),
            })?;
            if !user_id.is_empty() && job.user_id != user_id {
                warn!(job_id, user_id, "job status access denied");
                return Err(EngineError::PermissionDenied(format!(
                    "job {job_id} belongs to another user"
                )));
            }
            resolved_job = Some(job);
        } else if let Some(resource_id) = resource_id.filter(|s| !s.is_empty()) {
            let id = Uuid::parse_str(resource_id).map_err(|_| {
                EngineError::Validation(format!("invalid resource ID: {resource_id}"))
            })?;
            let doc = self
                .documents
                .get_document(id)
                .await?
                .ok_or(EngineError::NotFound {
                    kind: "resource",
                    id: resource_id.to_string(),
                })?;
            if !user_id.is_empty() && doc.user_id != user_id {
                warn!(resource_id, user_id, "resource status access denied");
                return Err(EngineError::PermissionDenied(format!(
                    "resource {resource_id} belongs to another user"
                )));
            }
            if let Some(job_id) = doc.metadata_str("job_id").and_then(|s| Uuid::parse_str(s).ok())
            {
                resolved_job = self.jobs.get_job(job_id).await?;
            }
            resolved_resource = Some(doc);
        } else {
            return Err(EngineError::Validation(
                "either job_id or resource_id is required".into(),
            ));
        }

        // Chunk counts: exact for a known resource, the job's document
        // counter as an approximation otherwise.
        let chunks_created = match &resolved_resource {
            Some(doc) => self.documents.chunk_count(doc.id).await.unwrap_or(0),
            None => resolved_job
                .as_ref()
                .map(|j| i64::from(j.processed_documents))
                .unwrap_or(0),
        };

        let (status, error, progress) = match &resolved_job {
            Some(job) => (
                ResourceStatus::from(job.status()),
                job.error_list().into_iter().next(),
                job.progress_percent,
            ),
            None => (ResourceStatus::Unspecified, None, 0.0),
        };

        Ok(ResourceStatusInfo {
            job_id: resolved_job.as_ref().map(|j| j.id),
            resource_id: resolved_resource.as_ref().map(|d| d.id),
            status,
            chunks_created,
            error,
            progress,
        })
    }

    /// List a user's resources with per-resource statistics.
    pub async fn list_resources(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<(Vec<ResourceItem>, usize)> {
        let docs = self
            .documents
            .list_user_documents(user_id, limit as i64, 0, None)
            .await?;

        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            let chunks = self.documents.chunk_count(doc.id).await?;
            items.push(ResourceItem {
                id: doc.id,
                document_type: doc.document_type.clone(),
                content_preview: doc.content.chars().take(100).collect(),
                status: ResourceStatus::Completed,
                created_at: doc.created_at,
                metadata: doc.metadata,
                documents: 1,
                chunks,
            });
        }
        let total = items.len();
        Ok((items, total))
    }

    /// Delete a resource the user owns. Returns `false` when missing or
    /// owned by another user.
    pub async fn delete_resource(&self, resource_id: &str, user_id: &str) -> Result<bool> {
        let Ok(id) = Uuid::parse_str(resource_id) else {
            return Ok(false);
        };
        if !user_id.is_empty() {
            match self.documents.get_document(id).await? {
                Some(doc) if doc.user_id != user_id => {
                    warn!(resource_id, user_id, "resource delete denied");
                    return Ok(false);
                }
                None => return Ok(false),
                _ => {}
            }
        }
        let (deleted, chunks, embeddings) = self.documents.delete_document(id).await?;
        info!(resource_id, chunks, embeddings, "resource deleted");
        Ok(deleted)
    }

    /// Cancel an in-flight ingestion job.
    pub async fn cancel_ingestion(&self, job_id: &str, user_id: &str) -> Result<(bool, String)> {
        let Ok(id) = Uuid::parse_str(job_id) else {
            return Ok((false, format!("Invalid job ID: {job_id}")));
        };
        self.jobs.cancel_job(id, user_id).await
    }

    /// Resource metadata for incremental sync. Returns the matching
    /// resources and the sync timestamp.
    pub async fn list_resources_for_sync(
        &self,
        user_id: &str,
        since_timestamp: Option<i64>,
        resource_ids: Option<&[String]>,
    ) -> Result<(Vec<ResourceSyncInfo>, i64)> {
        let since = since_timestamp.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
        let docs = self
            .documents
            .list_user_documents(user_id, 1000, 0, since)
            .await?;

        let id_filter: Option<Vec<Uuid>> = resource_ids.map(|ids| {
            ids.iter()
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect()
        });

        let mut resources = Vec::new();
        for doc in docs {
            if let Some(filter) = &id_filter
                && !filter.contains(&doc.id)
            {
                continue;
            }
            let chunks = self.documents.chunk_count(doc.id).await?;
            resources.push(ResourceSyncInfo {
                resource_id: doc.id,
                user_id: doc.user_id.clone(),
                title: doc.title.clone(),
                document_type: doc.document_type.clone(),
                status: "completed",
                chunks_count: chunks,
                created_at: doc.created_at.timestamp(),
                updated_at: doc.updated_at.timestamp(),
                metadata: doc.metadata,
            });
        }

        Ok((resources, Utc::now().timestamp()))
    }
}
