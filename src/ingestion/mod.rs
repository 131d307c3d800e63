//! Ingestion: validation, cleaning, chunking, fetching, and the pipeline
//! that feeds retrieval.

pub mod chunker;
pub mod cleaning;
pub mod crawler;
pub mod processor;
pub mod scrapers;
pub mod validation;

pub use chunker::{TextChunk, TextChunker, chunk_text};
pub use cleaning::{CleaningMetrics, CleaningStrategy, DocumentType, clean_with_strategy};
pub use crawler::{CrawledPage, WebCrawler};
pub use processor::{DocumentProcessor, IngestionOverrides, SourceDocument};
pub use scrapers::{FetchHint, FetchedPage, GitHubScraper, HeadlessBrowser, WebScraper};
