//! Chunked upload assembly.
//!
//! Large files arrive as a stream of frames: a metadata frame first, then
//! data frames with a strictly increasing index (starting at 1, since frame
//! 0 is the metadata). Bytes accumulate alongside a running SHA-256; the
//! final frame triggers size and checksum validation before the assembled
//! payload is handed to ingestion.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::ingestion::{DocumentType, IngestionOverrides};

/// Maximum size of a single data frame (10 MiB).
pub const MAX_CHUNK_SIZE: usize = 10 * 1024 * 1024;
/// Maximum assembled file size (1 GiB).
pub const MAX_TOTAL_SIZE: u64 = 1024 * 1024 * 1024;

/// Metadata carried by the first frame of an upload.
#[derive(Clone, Debug)]
pub struct UploadMetadata {
    pub user_id: String,
    pub resource_id: Option<Uuid>,
    pub filename: String,
    pub total_size: u64,
    pub total_chunks: u32,
    /// Expected SHA-256 of the assembled bytes, hex-encoded.
    pub checksum: Option<String>,
    pub title: Option<String>,
    pub document_type: DocumentType,
    pub metadata: HashMap<String, String>,
    pub overrides: Option<IngestionOverrides>,
}

/// One frame of the upload stream.
#[derive(Clone, Debug)]
pub enum UploadFrame {
    Metadata(Box<UploadMetadata>),
    Data {
        chunk_index: u32,
        data: Vec<u8>,
        is_last: bool,
    },
}

/// The verified, reassembled upload.
#[derive(Clone, Debug)]
pub struct AssembledUpload {
    pub metadata: UploadMetadata,
    pub resource_id: Uuid,
    pub bytes: Vec<u8>,
    pub chunks_received: u32,
    pub checksum: String,
}

/// Frame-by-frame state machine for one upload.
pub struct ChunkedUploadAssembler {
    metadata: Option<UploadMetadata>,
    resource_id: Option<Uuid>,
    buffer: Vec<u8>,
    hasher: Sha256,
    chunks_received: u32,
    total_bytes: u64,
}

impl ChunkedUploadAssembler {
    pub fn new() -> Self {
        Self {
            metadata: None,
            resource_id: None,
            buffer: Vec::new(),
            hasher: Sha256::new(),
            chunks_received: 0,
            total_bytes: 0,
        }
    }

    pub fn chunks_received(&self) -> u32 {
        self.chunks_received
    }

    /// Feed one frame. Returns the assembled upload once the last frame has
    /// been validated.
    pub fn push(&mut self, frame: UploadFrame) -> Result<Option<AssembledUpload>> {
        match frame {
            UploadFrame::Metadata(metadata) => self.push_metadata(*metadata),
            UploadFrame::Data {
                chunk_index,
                data,
                is_last,
            } => self.push_data(chunk_index, data, is_last),
        }
    }

    fn push_metadata(&mut self, metadata: UploadMetadata) -> Result<Option<AssembledUpload>> {
        if self.chunks_received != 0 {
            return Err(EngineError::Validation(
                "metadata frame must be first".into(),
            ));
        }
        if metadata.total_size > MAX_TOTAL_SIZE {
            return Err(EngineError::Validation(format!(
                "file too large: {} bytes (max: {MAX_TOTAL_SIZE})",
                metadata.total_size
            )));
        }

        info!(
            user_id = %metadata.user_id,
            filename = %metadata.filename,
            total_size = metadata.total_size,
            total_chunks = metadata.total_chunks,
            "chunked upload started"
        );
        self.resource_id = Some(metadata.resource_id.unwrap_or_else(Uuid::new_v4));
        self.metadata = Some(metadata);
        self.chunks_received = 1;
        Ok(None)
    }

    fn push_data(
        &mut self,
        chunk_index: u32,
        data: Vec<u8>,
        is_last: bool,
    ) -> Result<Option<AssembledUpload>> {
        let Some(expected_total) = self.metadata.as_ref().map(|m| m.total_size) else {
            return Err(EngineError::Validation(
                "first frame must contain metadata".into(),
            ));
        };

        if chunk_index != self.chunks_received {
            return Err(EngineError::Validation(format!(
                "out of order chunk: expected {}, got {chunk_index}",
                self.chunks_received
            )));
        }
        if data.len() > MAX_CHUNK_SIZE {
            return Err(EngineError::Validation(format!(
                "chunk too large: {} bytes (max: {MAX_CHUNK_SIZE})",
                data.len()
            )));
        }
        if self.total_bytes + data.len() as u64 > MAX_TOTAL_SIZE {
            return Err(EngineError::Validation(
                "upload exceeds maximum total size".into(),
            ));
        }

        self.hasher.update(&data);
        self.total_bytes += data.len() as u64;
        self.buffer.extend_from_slice(&data);
        self.chunks_received += 1;
        debug!(
            chunk_index,
            bytes = data.len(),
            total = self.total_bytes,
            expected = expected_total,
            "received upload chunk"
        );

        if !is_last {
            return Ok(None);
        }
        self.finalize().map(Some)
    }

    fn finalize(&mut self) -> Result<AssembledUpload> {
        let metadata = self
            .metadata
            .take()
            .ok_or_else(|| EngineError::Validation("no metadata received".into()))?;

        if self.total_bytes != metadata.total_size {
            return Err(EngineError::Validation(format!(
                "size mismatch: received {}, expected {}",
                self.total_bytes, metadata.total_size
            )));
        }

        let computed = format!("{:x}", std::mem::take(&mut self.hasher).finalize());
        if let Some(expected) = &metadata.checksum
            && !expected.is_empty()
            && !expected.eq_ignore_ascii_case(&computed)
        {
            return Err(EngineError::DataLoss(
                "checksum mismatch - data corrupted during transfer".into(),
            ));
        }

        info!(
            chunks = self.chunks_received,
            bytes = self.total_bytes,
            "chunked upload complete"
        );

        Ok(AssembledUpload {
            resource_id: self.resource_id.unwrap_or_else(Uuid::new_v4),
            metadata,
            bytes: std::mem::take(&mut self.buffer),
            chunks_received: self.chunks_received,
            checksum: computed,
        })
    }
}

impl Default for ChunkedUploadAssembler {
    fn default() -> Self {
        Self::new()
    }
}
