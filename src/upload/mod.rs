//! Upload module
//!
//! Client-side transfer coordination for the image-hosting backend:
//!
//! - `planner`: byte-range chunk planning
//! - `worker`: single chunk transfer, no retry of its own
//! - `scheduler`: bounded-concurrency chunk pool with per-chunk retry
//! - `orchestrator`: per-file strategy selection, file-level retry, state updates
//! - `batch`: bounded-concurrency coordination across files
//! - `pool`: the generic bounded worker pool shared by the chunk and file levels

use crate::api::{
    ApiError, ChunkInitData, ChunkInitRequest, ChunkUploadData, ChunkUploadRequest,
    SingleUploadRequest, UploadResponseData,
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod batch;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod scheduler;
pub mod worker;

pub use batch::{BatchCoordinator, BatchReport, BatchSummary};
pub use orchestrator::{FileOrchestrator, ItemOutcome, UploadStrategy};
pub use planner::ChunkPlan;
pub use scheduler::{ChunkRunSummary, ChunkScheduler};
pub use worker::ChunkWorker;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid chunk size: must be greater than zero")]
    InvalidChunkSize,

    #[error("Chunk index {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("{} chunk(s) failed after retries: {failed:?} (last error: {last_error})", .failed.len())]
    ChunksFailed { failed: Vec<u32>, last_error: String },

    #[error("Upload session {upload_id} announces {announced} chunk(s), which no chunk size fits (server chunk size {chunk_size})")]
    SessionMismatch {
        upload_id: String,
        announced: u32,
        chunk_size: u64,
    },

    #[error("Server rejected the file")]
    Rejected,
}

impl UploadError {
    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Api(e) => e.kind(),
            UploadError::InvalidChunkSize => "invalid_chunk_size",
            UploadError::ChunkOutOfRange { .. } => "chunk_out_of_range",
            UploadError::ChunksFailed { .. } => "chunks_failed",
            UploadError::SessionMismatch { .. } => "session_mismatch",
            UploadError::Rejected => "rejected",
        }
    }
}

/// Server-assigned identity of a chunked transfer.
///
/// One-shot: created by init, referenced by every chunk call and the merge
/// call, never reused after merge or after the attempt is abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

impl From<ChunkInitData> for UploadSession {
    fn from(data: ChunkInitData) -> Self {
        Self {
            upload_id: data.upload_id,
            chunk_size: data.chunk_size,
            total_chunks: data.total_chunks,
        }
    }
}

/// Bounded retry with capped exponential backoff.
///
/// The delay after the `n`-th failed attempt is `min(base * 2^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next attempt, given the number of failed attempts so far
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempts);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Backend operations the upload engine depends on.
///
/// `ApiClient` is the production implementation; tests substitute fakes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Upload a whole file in one request
    async fn upload_single(
        &self,
        request: SingleUploadRequest,
    ) -> Result<UploadResponseData, ApiError>;

    /// Open a chunked upload session
    async fn init_chunked(&self, request: ChunkInitRequest) -> Result<ChunkInitData, ApiError>;

    /// Transfer one chunk
    async fn upload_chunk(&self, request: ChunkUploadRequest) -> Result<ChunkUploadData, ApiError>;

    /// Merge all chunks of a session into the final image
    async fn merge(&self, upload_id: &str) -> Result<UploadResponseData, ApiError>;
}

/// Post-batch refresh of the persisted image list
#[async_trait]
pub trait RefreshHook: Send + Sync {
    async fn refresh(&self);
}

/// User-visible notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Warning(String),
    /// A file failed for good; `message` is the backend's text, unmodified
    FileFailed { file_name: String, message: String },
    Error(String),
}

/// Sink for user-visible notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier that writes notices to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Success(message) => tracing::info!(notice = %message, "Upload notice"),
            Notice::Warning(message) => tracing::warn!(notice = %message, "Upload notice"),
            Notice::FileFailed { file_name, message } => {
                tracing::error!(file = %file_name, notice = %message, "File upload failed")
            }
            Notice::Error(message) => tracing::error!(notice = %message, "Upload notice"),
        }
    }
}
