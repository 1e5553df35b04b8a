//! Chunk transfer worker
//!
//! Transfers exactly one byte range of a file. Holds only borrowed, read-only
//! state, so any number of workers may run concurrently for different indices
//! of the same session.

use super::{ChunkPlan, ImageBackend, UploadError, UploadSession};
use crate::api::{ChunkUploadData, ChunkUploadRequest};
use crate::queue::FilePayload;

/// Sends chunks of one file within one upload session
#[derive(Clone, Copy)]
pub struct ChunkWorker<'a> {
    backend: &'a dyn ImageBackend,
    session: &'a UploadSession,
    plan: ChunkPlan,
    file: &'a FilePayload,
}

impl<'a> ChunkWorker<'a> {
    pub fn new(
        backend: &'a dyn ImageBackend,
        session: &'a UploadSession,
        plan: ChunkPlan,
        file: &'a FilePayload,
    ) -> Self {
        Self {
            backend,
            session,
            plan,
            file,
        }
    }

    /// Upload chunk `index`. A single attempt; retry is the caller's concern.
    #[tracing::instrument(
        name = "upload.chunk",
        skip(self),
        fields(upload_id = %self.session.upload_id, file = %self.file.name()),
        level = "debug"
    )]
    pub async fn upload(&self, index: u32) -> Result<ChunkUploadData, UploadError> {
        let range = self
            .plan
            .range(index)
            .ok_or(UploadError::ChunkOutOfRange {
                index,
                total: self.plan.total_chunks(),
            })?;

        // Ranges never exceed the file size, so the casts cannot truncate
        let body = self
            .file
            .data()
            .slice(range.start as usize..range.end as usize);

        let request = ChunkUploadRequest {
            upload_id: self.session.upload_id.clone(),
            chunk_index: index,
            total_chunks: self.session.total_chunks,
            filename: self.file.name().to_string(),
            body,
        };

        Ok(self.backend.upload_chunk(request).await?)
    }
}
