//! Chunk planning
//!
//! Splits a file of `size` bytes into `ceil(size / chunk_size)` contiguous,
//! non-overlapping byte ranges that exactly cover `[0, size)`.

use super::{UploadError, UploadSession};
use std::ops::Range;

/// Byte-range layout of a chunked upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkPlan {
    /// Plan `size` bytes in chunks of `chunk_size`.
    ///
    /// A zero-byte file yields a plan with zero chunks.
    pub fn new(size: u64, chunk_size: u64) -> Result<Self, UploadError> {
        if chunk_size == 0 {
            return Err(UploadError::InvalidChunkSize);
        }
        let total_chunks = u32::try_from(size.div_ceil(chunk_size))
            .map_err(|_| UploadError::InvalidChunkSize)?;

        Ok(Self {
            size,
            chunk_size,
            total_chunks,
        })
    }

    /// Plan whose chunk count matches an open session.
    ///
    /// The server checks chunk indices and merge completeness against the
    /// session's `total_chunks`, so that count is authoritative. The
    /// negotiated chunk size is used when it yields that count, else the
    /// requested one. Neither fitting is a `SessionMismatch`.
    pub fn for_session(
        size: u64,
        requested_chunk_size: u64,
        session: &UploadSession,
    ) -> Result<Self, UploadError> {
        [session.chunk_size, requested_chunk_size]
            .into_iter()
            .filter_map(|chunk_size| Self::new(size, chunk_size).ok())
            .find(|plan| plan.total_chunks == session.total_chunks)
            .ok_or_else(|| UploadError::SessionMismatch {
                upload_id: session.upload_id.clone(),
                announced: session.total_chunks,
                chunk_size: session.chunk_size,
            })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn is_empty(&self) -> bool {
        self.total_chunks == 0
    }

    /// Byte range of chunk `index`, or `None` past the last chunk
    pub fn range(&self, index: u32) -> Option<Range<u64>> {
        if index >= self.total_chunks {
            return None;
        }
        let start = u64::from(index) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.size);
        Some(start..end)
    }

    /// All chunk ranges in index order
    pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        (0..self.total_chunks).filter_map(move |index| self.range(index))
    }
}
