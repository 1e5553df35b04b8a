//! Chunk pool scheduler
//!
//! Drives every chunk of one session through a bounded pool of workers.
//! Each chunk is retried independently with capped exponential backoff; the
//! run succeeds only when every chunk has been acknowledged.

use super::pool::run_bounded;
use super::{ChunkPlan, ChunkWorker, ImageBackend, RetryPolicy, UploadError, UploadSession};
use crate::metrics;
use crate::queue::{FilePayload, ItemId, UploadList};
use parking_lot::Mutex;
use std::collections::HashSet;

/// Outcome of a fully successful chunk run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRunSummary {
    pub total_chunks: u32,
    /// Transfer attempts across all chunks, retries included
    pub attempts: u32,
}

/// Per-chunk result reported by a pool consumer
struct ChunkResult {
    index: u32,
    attempts: u32,
    error: Option<String>,
}

/// Runs the chunks of one item with bounded concurrency and per-chunk retry
pub struct ChunkScheduler<'a> {
    backend: &'a dyn ImageBackend,
    list: &'a UploadList,
    retry: RetryPolicy,
}

impl<'a> ChunkScheduler<'a> {
    pub fn new(backend: &'a dyn ImageBackend, list: &'a UploadList, retry: RetryPolicy) -> Self {
        Self {
            backend,
            list,
            retry,
        }
    }

    /// Upload all chunks of `plan` within `session`.
    ///
    /// `plan` must cover exactly the session's `total_chunks`, otherwise the
    /// run fails with `SessionMismatch` before any chunk is sent.
    ///
    /// Progress of `item_id` is raised to `round(100 * completed / total)` on
    /// the first success of each index. Fails with `ChunksFailed` listing the
    /// sorted indices that exhausted their retries.
    #[tracing::instrument(
        name = "upload.chunks",
        skip_all,
        fields(
            item = %item_id,
            upload_id = %session.upload_id,
            chunks.total = plan.total_chunks()
        )
    )]
    pub async fn run(
        &self,
        item_id: ItemId,
        file: &FilePayload,
        session: &UploadSession,
        plan: ChunkPlan,
        concurrency: usize,
    ) -> Result<ChunkRunSummary, UploadError> {
        let total = plan.total_chunks();
        if total != session.total_chunks {
            return Err(UploadError::SessionMismatch {
                upload_id: session.upload_id.clone(),
                announced: session.total_chunks,
                chunk_size: session.chunk_size,
            });
        }
        if plan.is_empty() {
            self.list.mark_progress(item_id, 100);
            return Ok(ChunkRunSummary {
                total_chunks: 0,
                attempts: 0,
            });
        }

        let worker = ChunkWorker::new(self.backend, session, plan, file);
        let completed: Mutex<HashSet<u32>> = Mutex::new(HashSet::with_capacity(total as usize));
        let completed = &completed;
        let worker = &worker;

        let results = run_bounded(0..total, concurrency, |index| async move {
            let mut attempts = 0;
            loop {
                attempts += 1;
                match worker.upload(index).await {
                    Ok(_) => {
                        metrics::record_chunk_attempt(true);
                        self.record_completion(item_id, index, total, completed);
                        return ChunkResult {
                            index,
                            attempts,
                            error: None,
                        };
                    }
                    Err(e) => {
                        metrics::record_chunk_attempt(false);
                        metrics::record_error(e.kind());
                        if attempts >= self.retry.max_attempts() {
                            tracing::warn!(
                                chunk.index = index,
                                attempts = attempts,
                                error = %e,
                                "Chunk failed after retries"
                            );
                            return ChunkResult {
                                index,
                                attempts,
                                error: Some(e.to_string()),
                            };
                        }
                        let delay = self.retry.delay_for(attempts);
                        tracing::debug!(
                            chunk.index = index,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Chunk attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
        .await;

        let attempts = results.iter().map(|r| r.attempts).sum();
        let mut last_error = None;
        let mut failed = Vec::new();
        for result in results {
            if let Some(error) = result.error {
                failed.push(result.index);
                last_error = Some(error);
            }
        }

        match last_error {
            None => Ok(ChunkRunSummary {
                total_chunks: total,
                attempts,
            }),
            Some(last_error) => {
                failed.sort_unstable();
                Err(UploadError::ChunksFailed { failed, last_error })
            }
        }
    }

    /// Count `index` once and publish the new progress
    fn record_completion(
        &self,
        item_id: ItemId,
        index: u32,
        total: u32,
        completed: &Mutex<HashSet<u32>>,
    ) {
        let done = {
            let mut completed = completed.lock();
            if !completed.insert(index) {
                return;
            }
            completed.len() as u64
        };
        self.list.mark_progress(item_id, percent(done, u64::from(total)));
    }
}

/// `round(100 * done / total)`
fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((200 * done + total) / (2 * total)).min(100) as u8
}
