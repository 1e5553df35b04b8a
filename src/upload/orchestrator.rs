//! File upload orchestrator
//!
//! Drives one upload item from `waiting` to `success` or `error`:
//!
//! 1. Claim the item (`waiting -> uploading`); anything else is skipped
//! 2. Pick a strategy from the file size
//! 3. Run one attempt (single-shot, or init + chunks + merge)
//! 4. On failure, back off and retry (`uploading -> waiting -> uploading`)
//!    until `max_file_retries` attempts are spent
//! 5. Report the final failure verbatim through the `Notifier`
//!
//! Every chunked attempt opens a fresh session; sessions are never reused.

use super::{
    ChunkPlan, ChunkScheduler, ImageBackend, Notice, Notifier, UploadError, UploadSession,
};
use crate::api::{ChunkInitRequest, SingleUploadRequest, UploadResponseData};
use crate::config::UploadConfig;
use crate::metrics;
use crate::queue::{ItemId, UploadItem, UploadList};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::field::Empty;

/// Simulated progress step on the single-shot path
const SIMULATED_PROGRESS_STEP: u8 = 10;

/// Simulated progress never passes this until the server confirms
const SIMULATED_PROGRESS_CEILING: u8 = 90;

/// Transfer path for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    SingleShot,
    Chunked,
}

impl UploadStrategy {
    /// Files strictly larger than `threshold` are chunked. Zero-byte files are
    /// always single-shot.
    pub fn for_size(size: u64, threshold: u64) -> Self {
        if size > 0 && size > threshold {
            UploadStrategy::Chunked
        } else {
            UploadStrategy::SingleShot
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStrategy::SingleShot => "single_shot",
            UploadStrategy::Chunked => "chunked",
        }
    }
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded {
        strategy: UploadStrategy,
        attempts: u32,
    },
    Failed {
        strategy: UploadStrategy,
        attempts: u32,
        message: String,
    },
    /// Item was missing or not `waiting` when its turn came, so no attempt
    /// was made. An item that leaves during retry backoff has been attempted
    /// and is `Failed` with its last error instead.
    Skipped,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ItemOutcome::Skipped)
    }
}

/// Per-file strategy selection, retry and state updates
pub struct FileOrchestrator {
    backend: Arc<dyn ImageBackend>,
    list: Arc<UploadList>,
    notifier: Arc<dyn Notifier>,
    config: UploadConfig,
}

impl FileOrchestrator {
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        list: Arc<UploadList>,
        notifier: Arc<dyn Notifier>,
        config: UploadConfig,
    ) -> Self {
        Self {
            backend,
            list,
            notifier,
            config,
        }
    }

    pub fn list(&self) -> &Arc<UploadList> {
        &self.list
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload item `id` to completion, retrying failed attempts
    #[tracing::instrument(
        name = "upload.file",
        skip(self),
        fields(file = Empty, strategy = Empty, attempts = Empty)
    )]
    pub async fn upload(&self, id: ItemId) -> ItemOutcome {
        let Some(item) = self.list.get(id) else {
            tracing::debug!("Item no longer in the list, skipping");
            return ItemOutcome::Skipped;
        };
        if !self.list.mark_uploading(id) {
            tracing::debug!(status = %item.status, "Item is not waiting, skipping");
            return ItemOutcome::Skipped;
        }

        let strategy = UploadStrategy::for_size(item.file.size(), self.config.chunk_threshold);
        let span = tracing::Span::current();
        span.record("file", item.file.name());
        span.record("strategy", strategy.as_str());

        let retry = self.config.file_retry();
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = match strategy {
                UploadStrategy::SingleShot => self.upload_single(&item).await,
                UploadStrategy::Chunked => self.upload_chunked(&item).await,
            };

            let err = match result {
                Ok(()) => {
                    span.record("attempts", attempts);
                    self.list.mark_success(id);
                    metrics::record_file_success(
                        strategy.as_str(),
                        item.file.size(),
                        started.elapsed().as_secs_f64(),
                    );
                    tracing::info!(
                        size = item.file.size(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "File uploaded"
                    );
                    return ItemOutcome::Succeeded { strategy, attempts };
                }
                Err(e) => e,
            };
            metrics::record_error(err.kind());

            if attempts >= retry.max_attempts() {
                span.record("attempts", attempts);
                let message = err.to_string();
                self.list.mark_error(id, message.clone());
                metrics::record_file_failure(strategy.as_str(), started.elapsed().as_secs_f64());
                tracing::error!(error = %err, "File upload failed after retries");
                self.notifier.notify(Notice::FileFailed {
                    file_name: item.file.name().to_string(),
                    message: message.clone(),
                });
                return ItemOutcome::Failed {
                    strategy,
                    attempts,
                    message,
                };
            }

            let delay = retry.delay_for(attempts);
            tracing::warn!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "File upload attempt failed, retrying"
            );
            self.list.mark_waiting(id);
            tokio::time::sleep(delay).await;

            if !self.list.mark_uploading(id) {
                // Removed by the user, or claimed elsewhere, while backing off
                span.record("attempts", attempts);
                tracing::info!(error = %err, "Item left the retry cycle during backoff");
                metrics::record_file_failure(strategy.as_str(), started.elapsed().as_secs_f64());
                return ItemOutcome::Failed {
                    strategy,
                    attempts,
                    message: err.to_string(),
                };
            }
            metrics::record_file_retry();
        }
    }

    /// One single-shot attempt with simulated progress
    async fn upload_single(&self, item: &UploadItem) -> Result<(), UploadError> {
        let request = SingleUploadRequest {
            filename: item.file.name().to_string(),
            mime_type: item.file.mime_type().to_string(),
            body: item.file.data().clone(),
            nicname: nicname(item),
        };

        let tick = self.config.progress_tick().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
        let upload = self.backend.upload_single(request);
        tokio::pin!(upload);

        let response = loop {
            tokio::select! {
                result = &mut upload => break result?,
                _ = ticker.tick() => {
                    self.list.advance_progress(
                        item.id,
                        SIMULATED_PROGRESS_STEP,
                        SIMULATED_PROGRESS_CEILING,
                    );
                }
            }
        };

        ensure_accepted(&response)
    }

    /// One chunked attempt: init, all chunks, merge
    async fn upload_chunked(&self, item: &UploadItem) -> Result<(), UploadError> {
        let size = item.file.size();
        let requested = ChunkPlan::new(size, self.config.chunk_size)?;

        let init = ChunkInitRequest {
            filename: item.file.name().to_string(),
            file_size: size,
            total_chunks: requested.total_chunks(),
            nicname: nicname(item),
        };
        let session = UploadSession::from(self.backend.init_chunked(init).await?);

        let plan = ChunkPlan::for_session(size, self.config.chunk_size, &session)?;
        if plan.chunk_size() != session.chunk_size {
            tracing::debug!(
                upload_id = %session.upload_id,
                negotiated = session.chunk_size,
                chunk_size = plan.chunk_size(),
                chunks = session.total_chunks,
                "Server chunk size does not fit its chunk count, keeping the requested size"
            );
        }

        let scheduler =
            ChunkScheduler::new(self.backend.as_ref(), &self.list, self.config.chunk_retry());
        let summary = scheduler
            .run(
                item.id,
                &item.file,
                &session,
                plan,
                self.config.chunk_concurrency,
            )
            .await?;
        tracing::debug!(
            upload_id = %session.upload_id,
            chunks = summary.total_chunks,
            chunk_attempts = summary.attempts,
            "All chunks uploaded, merging"
        );

        let merged = self.backend.merge(&session.upload_id).await?;
        ensure_accepted(&merged)
    }
}

/// The label is sent as the image nickname when set
fn nicname(item: &UploadItem) -> Option<String> {
    let label = item.display_label.trim();
    (!label.is_empty()).then(|| label.to_string())
}

/// A zero code with nothing stored and a failure count is still a rejection
fn ensure_accepted(response: &UploadResponseData) -> Result<(), UploadError> {
    if response.uploaded == 0 && response.failed > 0 {
        return Err(UploadError::Rejected);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ChunkInitData, ChunkUploadData};
    use crate::queue::{FilePayload, UploadStatus};
    use crate::upload::MockImageBackend;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: Notice) {
            self.notices.lock().push(notice);
        }
    }

    fn config() -> UploadConfig {
        UploadConfig {
            chunk_threshold: 16,
            chunk_size: 4,
            ..UploadConfig::default()
        }
    }

    fn stored() -> UploadResponseData {
        UploadResponseData {
            uploaded: 1,
            failed: 0,
            images: Vec::new(),
        }
    }

    fn ack() -> ChunkUploadData {
        ChunkUploadData {
            uploaded_chunks: 1,
            total_chunks: 1,
            is_completed: false,
        }
    }

    fn setup(
        backend: MockImageBackend,
        name: &str,
        size: usize,
    ) -> (FileOrchestrator, ItemId, Arc<RecordingNotifier>) {
        let list = Arc::new(UploadList::new());
        let id = list.add(FilePayload::new(name, vec![1u8; size]));
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = FileOrchestrator::new(
            Arc::new(backend),
            list,
            notifier.clone(),
            config(),
        );
        (orchestrator, id, notifier)
    }

    #[test]
    fn test_strategy_threshold_is_exclusive() {
        assert_eq!(UploadStrategy::for_size(16, 16), UploadStrategy::SingleShot);
        assert_eq!(UploadStrategy::for_size(17, 16), UploadStrategy::Chunked);
        assert_eq!(UploadStrategy::for_size(0, 0), UploadStrategy::SingleShot);
    }

    #[tokio::test]
    async fn test_small_file_uses_single_shot() {
        let mut backend = MockImageBackend::new();
        backend
            .expect_upload_single()
            .withf(|req| {
                req.filename == "cat.png"
                    && req.mime_type == "image/png"
                    && req.nicname.as_deref() == Some("cat.png")
            })
            .times(1)
            .returning(|_| Ok(stored()));

        let (orchestrator, id, notifier) = setup(backend, "cat.png", 8);
        let outcome = orchestrator.upload(id).await;

        assert_eq!(
            outcome,
            ItemOutcome::Succeeded {
                strategy: UploadStrategy::SingleShot,
                attempts: 1
            }
        );
        let item = orchestrator.list().get(id).unwrap();
        assert_eq!(item.status, UploadStatus::Success);
        assert_eq!(item.progress, 100);
        assert!(notifier.notices.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_application_error_surfaced_verbatim() {
        let mut backend = MockImageBackend::new();
        backend.expect_upload_single().times(2).returning(|_| {
            Err(ApiError::Application {
                code: 1,
                message: "quota exceeded".into(),
            })
        });

        let (orchestrator, id, notifier) = setup(backend, "cat.png", 8);
        let outcome = orchestrator.upload(id).await;

        assert_eq!(
            outcome,
            ItemOutcome::Failed {
                strategy: UploadStrategy::SingleShot,
                attempts: 2,
                message: "quota exceeded".into()
            }
        );
        let item = orchestrator.list().get(id).unwrap();
        assert_eq!(item.status, UploadStatus::Error);
        assert_eq!(item.progress, 0);
        assert_eq!(item.last_error.as_deref(), Some("quota exceeded"));
        assert_eq!(
            *notifier.notices.lock(),
            vec![Notice::FileFailed {
                file_name: "cat.png".into(),
                message: "quota exceeded".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_zero_code_with_failures_is_rejected() {
        let mut backend = MockImageBackend::new();
        backend.expect_upload_single().times(2).returning(|_| {
            Ok(UploadResponseData {
                uploaded: 0,
                failed: 1,
                images: Vec::new(),
            })
        });

        let (mut orchestrator, id, _) = setup(backend, "cat.png", 8);
        orchestrator.config.retry_base_delay_ms = 0;
        let outcome = orchestrator.upload(id).await;
        assert!(matches!(outcome, ItemOutcome::Failed { ref message, .. } if message == "Server rejected the file"));
    }

    #[tokio::test]
    async fn test_zero_byte_file_is_single_shot() {
        let mut backend = MockImageBackend::new();
        backend
            .expect_upload_single()
            .withf(|req| req.body.is_empty())
            .times(1)
            .returning(|_| Ok(stored()));

        let (orchestrator, id, _) = setup(backend, "empty.png", 0);
        assert!(orchestrator.upload(id).await.is_success());
    }

    #[tokio::test]
    async fn test_negotiated_chunk_size_is_respected() {
        let mut backend = MockImageBackend::new();
        backend
            .expect_init_chunked()
            .withf(|req| req.file_size == 20 && req.total_chunks == 5)
            .times(1)
            .returning(|_| {
                Ok(ChunkInitData {
                    upload_id: "u-1".into(),
                    chunk_size: 10,
                    total_chunks: 2,
                })
            });
        backend
            .expect_upload_chunk()
            .withf(|req| req.body.len() == 10 && req.total_chunks == 2)
            .times(2)
            .returning(|_| Ok(ack()));
        backend
            .expect_merge()
            .withf(|upload_id| upload_id.to_string() == "u-1")
            .times(1)
            .returning(|_| Ok(stored()));

        let (orchestrator, id, _) = setup(backend, "big.bin", 20);
        let outcome = orchestrator.upload(id).await;
        assert_eq!(
            outcome,
            ItemOutcome::Succeeded {
                strategy: UploadStrategy::Chunked,
                attempts: 1
            }
        );
        assert_eq!(orchestrator.list().get(id).unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_echoed_chunk_count_keeps_requested_size() {
        let mut backend = MockImageBackend::new();
        backend
            .expect_init_chunked()
            .times(1)
            .returning(|req| {
                Ok(ChunkInitData {
                    upload_id: "u-1".into(),
                    chunk_size: 10,
                    total_chunks: req.total_chunks,
                })
            });
        backend
            .expect_upload_chunk()
            .withf(|req| req.body.len() == 4 && req.total_chunks == 5 && req.chunk_index < 5)
            .times(5)
            .returning(|_| Ok(ack()));
        backend
            .expect_merge()
            .withf(|upload_id| upload_id.to_string() == "u-1")
            .times(1)
            .returning(|_| Ok(stored()));

        let (orchestrator, id, _) = setup(backend, "big.bin", 20);
        assert_eq!(
            orchestrator.upload(id).await,
            ItemOutcome::Succeeded {
                strategy: UploadStrategy::Chunked,
                attempts: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfittable_session_sends_no_chunks() {
        let mut backend = MockImageBackend::new();
        backend.expect_init_chunked().times(2).returning(|_| {
            Ok(ChunkInitData {
                upload_id: "u-1".into(),
                chunk_size: 10,
                total_chunks: 7,
            })
        });
        backend.expect_upload_chunk().times(0);
        backend.expect_merge().times(0);

        let (orchestrator, id, _) = setup(backend, "big.bin", 20);
        let outcome = orchestrator.upload(id).await;
        assert!(
            matches!(outcome, ItemOutcome::Failed { attempts: 2, ref message, .. } if message.contains("announces 7 chunk(s)")),
            "{:?}",
            outcome
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_failure_reopens_session() {
        let mut backend = MockImageBackend::new();
        let mut session_no = 0;
        backend.expect_init_chunked().times(2).returning(move |_| {
            session_no += 1;
            Ok(ChunkInitData {
                upload_id: format!("u-{}", session_no),
                chunk_size: 4,
                total_chunks: 5,
            })
        });
        backend
            .expect_upload_chunk()
            .times(10)
            .returning(|_| Ok(ack()));
        backend
            .expect_merge()
            .withf(|upload_id| upload_id.to_string() == "u-1")
            .times(1)
            .returning(|_| {
                Err(ApiError::Status {
                    status: 500,
                    message: "merge failed".into(),
                })
            });
        backend
            .expect_merge()
            .withf(|upload_id| upload_id.to_string() == "u-2")
            .times(1)
            .returning(|_| Ok(stored()));

        let (orchestrator, id, _) = setup(backend, "big.bin", 20);
        let outcome = orchestrator.upload(id).await;
        assert_eq!(
            outcome,
            ItemOutcome::Succeeded {
                strategy: UploadStrategy::Chunked,
                attempts: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_during_backoff_counts_as_failed() {
        let mut backend = MockImageBackend::new();
        backend.expect_upload_single().times(1).returning(|_| {
            Err(ApiError::Application {
                code: 1,
                message: "quota exceeded".into(),
            })
        });

        let (orchestrator, id, notifier) = setup(backend, "cat.png", 8);
        let list = orchestrator.list().clone();
        let upload = orchestrator.upload(id);
        tokio::pin!(upload);

        // Drive the first attempt until the item is back to waiting
        loop {
            tokio::select! {
                outcome = &mut upload => panic!("settled early: {:?}", outcome),
                _ = tokio::task::yield_now() => {}
            }
            if list.status(id) == Some(UploadStatus::Waiting) {
                break;
            }
        }
        list.remove(id);

        assert_eq!(
            upload.await,
            ItemOutcome::Failed {
                strategy: UploadStrategy::SingleShot,
                attempts: 1,
                message: "quota exceeded".into()
            }
        );
        assert!(notifier.notices.lock().is_empty());
    }

    #[tokio::test]
    async fn test_non_waiting_item_is_skipped() {
        let backend = MockImageBackend::new();
        let (orchestrator, id, _) = setup(backend, "cat.png", 8);
        orchestrator.list().mark_uploading(id);

        assert_eq!(orchestrator.upload(id).await, ItemOutcome::Skipped);
        assert_eq!(orchestrator.upload(ItemId::new()).await, ItemOutcome::Skipped);
    }
}
