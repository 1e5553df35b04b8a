//! Chunk Scheduler Integration Tests
//!
//! Exercises the scheduler on its own: chunk coverage, aggregate failure
//! reporting, progress accounting and the concurrency bound.

mod common;

#[cfg(test)]
mod tests {
    use super::common::{FakeBackend, MIB};
    use kumo_uploadr::api::ChunkInitRequest;
    use kumo_uploadr::queue::{FilePayload, ItemId, UploadEvent, UploadList};
    use kumo_uploadr::upload::{
        ChunkPlan, ChunkScheduler, ImageBackend, RetryPolicy, UploadError, UploadSession,
    };
    use std::time::Duration;

    fn chunk_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1000), Duration::from_millis(5000))
    }

    /// Open a session on the fake backend the way the orchestrator does
    async fn open_session(
        backend: &FakeBackend,
        file: &FilePayload,
        plan: ChunkPlan,
    ) -> UploadSession {
        let data = backend
            .init_chunked(ChunkInitRequest {
                filename: file.name().to_string(),
                file_size: file.size(),
                total_chunks: plan.total_chunks(),
                nicname: None,
            })
            .await
            .unwrap();
        UploadSession::from(data)
    }

    fn uploading(list: &UploadList, size: usize) -> (ItemId, FilePayload) {
        let file = FilePayload::new("photo.png", vec![1u8; size]);
        let id = list.add(file.clone());
        list.mark_uploading(id);
        (id, file)
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_chunk_uploaded_once() {
        let backend = FakeBackend::new();
        let list = UploadList::new();
        let (id, file) = uploading(&list, 7 * MIB + 123);
        let plan = ChunkPlan::new(file.size(), MIB as u64).unwrap();
        let session = open_session(&backend, &file, plan).await;
        assert_eq!(plan.total_chunks(), 8);

        let summary = ChunkScheduler::new(&backend, &list, chunk_retry())
            .run(id, &file, &session, plan, 5)
            .await
            .unwrap();

        assert_eq!(summary.total_chunks, 8);
        assert_eq!(summary.attempts, 8);
        let mut indices = backend.chunk_indices.lock().clone();
        indices.sort_unstable();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        assert_eq!(list.get(id).unwrap().progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failed_indices_are_reported_sorted() {
        let backend = FakeBackend::new().failing_chunk(3).failing_chunk(1);
        let list = UploadList::new();
        let (id, file) = uploading(&list, 5 * MIB);
        let plan = ChunkPlan::new(file.size(), MIB as u64).unwrap();
        let session = open_session(&backend, &file, plan).await;

        let result = ChunkScheduler::new(&backend, &list, chunk_retry())
            .run(id, &file, &session, plan, 5)
            .await;

        match result {
            Err(UploadError::ChunksFailed { failed, .. }) => assert_eq!(failed, vec![1, 3]),
            other => panic!("expected aggregate failure, got {:?}", other),
        }
        // 3 good chunks once, 2 bad chunks three times each
        assert_eq!(FakeBackend::count(&backend.chunk_calls), 9);
        assert_eq!(list.get(id).unwrap().progress, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let backend = FakeBackend::new()
            .with_latency(Duration::ZERO)
            .failing_chunk(0);
        let list = UploadList::new();
        let (id, file) = uploading(&list, 1024);
        let plan = ChunkPlan::new(file.size(), MIB as u64).unwrap();
        let session = open_session(&backend, &file, plan).await;

        let started = tokio::time::Instant::now();
        let result = ChunkScheduler::new(&backend, &list, chunk_retry())
            .run(id, &file, &session, plan, 5)
            .await;

        assert!(result.is_err());
        // 2000 ms after the first failure, 4000 ms after the second
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(6000), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(6100), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_counts_each_chunk_once() {
        let backend = FakeBackend::new().flaky_chunk(0, 1).flaky_chunk(2, 2);
        let list = UploadList::new();
        let (id, file) = uploading(&list, 4 * MIB);
        let plan = ChunkPlan::new(file.size(), MIB as u64).unwrap();
        let session = open_session(&backend, &file, plan).await;
        let mut events = list.subscribe();

        ChunkScheduler::new(&backend, &list, chunk_retry())
            .run(id, &file, &session, plan, 2)
            .await
            .unwrap();

        let mut progress = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let UploadEvent::Progress { progress: p, .. } = event {
                progress.push(p);
            }
        }
        assert_eq!(progress, vec![25, 50, 75, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_respected() {
        for concurrency in [1, 2, 5] {
            let backend = FakeBackend::new();
            let list = UploadList::new();
            let (id, file) = uploading(&list, 10 * MIB);
            let plan = ChunkPlan::new(file.size(), MIB as u64).unwrap();
            let session = open_session(&backend, &file, plan).await;

            ChunkScheduler::new(&backend, &list, chunk_retry())
                .run(id, &file, &session, plan, concurrency)
                .await
                .unwrap();

            assert_eq!(backend.chunk_in_flight.peak(), concurrency);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fewer_chunks_than_workers() {
        let backend = FakeBackend::new();
        let list = UploadList::new();
        let (id, file) = uploading(&list, 2 * MIB);
        let plan = ChunkPlan::new(file.size(), MIB as u64).unwrap();
        let session = open_session(&backend, &file, plan).await;

        ChunkScheduler::new(&backend, &list, chunk_retry())
            .run(id, &file, &session, plan, 5)
            .await
            .unwrap();

        assert_eq!(backend.chunk_in_flight.peak(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_must_match_session_count() {
        let backend = FakeBackend::new();
        let list = UploadList::new();
        let (id, file) = uploading(&list, 5 * MIB);
        let requested = ChunkPlan::new(file.size(), MIB as u64).unwrap();
        let session = open_session(&backend, &file, requested).await;
        let other = ChunkPlan::new(file.size(), 2 * MIB as u64).unwrap();

        let result = ChunkScheduler::new(&backend, &list, chunk_retry())
            .run(id, &file, &session, other, 5)
            .await;

        assert!(matches!(
            result,
            Err(UploadError::SessionMismatch { announced: 5, .. })
        ));
        assert_eq!(FakeBackend::count(&backend.chunk_calls), 0);
    }
}
