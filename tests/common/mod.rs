//! Shared test infrastructure
//!
//! - `FakeBackend`: in-process image backend with scripted failures, call
//!   counters, latency and in-flight tracking. Sessions follow the server's
//!   contract: init stores the requested chunk count, chunk indices are
//!   checked against it, and merge needs every index.
//! - `RecordingNotifier`: captures user-visible notices
//! - `CountingRefresh`: counts post-batch refreshes

#![allow(dead_code)]

use async_trait::async_trait;
use kumo_uploadr::api::{
    ApiError, ChunkInitData, ChunkInitRequest, ChunkUploadData, ChunkUploadRequest,
    SingleUploadRequest, UploadResponseData,
};
use kumo_uploadr::upload::{ImageBackend, Notice, Notifier, RefreshHook};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const MIB: usize = 1024 * 1024;

/// Tracks current and peak concurrent calls
#[derive(Default)]
pub struct InFlight {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Scriptable in-process backend
pub struct FakeBackend {
    latency: Duration,
    /// Negotiated chunk size returned by init
    chunk_size: u64,
    /// Announce `ceil(size / chunk_size)` instead of echoing the request
    own_chunk_count: bool,
    /// Stored chunk count and arrived indices per upload id
    sessions: Mutex<HashMap<String, (u32, HashSet<u32>)>>,
    /// Chunk indices that always fail
    failing_chunks: HashSet<u32>,
    /// Remaining transient failures per chunk index
    flaky_chunks: Mutex<HashMap<u32, u32>>,
    /// Application error returned by every single-shot call for these names
    rejected_files: HashMap<String, String>,

    pub single_calls: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub chunk_calls: AtomicUsize,
    pub merge_calls: AtomicUsize,
    pub completed_merges: AtomicUsize,
    pub single_names: Mutex<Vec<String>>,
    pub chunk_indices: Mutex<Vec<u32>>,
    pub chunk_in_flight: InFlight,
    pub file_in_flight: InFlight,
    next_session: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(50),
            chunk_size: MIB as u64,
            own_chunk_count: false,
            sessions: Mutex::new(HashMap::new()),
            failing_chunks: HashSet::new(),
            flaky_chunks: Mutex::new(HashMap::new()),
            rejected_files: HashMap::new(),
            single_calls: AtomicUsize::new(0),
            init_calls: AtomicUsize::new(0),
            chunk_calls: AtomicUsize::new(0),
            merge_calls: AtomicUsize::new(0),
            completed_merges: AtomicUsize::new(0),
            single_names: Mutex::new(Vec::new()),
            chunk_indices: Mutex::new(Vec::new()),
            chunk_in_flight: InFlight::default(),
            file_in_flight: InFlight::default(),
            next_session: AtomicUsize::new(0),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn announcing_own_chunk_count(mut self) -> Self {
        self.own_chunk_count = true;
        self
    }

    pub fn failing_chunk(mut self, index: u32) -> Self {
        self.failing_chunks.insert(index);
        self
    }

    pub fn flaky_chunk(self, index: u32, failures: u32) -> Self {
        self.flaky_chunks.lock().insert(index, failures);
        self
    }

    pub fn rejecting(mut self, file_name: &str, message: &str) -> Self {
        self.rejected_files
            .insert(file_name.to_string(), message.to_string());
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn stored() -> UploadResponseData {
        UploadResponseData {
            uploaded: 1,
            failed: 0,
            images: Vec::new(),
        }
    }
}

#[async_trait]
impl ImageBackend for FakeBackend {
    async fn upload_single(
        &self,
        request: SingleUploadRequest,
    ) -> Result<UploadResponseData, ApiError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.single_names.lock().push(request.filename.clone());
        self.file_in_flight.enter();
        tokio::time::sleep(self.latency).await;
        self.file_in_flight.exit();

        match self.rejected_files.get(&request.filename) {
            Some(message) => Err(ApiError::Application {
                code: 1,
                message: message.clone(),
            }),
            None => Ok(Self::stored()),
        }
    }

    async fn init_chunked(&self, request: ChunkInitRequest) -> Result<ChunkInitData, ApiError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let session = self.next_session.fetch_add(1, Ordering::SeqCst);
        let upload_id = format!("session-{}", session);
        let total_chunks = if self.own_chunk_count {
            request.file_size.div_ceil(self.chunk_size) as u32
        } else {
            request.total_chunks
        };
        self.sessions
            .lock()
            .insert(upload_id.clone(), (total_chunks, HashSet::new()));
        Ok(ChunkInitData {
            upload_id,
            chunk_size: self.chunk_size,
            total_chunks,
        })
    }

    async fn upload_chunk(&self, request: ChunkUploadRequest) -> Result<ChunkUploadData, ApiError> {
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);
        self.chunk_indices.lock().push(request.chunk_index);
        self.chunk_in_flight.enter();
        tokio::time::sleep(self.latency).await;
        self.chunk_in_flight.exit();

        if self.failing_chunks.contains(&request.chunk_index) {
            return Err(ApiError::Status {
                status: 500,
                message: format!("chunk {} corrupted", request.chunk_index),
            });
        }

        {
            let mut flaky = self.flaky_chunks.lock();
            if let Some(remaining) = flaky.get_mut(&request.chunk_index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ApiError::Transport("connection reset".into()));
                }
            }
        }

        let mut sessions = self.sessions.lock();
        let Some((total, arrived)) = sessions.get_mut(&request.upload_id) else {
            return Err(ApiError::Status {
                status: 404,
                message: "upload session not found".into(),
            });
        };
        if request.chunk_index >= *total {
            return Err(ApiError::Status {
                status: 400,
                message: format!("chunk index must be within 0-{}", *total as i64 - 1),
            });
        }
        arrived.insert(request.chunk_index);

        Ok(ChunkUploadData {
            uploaded_chunks: arrived.len() as u32,
            total_chunks: *total,
            is_completed: arrived.len() as u32 == *total,
        })
    }

    async fn merge(&self, upload_id: &str) -> Result<UploadResponseData, ApiError> {
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        let sessions = self.sessions.lock();
        let Some((total, arrived)) = sessions.get(upload_id) else {
            return Err(ApiError::Status {
                status: 404,
                message: "upload session not found".into(),
            });
        };
        let missing = *total as usize - arrived.len();
        if missing > 0 {
            return Err(ApiError::Status {
                status: 400,
                message: format!("{} chunks missing", missing),
            });
        }
        self.completed_merges.fetch_add(1, Ordering::SeqCst);
        Ok(Self::stored())
    }
}

/// Captures every notice
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Counts refresh calls
#[derive(Default)]
pub struct CountingRefresh {
    calls: AtomicUsize,
}

impl CountingRefresh {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshHook for CountingRefresh {
    async fn refresh(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
