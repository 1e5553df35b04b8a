//! Batch upload coordinator
//!
//! Runs file orchestrations through the bounded pool, refreshes the persisted
//! image list once everything has settled and reports an aggregate summary.

use super::pool::run_bounded;
use super::{FileOrchestrator, ImageBackend, ItemOutcome, Notice, Notifier, RefreshHook};
use crate::config::UploadConfig;
use crate::metrics;
use crate::queue::{ItemId, UploadList};
use std::fmt;
use std::sync::Arc;

/// Aggregate result of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSummary {
    /// Nothing was attempted
    Empty,
    AllSucceeded { total: usize },
    Partial { succeeded: usize, total: usize },
    AllFailed { total: usize },
}

impl BatchSummary {
    /// Classify `succeeded` out of `total` attempted items
    pub fn classify(succeeded: usize, total: usize) -> Self {
        match (succeeded, total) {
            (_, 0) => BatchSummary::Empty,
            (s, t) if s == t => BatchSummary::AllSucceeded { total: t },
            (0, t) => BatchSummary::AllFailed { total: t },
            (s, t) => BatchSummary::Partial {
                succeeded: s,
                total: t,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchSummary::Empty => "empty",
            BatchSummary::AllSucceeded { .. } => "all_succeeded",
            BatchSummary::Partial { .. } => "partial",
            BatchSummary::AllFailed { .. } => "all_failed",
        }
    }

    /// User-visible notice for this summary
    pub fn notice(&self) -> Notice {
        match *self {
            BatchSummary::Empty => Notice::Warning("No pending files to upload".into()),
            BatchSummary::AllSucceeded { .. } => Notice::Success(self.to_string()),
            BatchSummary::Partial { .. } => Notice::Warning(self.to_string()),
            BatchSummary::AllFailed { .. } => Notice::Error(self.to_string()),
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BatchSummary::Empty => write!(f, "0/0 uploaded, nothing to do"),
            BatchSummary::AllSucceeded { total } => {
                write!(f, "{}/{} uploaded, all files complete", total, total)
            }
            BatchSummary::Partial { succeeded, total } => write!(
                f,
                "{}/{} uploaded, {} failed",
                succeeded,
                total,
                total - succeeded
            ),
            BatchSummary::AllFailed { total } => {
                write!(f, "0/{} uploaded, all files failed", total)
            }
        }
    }
}

/// Per-item outcomes plus the aggregate summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// In completion order
    pub outcomes: Vec<(ItemId, ItemOutcome)>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn outcome(&self, id: ItemId) -> Option<&ItemOutcome> {
        self.outcomes
            .iter()
            .find(|(item, _)| *item == id)
            .map(|(_, outcome)| outcome)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_skipped()).count()
    }
}

/// Uploads many items with bounded file-level concurrency
pub struct BatchCoordinator {
    orchestrator: FileOrchestrator,
    refresh: Arc<dyn RefreshHook>,
    file_concurrency: usize,
}

impl BatchCoordinator {
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        list: Arc<UploadList>,
        notifier: Arc<dyn Notifier>,
        refresh: Arc<dyn RefreshHook>,
        config: &UploadConfig,
    ) -> Self {
        Self {
            orchestrator: FileOrchestrator::new(backend, list, notifier, config.clone()),
            refresh,
            file_concurrency: config.file_concurrency,
        }
    }

    pub fn list(&self) -> &Arc<UploadList> {
        self.orchestrator.list()
    }

    /// Upload every item currently `waiting`, in enqueue order
    pub async fn upload_pending(&self) -> BatchReport {
        let ids = self.list().waiting_ids();
        self.upload_all(ids).await
    }

    /// Upload `ids`; items removed or no longer `waiting` are skipped.
    ///
    /// The image list is refreshed exactly once after every item settles,
    /// unless nothing was attempted.
    #[tracing::instrument(
        name = "upload.batch",
        skip_all,
        fields(files = tracing::field::Empty, concurrency = self.file_concurrency)
    )]
    pub async fn upload_all(&self, ids: Vec<ItemId>) -> BatchReport {
        tracing::Span::current().record("files", ids.len());

        let orchestrator = &self.orchestrator;
        let outcomes = run_bounded(ids, self.file_concurrency, |id| async move {
            (id, orchestrator.upload(id).await)
        })
        .await;

        let attempted = outcomes.iter().filter(|(_, o)| !o.is_skipped()).count();
        let succeeded = outcomes.iter().filter(|(_, o)| o.is_success()).count();
        let summary = BatchSummary::classify(succeeded, attempted);

        if summary != BatchSummary::Empty {
            self.refresh.refresh().await;
        }

        metrics::record_batch(summary.as_str());
        tracing::info!(
            attempted = attempted,
            succeeded = succeeded,
            skipped = outcomes.len() - attempted,
            summary = %summary,
            "Batch settled"
        );
        self.orchestrator.notifier().notify(summary.notice());

        BatchReport { outcomes, summary }
    }
}
