//! Pending upload list
//!
//! Upload items live in a keyed map and change only through explicit,
//! id-keyed transitions. Every transition is total: it either applies to the
//! item in its current state or is a no-op returning `false`, so concurrent
//! chunk and file workers can never leave an item half-updated.
//!
//! # State machine
//!
//! ```text
//! waiting --mark_uploading--> uploading --mark_success--> success
//!    ^                          |    |
//!    +-------mark_waiting-------+    +--mark_error--> error
//!    ^                                                  |
//!    +----------------------requeue---------------------+
//! ```
//!
//! Observers subscribe to `UploadEvent`s through a broadcast channel.

mod item;

pub use item::{FilePayload, ItemId, UploadItem, UploadStatus};

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Change notification for observers of the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Added { id: ItemId },
    Status { id: ItemId, status: UploadStatus },
    Progress { id: ItemId, progress: u8 },
    Removed { id: ItemId },
}

/// Keyed, concurrently mutable list of upload items
pub struct UploadList {
    items: DashMap<ItemId, UploadItem>,
    next_seq: AtomicU64,
    events: broadcast::Sender<UploadEvent>,
}

impl Default for UploadList {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadList {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            items: DashMap::new(),
            next_seq: AtomicU64::new(0),
            events,
        }
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: UploadEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Enqueue a file; it starts in `waiting` with its name as label
    pub fn add(&self, file: FilePayload) -> ItemId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let item = UploadItem::new(file, seq);
        let id = item.id;
        tracing::debug!(item = %id, file = %item.file.name(), size = item.file.size(), "Item enqueued");
        self.items.insert(id, item);
        self.emit(UploadEvent::Added { id });
        id
    }

    pub fn get(&self, id: ItemId) -> Option<UploadItem> {
        self.items.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn status(&self, id: ItemId) -> Option<UploadStatus> {
        self.items.get(&id).map(|entry| entry.status)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All items in enqueue order
    pub fn snapshot(&self) -> Vec<UploadItem> {
        let mut items: Vec<UploadItem> = self
            .items
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by_key(|item| item.seq);
        items
    }

    /// Ids of `waiting` items in enqueue order
    pub fn waiting_ids(&self) -> Vec<ItemId> {
        self.snapshot()
            .into_iter()
            .filter(|item| item.status == UploadStatus::Waiting)
            .map(|item| item.id)
            .collect()
    }

    /// Edit the display label
    pub fn set_label(&self, id: ItemId, label: impl Into<String>) -> bool {
        match self.items.get_mut(&id) {
            Some(mut entry) => {
                entry.display_label = label.into();
                true
            }
            None => false,
        }
    }

    /// Delete an item in any status, releasing its file content.
    ///
    /// An item already being uploaded keeps uploading; its later transitions
    /// become no-ops.
    pub fn remove(&self, id: ItemId) -> Option<UploadItem> {
        let removed = self.items.remove(&id).map(|(_, item)| item);
        if let Some(item) = &removed {
            tracing::debug!(item = %id, status = %item.status, "Item removed");
            self.emit(UploadEvent::Removed { id });
        }
        removed
    }

    /// Apply `f` when the item is in one of `from`; returns whether it applied
    fn transition(
        &self,
        id: ItemId,
        from: &[UploadStatus],
        f: impl FnOnce(&mut UploadItem),
    ) -> Option<UploadItem> {
        let mut entry = self.items.get_mut(&id)?;
        if !from.contains(&entry.status) {
            tracing::debug!(
                item = %id,
                status = %entry.status,
                "Ignoring transition from unexpected state"
            );
            return None;
        }
        f(entry.value_mut());
        Some(entry.value().clone())
    }

    fn emit_status(&self, item: &UploadItem) {
        self.emit(UploadEvent::Status {
            id: item.id,
            status: item.status,
        });
    }

    /// `waiting -> uploading`, progress reset to 0
    pub fn mark_uploading(&self, id: ItemId) -> bool {
        let updated = self.transition(id, &[UploadStatus::Waiting], |item| {
            item.status = UploadStatus::Uploading;
            item.progress = 0;
        });
        updated.map(|item| self.emit_status(&item)).is_some()
    }

    /// Raise progress of an uploading item; never lowers it
    pub fn mark_progress(&self, id: ItemId, progress: u8) -> bool {
        let progress = progress.min(100);
        let mut raised = false;
        let updated = self.transition(id, &[UploadStatus::Uploading], |item| {
            if progress > item.progress {
                item.progress = progress;
                raised = true;
            }
        });
        if updated.is_some() && raised {
            self.emit(UploadEvent::Progress { id, progress });
        }
        raised
    }

    /// Add `step` to the progress of an uploading item without passing `ceiling`
    pub fn advance_progress(&self, id: ItemId, step: u8, ceiling: u8) -> bool {
        match self.items.get(&id) {
            Some(entry) if entry.status == UploadStatus::Uploading => {
                let target = entry.progress.saturating_add(step).min(ceiling);
                drop(entry);
                self.mark_progress(id, target)
            }
            _ => false,
        }
    }

    /// `uploading -> waiting` before an automatic retry, progress reset to 0
    pub fn mark_waiting(&self, id: ItemId) -> bool {
        let updated = self.transition(id, &[UploadStatus::Uploading], |item| {
            item.status = UploadStatus::Waiting;
            item.progress = 0;
        });
        updated.map(|item| self.emit_status(&item)).is_some()
    }

    /// `uploading -> success`, progress 100
    pub fn mark_success(&self, id: ItemId) -> bool {
        let mut raised = false;
        let updated = self.transition(id, &[UploadStatus::Uploading], |item| {
            raised = item.progress < 100;
            item.status = UploadStatus::Success;
            item.progress = 100;
            item.last_error = None;
        });
        updated
            .map(|item| {
                if raised {
                    self.emit(UploadEvent::Progress { id, progress: 100 });
                }
                self.emit_status(&item);
            })
            .is_some()
    }

    /// `uploading -> error`, progress reset to 0
    pub fn mark_error(&self, id: ItemId, message: impl Into<String>) -> bool {
        let message = message.into();
        let updated = self.transition(id, &[UploadStatus::Uploading], |item| {
            item.status = UploadStatus::Error;
            item.progress = 0;
            item.last_error = Some(message);
        });
        updated.map(|item| self.emit_status(&item)).is_some()
    }

    /// `error -> waiting` on user request
    pub fn requeue(&self, id: ItemId) -> bool {
        let updated = self.transition(id, &[UploadStatus::Error], |item| {
            item.status = UploadStatus::Waiting;
            item.progress = 0;
            item.last_error = None;
        });
        updated.map(|item| self.emit_status(&item)).is_some()
    }
}
