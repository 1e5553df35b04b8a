//! Upload item types

use bytes::Bytes;
use std::fmt;
use std::path::Path;

/// Stable identity of an upload item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(uuid::Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Upload state of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    Waiting,
    Uploading,
    Success,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Waiting => "waiting",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Success => "success",
            UploadStatus::Error => "error",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File content plus the metadata sent along with it.
///
/// Content is held in memory for the item's lifetime; cloning is cheap and
/// chunk slices share the same buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct FilePayload {
    name: String,
    mime_type: String,
    data: Bytes,
}

impl FilePayload {
    /// Build a payload from in-memory bytes; the MIME type is guessed from `name`
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            name,
            mime_type,
            data: data.into(),
        }
    }

    /// Read a file from disk
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl fmt::Debug for FilePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePayload")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

/// One file enqueued by the user
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: ItemId,
    pub file: FilePayload,
    /// User-editable annotation, sent as the image nickname
    pub display_label: String,
    pub status: UploadStatus,
    /// 0..=100
    pub progress: u8,
    pub last_error: Option<String>,
    pub(crate) seq: u64,
}

impl UploadItem {
    pub(crate) fn new(file: FilePayload, seq: u64) -> Self {
        Self {
            id: ItemId::new(),
            display_label: file.name().to_string(),
            file,
            status: UploadStatus::Waiting,
            progress: 0,
            last_error: None,
            seq,
        }
    }
}
