//! Wire types for the image-hosting REST API
//!
//! Every endpoint answers with the same envelope: `{code, message, data}` where
//! `code == 0` means success.

use super::ApiError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Response envelope shared by all endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the payload, turning a non-zero code into an application error
    pub fn into_data(self) -> Result<T, ApiError> {
        if self.code != 0 {
            return Err(ApiError::Application {
                code: self.code,
                message: self.message,
            });
        }
        self.data
            .ok_or_else(|| ApiError::ResponseError("Response envelope has no data".into()))
    }
}

/// Paging metadata returned by list endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// A stored image as returned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub filename: String,
    #[serde(default)]
    pub nicname: String,
    pub url: String,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub gitee_url: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

/// Result of a single-shot upload or a chunk merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponseData {
    pub uploaded: u32,
    pub failed: u32,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// Body of `POST /images/chunk/init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInitRequest {
    pub filename: String,
    pub file_size: u64,
    pub total_chunks: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nicname: Option<String>,
}

/// Session negotiated by `POST /images/chunk/init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInitData {
    pub upload_id: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// Acknowledgement of one uploaded chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUploadData {
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub is_completed: bool,
}

/// Multipart fields of `POST /images/chunk/upload`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUploadRequest {
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub filename: String,
    pub body: Bytes,
}

/// Multipart fields of `POST /images` for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleUploadRequest {
    pub filename: String,
    pub mime_type: String,
    pub body: Bytes,
    pub nicname: Option<String>,
}

/// Query parameters of `GET /images`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_like: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

/// One page of the image list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePage {
    pub images: Vec<Image>,
    pub pagination: Option<Pagination>,
}
