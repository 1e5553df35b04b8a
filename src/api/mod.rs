//! Image-hosting API client
//!
//! Thin typed wrapper over the backend REST API. The client is an explicit
//! configuration object: base URL, per-call timeouts and a pluggable
//! `RequestInterceptor` for authentication are injected at construction.
//!
//! # Example
//!
//! ```no_run
//! use kumo_uploadr::api::{ApiClient, ImageListQuery};
//! use kumo_uploadr::config::Config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("kumo.yaml")?;
//! let client = ApiClient::from_config(&config)?;
//! let page = client.list_images(&ImageListQuery::default()).await?;
//! println!("{} images", page.images.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Tracing
//!
//! | Operation | Span Name | Timeout |
//! |-----------|-----------|---------|
//! | Single upload | `api.upload_single` | `single_upload_ms` |
//! | Init chunked | `api.init_chunk_upload` | `default_ms` |
//! | Upload chunk | `api.upload_chunk` | `chunk_upload_ms` |
//! | Merge | `api.merge_chunks` | `merge_ms` |
//! | List images | `api.list_images` | `default_ms` |

mod interceptor;
mod types;

pub use interceptor::{NoAuth, RequestInterceptor, SessionInterceptor};
pub use types::*;

use crate::config::{Config, ServerConfig, TimeoutConfig};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// API client errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Network unreachable, connection reset, timeout
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Envelope carried a non-zero code; the message is shown to users verbatim
    #[error("{message}")]
    Application { code: i64, message: String },

    #[error("Response error: {0}")]
    ResponseError(String),
}

impl ApiError {
    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::ConfigError(_) => "config",
            ApiError::Transport(_) => "transport",
            ApiError::Status { .. } => "status",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Application { .. } => "application",
            ApiError::ResponseError(_) => "response",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::ResponseError(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Image-hosting REST client
pub struct ApiClient {
    base_url: String,
    timeouts: TimeoutConfig,
    http_client: reqwest::Client,
    interceptor: Arc<dyn RequestInterceptor>,
}

impl ApiClient {
    /// Create a client for `server`, authenticating through `interceptor`
    pub fn new(
        server: &ServerConfig,
        interceptor: Arc<dyn RequestInterceptor>,
    ) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(server.timeouts.default_timeout())
            .build()
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;

        Ok(Self {
            base_url: server.base_url.trim_end_matches('/').to_string(),
            timeouts: server.timeouts.clone(),
            http_client,
            interceptor,
        })
    }

    /// Create a client with a `SessionInterceptor` seeded from `auth.token`
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let session = SessionInterceptor::new(config.auth.token.clone());
        Self::new(&config.server, Arc::new(session))
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder, timeout: Duration) -> RequestBuilder {
        let request = request.timeout(timeout);
        match self.interceptor.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and decode the response envelope.
    ///
    /// Transport failures, non-2xx statuses and envelope decoding errors are
    /// mapped onto `ApiError`; the envelope `code` is left for the caller.
    async fn execute<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<ApiResponse<T>, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if status == StatusCode::UNAUTHORIZED {
            self.interceptor.on_unauthorized(path);
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Unauthorized(error_message(&body, status)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body, status);
            tracing::warn!(path = path, status = status.as_u16(), message = %message, "API error");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<ApiResponse<T>>().await?)
    }

    /// Upload one file in a single request (`POST /images`)
    #[tracing::instrument(
        name = "api.upload_single",
        skip(self, request),
        fields(
            file.name = %request.filename,
            upload.bytes = request.body.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload_single(
        &self,
        request: SingleUploadRequest,
    ) -> Result<UploadResponseData, ApiError> {
        let length = request.body.len() as u64;
        let part = Part::stream_with_length(request.body, length)
            .file_name(request.filename)
            .mime_str(&request.mime_type)
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;

        let mut form = Form::new().part("files", part);
        if let Some(nicname) = request.nicname {
            form = form.text("nicnames", nicname);
        }

        let path = "/images";
        let builder = self.authorize(
            self.http_client.post(self.url(path)).multipart(form),
            self.timeouts.single_upload(),
        );
        self.execute::<UploadResponseData>(path, builder)
            .await?
            .into_data()
    }

    /// Open a chunked upload session (`POST /images/chunk/init`)
    #[tracing::instrument(
        name = "api.init_chunk_upload",
        skip(self, request),
        fields(
            file.name = %request.filename,
            file.size = request.file_size,
            chunks.total = request.total_chunks,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn init_chunk_upload(
        &self,
        request: &ChunkInitRequest,
    ) -> Result<ChunkInitData, ApiError> {
        let path = "/images/chunk/init";
        let builder = self.authorize(
            self.http_client.post(self.url(path)).json(request),
            self.timeouts.default_timeout(),
        );
        let data = self
            .execute::<ChunkInitData>(path, builder)
            .await?
            .into_data()?;

        tracing::debug!(
            upload_id = %data.upload_id,
            chunk_size = data.chunk_size,
            "Chunk upload session opened"
        );
        Ok(data)
    }

    /// Upload one chunk of an open session (`POST /images/chunk/upload`)
    #[tracing::instrument(
        name = "api.upload_chunk",
        skip(self, request),
        fields(
            upload_id = %request.upload_id,
            chunk.index = request.chunk_index,
            upload.bytes = request.body.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload_chunk(
        &self,
        request: ChunkUploadRequest,
    ) -> Result<ChunkUploadData, ApiError> {
        let length = request.body.len() as u64;
        let part = Part::stream_with_length(request.body, length)
            .file_name(request.filename.clone());

        let form = Form::new()
            .text("upload_id", request.upload_id)
            .text("chunk_index", request.chunk_index.to_string())
            .text("total_chunks", request.total_chunks.to_string())
            .text("filename", request.filename)
            .part("file", part);

        let path = "/images/chunk/upload";
        let builder = self.authorize(
            self.http_client.post(self.url(path)).multipart(form),
            self.timeouts.chunk_upload(),
        );
        self.execute::<ChunkUploadData>(path, builder)
            .await?
            .into_data()
    }

    /// Assemble the uploaded chunks into the final image
    /// (`POST /images/chunk/merge/{upload_id}`)
    #[tracing::instrument(
        name = "api.merge_chunks",
        skip(self),
        fields(http.status_code = tracing::field::Empty),
        err
    )]
    pub async fn merge_chunks(&self, upload_id: &str) -> Result<UploadResponseData, ApiError> {
        let path = format!(
            "/images/chunk/merge/{}",
            utf8_percent_encode(upload_id, NON_ALPHANUMERIC)
        );
        let builder = self.authorize(
            self.http_client
                .post(self.url(&path))
                .json(&serde_json::json!({})),
            self.timeouts.merge(),
        );
        self.execute::<UploadResponseData>(&path, builder)
            .await?
            .into_data()
    }

    /// Fetch one page of the caller's images (`GET /images`)
    #[tracing::instrument(
        name = "api.list_images",
        skip(self),
        fields(http.status_code = tracing::field::Empty),
        err
    )]
    pub async fn list_images(&self, query: &ImageListQuery) -> Result<ImagePage, ApiError> {
        let path = "/images";
        let builder = self.authorize(
            self.http_client.get(self.url(path)).query(query),
            self.timeouts.default_timeout(),
        );
        let response = self.execute::<Vec<Image>>(path, builder).await?;
        let pagination = response.pagination.clone();
        let images = response.into_data()?;
        Ok(ImagePage { images, pagination })
    }
}

/// Prefer the envelope's `message` over the raw body for error display
fn error_message(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("detail"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        })
}

#[async_trait]
impl crate::upload::ImageBackend for ApiClient {
    async fn upload_single(
        &self,
        request: SingleUploadRequest,
    ) -> Result<UploadResponseData, ApiError> {
        ApiClient::upload_single(self, request).await
    }

    async fn init_chunked(&self, request: ChunkInitRequest) -> Result<ChunkInitData, ApiError> {
        self.init_chunk_upload(&request).await
    }

    async fn upload_chunk(&self, request: ChunkUploadRequest) -> Result<ChunkUploadData, ApiError> {
        ApiClient::upload_chunk(self, request).await
    }

    async fn merge(&self, upload_id: &str) -> Result<UploadResponseData, ApiError> {
        self.merge_chunks(upload_id).await
    }
}

/// Refreshes the persisted image list after a batch settles
pub struct ImageListRefresh {
    client: Arc<ApiClient>,
    query: ImageListQuery,
}

impl ImageListRefresh {
    pub fn new(client: Arc<ApiClient>, query: ImageListQuery) -> Self {
        Self { client, query }
    }
}

#[async_trait]
impl crate::upload::RefreshHook for ImageListRefresh {
    async fn refresh(&self) {
        match self.client.list_images(&self.query).await {
            Ok(page) => tracing::info!(images = page.images.len(), "Image list refreshed"),
            Err(e) => tracing::warn!(error = %e, "Image list refresh failed"),
        }
    }
}
