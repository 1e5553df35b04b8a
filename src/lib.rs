//! Kumo Uploadr Library
//!
//! Client-side upload engine for image-hosting backends.
//!
//! # Features
//!
//! - **Chunked Uploads**: Large files are split into chunks, uploaded with
//!   bounded concurrency and merged server-side
//! - **Retry**: Capped exponential backoff per chunk and per file
//! - **Progress Tracking**: A keyed upload list with explicit state transitions
//!   and broadcast change events
//! - **Batching**: Many files at once with a bounded file-level pool
//!
//! # Example
//!
//! ```no_run
//! use kumo_uploadr::api::{ApiClient, ImageListQuery, ImageListRefresh};
//! use kumo_uploadr::queue::{FilePayload, UploadList};
//! use kumo_uploadr::upload::{BatchCoordinator, LogNotifier};
//! use kumo_uploadr::Config;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("kumo.yaml")?;
//!     let client = Arc::new(ApiClient::from_config(&config)?);
//!     let list = Arc::new(UploadList::new());
//!     list.add(FilePayload::from_path("photo.jpg").await?);
//!
//!     let batch = BatchCoordinator::new(
//!         client.clone(),
//!         list,
//!         Arc::new(LogNotifier),
//!         Arc::new(ImageListRefresh::new(client, ImageListQuery::default())),
//!         &config.upload,
//!     );
//!     let report = batch.upload_pending().await;
//!     println!("{}", report.summary);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod metrics;
pub mod queue;
pub mod tracing;
pub mod upload;

// Re-export commonly used types
pub use api::ApiClient;
pub use config::Config;
pub use queue::UploadList;
pub use upload::BatchCoordinator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
