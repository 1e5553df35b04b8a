//! Kumo Uploadr - chunked image upload client
//!
//! Uploads local files to an image-hosting backend and lists stored images.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use kumo_uploadr::api::{ApiClient, ImageListQuery, ImageListRefresh, SessionInterceptor};
use kumo_uploadr::config::Config;
use kumo_uploadr::queue::{FilePayload, ItemId, UploadEvent, UploadItem, UploadList, UploadStatus};
use kumo_uploadr::upload::{BatchCoordinator, BatchSummary, Notice, Notifier};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

/// Config file picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG_PATH: &str = "kumo.yaml";

/// Backend used when neither a config file nor `--base-url` names one
const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Kumo Uploadr - chunked image upload client
#[derive(Parser, Debug)]
#[command(name = "kumo-uploadr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults to ./kumo.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Bearer token, overrides auth.token
    #[arg(long, global = true)]
    token: Option<String>,

    /// API base URL, overrides server.base_url
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload one or more files
    Upload(UploadArgs),
    /// List stored images
    List(ListArgs),
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Display label for the file at the same position
    #[arg(long = "label")]
    labels: Vec<String>,

    /// Print metrics in Prometheus text format when done
    #[arg(long)]
    print_metrics: bool,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long)]
    page: Option<u32>,

    #[arg(long)]
    page_size: Option<u32>,

    /// Only images whose name contains this text
    #[arg(long)]
    name_like: Option<String>,
}

/// Prints notices above the progress bars
struct ConsoleNotifier {
    progress: MultiProgress,
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        let line = match notice {
            Notice::Success(message) => format!("✓ {}", message),
            Notice::Warning(message) => format!("! {}", message),
            Notice::FileFailed { file_name, message } => format!("✗ {}: {}", file_name, message),
            Notice::Error(message) => format!("✗ {}", message),
        };
        // Falls back to stderr when the bars are hidden
        if self.progress.println(&line).is_err() || self.progress.is_hidden() {
            eprintln!("{}", line);
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG_PATH))?,
        None => Config::with_base_url(DEFAULT_BASE_URL),
    };

    if let Some(base_url) = &cli.base_url {
        config.server.base_url = base_url.clone();
    }
    if let Some(token) = &cli.token {
        config.auth.token = Some(token.clone());
    }
    config.validate()?;
    Ok(config)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>24.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Show an item's current state on its bar
fn sync_bar(bar: &ProgressBar, item: &UploadItem) {
    if bar.is_finished() {
        return;
    }
    bar.set_position(u64::from(item.progress));
    match item.status {
        UploadStatus::Waiting => bar.set_message("waiting"),
        UploadStatus::Uploading => bar.set_message("uploading"),
        UploadStatus::Success => bar.finish_with_message("done"),
        UploadStatus::Error => bar.abandon_with_message("failed"),
    }
}

/// Mirror upload events onto progress bars until the list is dropped.
///
/// Returns the bars so the caller can settle them from a final snapshot;
/// events missed by a lagging receiver are otherwise lost.
async fn render_progress(
    mut events: tokio::sync::broadcast::Receiver<UploadEvent>,
    list: Weak<UploadList>,
    bars: HashMap<ItemId, ProgressBar>,
) -> HashMap<ItemId, ProgressBar> {
    loop {
        match events.recv().await {
            Ok(UploadEvent::Progress { id, progress }) => {
                if let Some(bar) = bars.get(&id) {
                    bar.set_position(u64::from(progress));
                }
            }
            Ok(UploadEvent::Status { id, status }) => {
                let Some(bar) = bars.get(&id) else { continue };
                match status {
                    UploadStatus::Uploading => bar.set_message("uploading"),
                    UploadStatus::Waiting => {
                        bar.set_position(0);
                        bar.set_message("retrying");
                    }
                    UploadStatus::Success => bar.finish_with_message("done"),
                    UploadStatus::Error => bar.abandon_with_message("failed"),
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped = skipped, "Progress renderer lagged, resyncing");
                if let Some(list) = list.upgrade() {
                    for item in list.snapshot() {
                        if let Some(bar) = bars.get(&item.id) {
                            sync_bar(bar, &item);
                        }
                    }
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    bars
}

async fn run_upload(config: Config, args: UploadArgs) -> anyhow::Result<()> {
    let list = Arc::new(UploadList::new());
    let progress = MultiProgress::new();
    let mut bars = HashMap::new();

    for (index, path) in args.files.iter().enumerate() {
        let payload = FilePayload::from_path(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let bar = progress.add(ProgressBar::new(100));
        bar.set_style(bar_style());
        bar.set_prefix(payload.name().to_string());
        bar.set_message("waiting");

        let id = list.add(payload);
        if let Some(label) = args.labels.get(index) {
            list.set_label(id, label.clone());
        }
        bars.insert(id, bar);
    }

    let session = Arc::new(SessionInterceptor::new(config.auth.token.clone()));
    let client = Arc::new(ApiClient::new(&config.server, session)?);
    let refresh = Arc::new(ImageListRefresh::new(
        client.clone(),
        ImageListQuery::default(),
    ));
    let notifier = Arc::new(ConsoleNotifier {
        progress: progress.clone(),
    });

    let renderer = tokio::spawn(render_progress(
        list.subscribe(),
        Arc::downgrade(&list),
        bars,
    ));

    let batch = BatchCoordinator::new(client, list.clone(), notifier, refresh, &config.upload);
    let report = batch.upload_pending().await;
    let settled = list.snapshot();

    // Dropping every list handle closes the event channel and ends the renderer
    drop(batch);
    drop(list);
    let bars = renderer.await.context("Progress renderer panicked")?;
    for item in &settled {
        if let Some(bar) = bars.get(&item.id) {
            sync_bar(bar, item);
        }
    }

    info!(
        succeeded = report.succeeded(),
        skipped = report.skipped(),
        summary = %report.summary,
        "Upload finished"
    );
    println!("{}", report.summary);

    if args.print_metrics && config.metrics.enabled {
        print!("{}", kumo_uploadr::metrics::gather_text()?);
    }

    match report.summary {
        BatchSummary::AllSucceeded { .. } => Ok(()),
        summary => anyhow::bail!("Upload incomplete: {}", summary),
    }
}

async fn run_list(config: Config, args: ListArgs) -> anyhow::Result<()> {
    let client = ApiClient::from_config(&config)?;
    let query = ImageListQuery {
        page: args.page,
        page_size: args.page_size,
        name_like: args.name_like,
        ..ImageListQuery::default()
    };

    let page = client.list_images(&query).await?;
    for image in &page.images {
        println!("{}\t{}\t{}", image.id, image.filename, image.url);
    }
    if let Some(pagination) = &page.pagination {
        println!(
            "page {}/{} ({} images)",
            pagination.page, pagination.total_pages, pagination.total
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    kumo_uploadr::tracing::init_subscriber(&config.logging, cli.log_level.as_deref())?;
    info!(
        "Starting Kumo Uploadr v{} against {}",
        kumo_uploadr::VERSION,
        config.server.base_url
    );

    match cli.command {
        Command::Upload(args) => run_upload(config, args).await,
        Command::List(args) => run_list(config, args).await,
    }
}
