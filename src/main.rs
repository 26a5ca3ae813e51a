use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use exn::ResultExt;
use kura_config::Config;
use kura_model::JsonApiParser;
use kura_model::models::{Category, LibraryEntry, Media, MediaKind};
use kura_remote::HttpSource;
use kura_store::{Database, EntityStore, SyncCursors};
use kura_sync::{LibrarySync, SyncOptions, SyncReport, prune_missing};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open the local library")]
    Storage,
    #[display("could not set up the remote")]
    Remote,
    #[display("sync did not complete")]
    Sync,
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (TOML, YAML or JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a user's library into the local copy.
    Sync {
        #[arg(long)]
        user: i64,
        #[arg(long, value_parser = parse_kind)]
        kind: MediaKind,
        /// Ignore the sync cursor and fetch the whole library.
        #[arg(long)]
        full: bool,
        /// After a complete full sync, delete local entries the remote no
        /// longer has.
        #[arg(long)]
        prune: bool,
    },
    /// Print one category of a user's local library.
    List {
        #[arg(long)]
        user: i64,
        #[arg(long, value_parser = parse_kind)]
        kind: MediaKind,
        #[arg(long, value_parser = parse_category, default_value = "current")]
        status: Category,
    },
}

fn parse_kind(value: &str) -> std::result::Result<MediaKind, String> {
    value.parse().map_err(|_| format!("unknown media kind `{value}` (expected anime or manga)"))
}

fn parse_category(value: &str) -> std::result::Result<Category, String> {
    value.parse().map_err(|_| format!("unknown status `{value}`"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Sync { user, kind, full, prune } => sync(cli.config.as_deref(), user, kind, full, prune).await,
        Command::List { user, kind, status } => list(cli.config.as_deref(), user, kind, status).await,
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn open(config: &Config) -> Result<(Database, EntityStore)> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Storage)?;
    }
    let db = Database::connect(path).await.or_raise(|| ErrorKind::Storage)?;
    let store = EntityStore::open(&db).await.or_raise(|| ErrorKind::Storage)?;
    Ok((db, store))
}

async fn sync(config: Option<&Path>, user: i64, kind: MediaKind, full: bool, prune: bool) -> Result<()> {
    let config = Config::load(config).or_raise(|| ErrorKind::Config)?;
    let (db, store) = open(&config).await?;
    let cursors = SyncCursors::from(&db);
    if full && cursors.reset(user, kind).await.or_raise(|| ErrorKind::Storage)? {
        tracing::info!("sync cursor reset, fetching the whole library");
    }
    let source = HttpSource::new(&config.remote.base_url, config.remote.timeout()).or_raise(|| ErrorKind::Remote)?;
    let options = SyncOptions {
        library_path: config.remote.library_path.clone(),
        page_limit: config.remote.page_limit,
        max_concurrency: config.sync.max_concurrency,
        max_retry_count: config.sync.max_retry_count,
    };
    let sync = LibrarySync::new(Arc::new(source), Arc::new(JsonApiParser), cursors, options)
        .or_raise(|| ErrorKind::Config)?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling sync");
                cancel.cancel();
            }
        }
    });
    let report = sync.run(user, kind, &store, &cancel).await;
    interrupt.abort();
    summarize(&report);

    if prune {
        let deleted = prune_missing(&store, &report).await.or_raise(|| ErrorKind::Storage)?;
        tracing::info!(deleted, "pruned entries missing from the remote");
    }
    db.close().await;
    if !report.is_success() {
        exn::bail!(ErrorKind::Sync);
    }
    Ok(())
}

fn summarize(report: &SyncReport) {
    for summary in &report.completed {
        tracing::info!(
            category = %summary.category,
            pages = summary.pages,
            entities = summary.entities,
            skipped = summary.skipped,
            "category synced"
        );
    }
    for failure in &report.failures {
        tracing::error!(
            category = %failure.category,
            attempts = failure.attempts,
            error = %*failure.error,
            "category failed"
        );
    }
}

async fn list(config: Option<&Path>, user: i64, kind: MediaKind, status: Category) -> Result<()> {
    let config = Config::load(config).or_raise(|| ErrorKind::Config)?;
    let (db, store) = open(&config).await?;
    let query = store.library(user, kind, status);
    for entry in query.current_items().iter() {
        println!("{}", line(&store, entry));
    }
    drop(query);
    db.close().await;
    Ok(())
}

fn line(store: &EntityStore, entry: &LibraryEntry) -> String {
    let media = store.get::<Media>(entry.media_key());
    let title = media
        .as_ref()
        .map(|media| media.title.clone())
        .unwrap_or_else(|| format!("{} #{}", entry.media_kind, entry.media_id));
    let total = media
        .and_then(|media| media.unit_count)
        .map(|count| count.to_string())
        .unwrap_or_else(|| "?".to_string());
    format!("{:>10}  {}/{:<5} {}", entry.id, entry.progress, total, title)
}
