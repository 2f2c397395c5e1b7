use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use media_migrate::config::{
    legacy_url_pattern, Config, MigrationOptions, RewriteConfig, StorageConfig,
    LEGACY_PUBLIC_STORAGE_PREFIX, LEGACY_RAW_STORAGE_PREFIX, PUBLIC_STORAGE_PREFIX,
    RAW_STORAGE_PREFIX,
};
use media_migrate::db::create_pool;
use media_migrate::services::{
    DedupOptions, Deduplicator, Identity, IngestRequest, Ingestor, ItemStatus, MigrationJob,
    Migrator, ObjectTransform, ProgressEvent, ReferenceRewriter, RegenerateDerivatives,
    RegenerateJob, Regenerator, RunSummary,
};
use media_migrate::storage::{ObjectStore, S3Backend};

#[derive(Parser, Debug)]
#[command(name = "media-migrate", version, about = "Media storage migration tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Copy every object from the legacy buckets to the new provider
    MigrateBucket(MigrateBucketArgs),
    /// Rebuild legacy product_images rows on the new provider
    Regenerate(RegenerateArgs),
    /// Upload one product image with all size variants
    Ingest(IngestArgs),
    /// Remove duplicate product_images_railway rows
    Dedup(DedupArgs),
    /// Replace the old storage domain in stored URLs
    RewriteUrls(RewriteUrlsArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scope {
    Public,
    Raw,
    All,
}

#[derive(Args, Debug)]
struct MigrateBucketArgs {
    #[arg(long, value_enum, default_value_t = Scope::All)]
    scope: Scope,
    /// Only migrate keys under this prefix
    #[arg(long, default_value = "")]
    prefix: String,
    /// Store thumb/medium/original JPEGs instead of byte copies
    #[arg(long, default_value_t = false)]
    derivatives: bool,
    /// Append-only log of migrated keys; existing entries are skipped
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    #[arg(long, default_value_t = 100)]
    delay_ms: u64,
    /// Exit non-zero when any object failed
    #[arg(long, default_value_t = false)]
    fail_on_error: bool,
}

#[derive(Args, Debug)]
struct RegenerateArgs {
    /// Only rows of this product
    #[arg(long, conflicts_with = "all", required_unless_present = "all")]
    product: Option<String>,
    #[arg(long, default_value_t = false)]
    all: bool,
    #[arg(long, default_value_t = 100)]
    delay_ms: u64,
    #[arg(long, default_value_t = false)]
    fail_on_error: bool,
}

#[derive(Args, Debug)]
struct IngestArgs {
    #[arg(long)]
    product: Uuid,
    /// Folder segment used instead of the product id
    #[arg(long)]
    external_ref: Option<String>,
    #[arg(long)]
    file: PathBuf,
}

#[derive(Args, Debug)]
struct DedupArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Also delete storage objects no longer referenced
    #[arg(long, default_value_t = false)]
    purge_objects: bool,
    #[arg(long, default_value_t = media_migrate::services::dedup::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

#[derive(Args, Debug)]
struct RewriteUrlsArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_migrate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateBucket(args) => migrate_bucket(args).await,
        Commands::Regenerate(args) => regenerate(args).await,
        Commands::Ingest(args) => ingest(args).await,
        Commands::Dedup(args) => dedup(args).await,
        Commands::RewriteUrls(args) => rewrite_urls(args).await,
    }
}

async fn migrate_bucket(args: MigrateBucketArgs) -> Result<ExitCode> {
    let pairs: &[(&str, &str)] = match args.scope {
        Scope::Public => &[(LEGACY_PUBLIC_STORAGE_PREFIX, PUBLIC_STORAGE_PREFIX)],
        Scope::Raw => &[(LEGACY_RAW_STORAGE_PREFIX, RAW_STORAGE_PREFIX)],
        Scope::All => &[
            (LEGACY_PUBLIC_STORAGE_PREFIX, PUBLIC_STORAGE_PREFIX),
            (LEGACY_RAW_STORAGE_PREFIX, RAW_STORAGE_PREFIX),
        ],
    };

    // Load every bucket config up front so a missing variable fails before any copy
    let mut backends = Vec::with_capacity(pairs.len());
    for (source_prefix, dest_prefix) in pairs {
        let source = S3Backend::new(StorageConfig::from_env(source_prefix)?)?;
        let dest = S3Backend::new(StorageConfig::from_env(dest_prefix)?)?;
        backends.push((source, dest));
    }

    let options = MigrationOptions {
        delay: Duration::from_millis(args.delay_ms),
        checkpoint: args.checkpoint.clone(),
    };
    let transform: Box<dyn ObjectTransform> = if args.derivatives {
        Box::new(RegenerateDerivatives::default())
    } else {
        Box::new(Identity)
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let observer = spawn_progress_observer(rx);
    let migrator = Migrator::new(options).with_events(tx);

    let mut summary = RunSummary::default();
    for (source, dest) in &backends {
        let job = MigrationJob {
            source,
            source_bucket: source.bucket(),
            prefix: &args.prefix,
            dest,
            dest_bucket: dest.bucket(),
        };
        summary.merge(migrator.run(&job, &*transform).await?);
    }

    drop(migrator);
    observer.await.ok();
    finish(&summary, args.fail_on_error && summary.has_failures())
}

async fn regenerate(args: RegenerateArgs) -> Result<ExitCode> {
    let config = Config::from_env()?;
    let legacy_config = StorageConfig::from_env(LEGACY_PUBLIC_STORAGE_PREFIX)?;
    let legacy_url_base = legacy_config.public_url_base.clone();
    let legacy = S3Backend::new(legacy_config)?;
    let dest = S3Backend::new(StorageConfig::from_env(PUBLIC_STORAGE_PREFIX)?)?;
    let url_pattern = legacy_url_pattern();

    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    let job = RegenerateJob {
        legacy: &legacy,
        legacy_bucket: legacy.bucket(),
        legacy_url_base: legacy_url_base.as_deref(),
        dest: &dest,
        dest_bucket: dest.bucket(),
        url_pattern: &url_pattern,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let observer = spawn_progress_observer(rx);
    let regenerator = Regenerator::new(&pool, Duration::from_millis(args.delay_ms)).with_events(tx);

    let product = if args.all { None } else { args.product.as_deref() };
    let summary = regenerator.run(&job, product).await?;

    drop(regenerator);
    observer.await.ok();
    finish(&summary, args.fail_on_error && summary.has_failures())
}

async fn ingest(args: IngestArgs) -> Result<ExitCode> {
    let config = Config::from_env()?;
    let store = S3Backend::new(StorageConfig::from_env(PUBLIC_STORAGE_PREFIX)?)?;

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let filename = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let pool = create_pool(&config.database_url).await?;

    let bundle = Ingestor::new(&store, store.bucket(), &pool)
        .ingest(IngestRequest {
            product_id: args.product,
            external_ref: args.external_ref,
            filename,
            bytes,
        })
        .await?;

    finish(&bundle, false)
}

async fn dedup(args: DedupArgs) -> Result<ExitCode> {
    let config = Config::from_env()?;
    let store = if args.purge_objects {
        Some(S3Backend::new(StorageConfig::from_env(PUBLIC_STORAGE_PREFIX)?)?)
    } else {
        None
    };

    let pool = create_pool(&config.database_url).await?;

    let mut deduplicator = Deduplicator::new(&pool);
    if let Some(store) = &store {
        deduplicator = deduplicator.with_objects(store, store.bucket());
    }

    let report = deduplicator
        .run(DedupOptions {
            chunk_size: args.chunk_size,
            dry_run: args.dry_run,
            purge_objects: args.purge_objects,
        })
        .await?;

    finish(&report, false)
}

async fn rewrite_urls(args: RewriteUrlsArgs) -> Result<ExitCode> {
    let config = Config::from_env()?;
    let rewrite = RewriteConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;

    let report = ReferenceRewriter::new(&pool, &rewrite).run(args.dry_run).await?;

    finish(&report, false)
}

/// Logs progress events until every sender is dropped.
fn spawn_progress_observer(mut rx: UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.status {
                ItemStatus::Failed => tracing::warn!(
                    "[{}/{}] {:.1}% failed {}: {}",
                    event.index + 1,
                    event.total,
                    event.percent(),
                    event.key,
                    event.error.as_deref().unwrap_or("")
                ),
                status => tracing::info!(
                    "[{}/{}] {:.1}% {:?} {} (elapsed {}s, eta {}s)",
                    event.index + 1,
                    event.total,
                    event.percent(),
                    status,
                    event.key,
                    event.elapsed.as_secs(),
                    event.estimated_remaining.as_secs()
                ),
            }
        }
    })
}

fn finish<T: Serialize>(summary: &T, failed: bool) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
