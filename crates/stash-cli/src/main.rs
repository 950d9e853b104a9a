use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stash_core::app::RetryPolicy;
use stash_core::config::{ClientConfig, RetrievalConfig, SweepConfig};
use stash_core::domain::SweepStatus;
use stash_core::http::{self, AppState};
use stash_core::impls::FsBlobStore;
use stash_core::ports::SystemClock;
use stash_core::{
    BlobMetadata, Collection, CollectionClient, GcLoop, RetrievalService, StashConfig,
    SweepCoordinator,
};

#[derive(Parser)]
#[command(name = "stash")]
#[command(about = "Serve and garbage-collect the shares/assets blob store", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Root directory; one sub-directory per collection
    #[arg(long, env = "STASH_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "STASH_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Timeout for every store call
    #[arg(long, env = "STASH_STORE_TIMEOUT_MS", default_value_t = 10_000, global = true)]
    store_timeout_ms: u64,

    /// Attempts for idempotent store reads
    #[arg(long, env = "STASH_READ_ATTEMPTS", default_value_t = 2, global = true)]
    read_attempts: u32,

    #[arg(long, env = "STASH_PAGE_SIZE", default_value_t = 1_000, global = true)]
    page_size: usize,

    /// Deletes in flight per collection during a sweep
    #[arg(long, env = "STASH_DELETE_CONCURRENCY", default_value_t = 8, global = true)]
    delete_concurrency: usize,

    /// Wall-clock budget for one sweep
    #[arg(long, env = "STASH_SWEEP_DEADLINE_SECS", global = true)]
    sweep_deadline_secs: Option<u64>,

    #[arg(
        long,
        env = "STASH_CACHE_CONTROL",
        default_value = "public, max-age=31536000, immutable",
        global = true
    )]
    cache_control: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP endpoints
    Serve {
        #[arg(long, env = "STASH_LISTEN", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        /// Also sweep on this interval
        #[arg(long, env = "STASH_SWEEP_INTERVAL_SECS")]
        sweep_interval_secs: Option<u64>,
    },

    /// Run one sweep and print the report
    Sweep {
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Store a file (fixture seeding / manual uploads)
    Put {
        collection: Collection,
        key: String,
        file: PathBuf,

        #[arg(long)]
        mime_type: Option<String>,

        /// Expire this many seconds from now
        #[arg(long)]
        expires_in_secs: Option<i64>,
    },

    /// Print an entry's metadata
    Stat { collection: Collection, key: String },
}

impl GlobalArgs {
    fn config(&self) -> StashConfig {
        StashConfig {
            client: ClientConfig {
                call_timeout: Duration::from_millis(self.store_timeout_ms),
                page_size: self.page_size,
                retry: RetryPolicy {
                    max_attempts: self.read_attempts,
                    ..RetryPolicy::default_reads()
                },
            },
            sweep: SweepConfig {
                delete_concurrency: self.delete_concurrency,
                deadline: self.sweep_deadline_secs.map(Duration::from_secs),
            },
            retrieval: RetrievalConfig {
                cache_control: self.cache_control.clone(),
            },
        }
    }
}

/// 起動時に 1 度だけ作って使い回す
struct Wiring {
    shares: CollectionClient,
    assets: CollectionClient,
    config: StashConfig,
}

impl Wiring {
    async fn open(data_dir: &Path, config: StashConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let shares = FsBlobStore::open(data_dir.join(Collection::Shares.as_str()))
            .await
            .context("open shares store")?;
        let assets = FsBlobStore::open(data_dir.join(Collection::Assets.as_str()))
            .await
            .context("open assets store")?;

        Ok(Self {
            shares: CollectionClient::new(Collection::Shares, Arc::new(shares), config.client.clone()),
            assets: CollectionClient::new(Collection::Assets, Arc::new(assets), config.client.clone()),
            config,
        })
    }

    fn client(&self, collection: Collection) -> &CollectionClient {
        match collection {
            Collection::Shares => &self.shares,
            Collection::Assets => &self.assets,
        }
    }

    fn coordinator(&self) -> SweepCoordinator {
        SweepCoordinator::new(
            self.shares.clone(),
            self.assets.clone(),
            Arc::new(SystemClock),
            self.config.sweep.clone(),
        )
    }

    fn retrieval(&self) -> RetrievalService {
        RetrievalService::new(
            self.shares.clone(),
            self.assets.clone(),
            self.config.retrieval.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cli.global.log_level)),
        )
        .init();

    let wiring = Wiring::open(&cli.global.data_dir, cli.global.config()).await?;

    match cli.command {
        Command::Serve {
            listen,
            sweep_interval_secs,
        } => serve(wiring, listen, sweep_interval_secs).await,
        Command::Sweep { dry_run } => sweep(wiring, dry_run).await,
        Command::Put {
            collection,
            key,
            file,
            mime_type,
            expires_in_secs,
        } => put(wiring, collection, &key, &file, mime_type, expires_in_secs).await,
        Command::Stat { collection, key } => stat(wiring, collection, &key).await,
    }
}

async fn serve(wiring: Wiring, listen: SocketAddr, sweep_interval_secs: Option<u64>) -> Result<()> {
    let sweeper = Arc::new(wiring.coordinator());
    let state = AppState {
        retrieval: Arc::new(wiring.retrieval()),
        sweeper: sweeper.clone(),
    };

    // (A) 定期 sweep（指定時のみ）
    let gc = sweep_interval_secs
        .filter(|secs| *secs > 0)
        .map(|secs| GcLoop::spawn(sweeper, Duration::from_secs(secs)));

    // (B) HTTP サーバー（Ctrl-C で graceful shutdown）
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {listen}"))?;
    http::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        tracing::info!("shutdown requested");
    })
    .await
    .context("http server")?;

    // (C) 実行中の sweep が終わるのを待つ
    if let Some(gc) = gc {
        gc.shutdown_and_join().await;
    }
    Ok(())
}

async fn sweep(wiring: Wiring, dry_run: bool) -> Result<()> {
    let report = wiring.coordinator().run_sweep(dry_run).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status == SweepStatus::NotStarted {
        bail!("sweep could not start");
    }
    Ok(())
}

async fn put(
    wiring: Wiring,
    collection: Collection,
    key: &str,
    file: &Path,
    mime_type: Option<String>,
    expires_in_secs: Option<i64>,
) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("read {}", file.display()))?;

    let mut metadata = BlobMetadata::new().with_bytes(data.len() as u64);
    if let Some(mime_type) = mime_type {
        metadata = metadata.with_mime_type(mime_type);
    }
    if let Some(secs) = expires_in_secs {
        metadata = metadata.with_expires_at(chrono::Utc::now() + chrono::Duration::seconds(secs));
    }

    let etag = wiring
        .client(collection)
        .put(key, Bytes::from(data), metadata)
        .await
        .with_context(|| format!("put {collection}/{key}"))?;
    println!("{etag}");
    Ok(())
}

async fn stat(wiring: Wiring, collection: Collection, key: &str) -> Result<()> {
    let head = wiring
        .client(collection)
        .get_metadata(key)
        .await
        .with_context(|| format!("stat {collection}/{key}"))?;
    let out = serde_json::json!({
        "collection": collection,
        "key": key,
        "etag": head.etag,
        "metadata": head.metadata,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
