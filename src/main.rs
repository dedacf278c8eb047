use clap::Parser;
use redim::config::{ServerConfig, ServiceConfig};
use redim::query::QueryServer;
use redim::storage::{snapshot_loop, MemoryStore, SnapshotStore};
use redim::{DimIndex, IndexConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Multi-dimensional range index served over HTTP
#[derive(Parser, Debug)]
#[command(name = "redim", version)]
struct Args {
    /// TOML service config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Key prefix (required without --config)
    #[arg(long)]
    prefix: Option<String>,

    /// Number of dimensions (required without --config)
    #[arg(long)]
    dims: Option<usize>,

    /// Bits per coordinate
    #[arg(long)]
    precision: Option<u32>,

    /// Keep an id -> entry map (enables update and delete by id)
    #[arg(long)]
    reverse_map: bool,

    /// Snapshot file
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Seconds between snapshots
    #[arg(long)]
    snapshot_interval: Option<u64>,

    /// Run purely in memory
    #[arg(long)]
    no_snapshot: bool,
}

impl Args {
    fn into_service_config(self) -> anyhow::Result<(ServiceConfig, bool)> {
        let mut cfg = match &self.config {
            Some(path) => ServiceConfig::from_toml_file(path)?,
            None => {
                let (Some(prefix), Some(dims)) = (self.prefix.clone(), self.dims) else {
                    anyhow::bail!("either --config or both --prefix and --dims are required");
                };
                ServiceConfig {
                    index: IndexConfig::new(prefix, dims),
                    server: ServerConfig::default(),
                }
            }
        };

        if let Some(prefix) = self.prefix {
            cfg.index.prefix = prefix;
        }
        if let Some(dims) = self.dims {
            cfg.index.dims = dims;
        }
        if let Some(precision) = self.precision {
            cfg.index.precision = precision;
        }
        if self.reverse_map {
            cfg.index.reverse_map = true;
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(path) = self.snapshot {
            cfg.server.snapshot_path = Some(path);
        }
        if let Some(secs) = self.snapshot_interval {
            cfg.server.snapshot_interval_secs = secs;
        }
        Ok((cfg, !self.no_snapshot))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (cfg, persist) = Args::parse().into_service_config()?;
    cfg.index.validate()?;

    info!(
        prefix = %cfg.index.prefix,
        dims = cfg.index.dims,
        precision = cfg.index.precision,
        reverse_map = cfg.index.reverse_map,
        "Starting redim"
    );

    let snapshot = persist.then(|| Arc::new(SnapshotStore::new(cfg.snapshot_path())));

    let store = match &snapshot {
        Some(snap) => match snap.load_if_valid().await? {
            Some(image) => {
                info!("Loaded snapshot {:?}", snap.path());
                Arc::new(MemoryStore::from_image(image))
            }
            None => {
                info!("No usable snapshot at {:?}, starting empty", snap.path());
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    };

    let index = Arc::new(DimIndex::new(store.clone(), cfg.index.clone())?);
    info!(
        entries = store.sorted_len(index.index_namespace()),
        "Index ready"
    );

    // 先绑定端口：失败时直接退出，而不是在没有 API 的情况下继续运行
    let port = cfg.server.port;
    let listener = QueryServer::bind(port).await?;
    let server = QueryServer::new(index.clone());
    tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            warn!("HTTP server stopped: {:#}", e);
        }
    });

    let shutdown = Arc::new(Notify::new());
    let saver = snapshot.map(|snap| {
        tokio::spawn(snapshot_loop(
            store.clone(),
            snap,
            cfg.server.snapshot_interval_secs,
            shutdown.clone(),
        ))
    });

    info!("redim ready. Query via: POST http://localhost:{}/query", port);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    if let Some(saver) = saver {
        let generation = saver.await?;
        info!(generation, "Final snapshot done");
    }

    Ok(())
}
