//! depot node binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot_core::config::AppConfig;
use depot_server::{
    Http3Server, MetricsServer, PeerServer, ReflectorServer, Uploader, blocklist,
    setup_store, wrap_with_cache,
};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// depot - a content-addressed blob distribution node
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DEPOT_CONFIG",
        default_value = "config/depot.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full reflector node: upload receiver, peer servers, metrics.
    Serve,
    /// Run the peer servers only (no upload receiver).
    Peer,
    /// Upload a directory tree of blobs into the store.
    Upload {
        /// Directory containing blob files named by their hashes.
        path: PathBuf,
        /// How many upload workers to run at once.
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Don't check whether blobs exist before uploading.
        #[arg(long)]
        skip_exists_check: bool,
        /// Delete blob files after uploading them.
        #[arg(long)]
        delete_after_upload: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("depot v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    depot_metrics::register_metrics();

    match args.command {
        Command::Serve => serve(config, true).await,
        Command::Peer => serve(config, false).await,
        Command::Upload {
            path,
            workers,
            skip_exists_check,
            delete_after_upload,
        } => upload(config, &path, workers, skip_exists_check, delete_after_upload).await,
    }
}

/// Load configuration from the optional TOML file merged with `DEPOT_`
/// environment overrides.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("no config file found at {path}, using defaults and environment");
    }

    figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn serve(config: AppConfig, with_receiver: bool) -> Result<()> {
    // The blocklist logic requires the db-backed store to be the outermost
    // layer of the underlying store.
    let (underlying, index) = setup_store(&config)
        .await
        .context("failed to initialize store")?;
    let outer = wrap_with_cache(underlying.clone(), &config.cache)
        .context("failed to initialize cache tiers")?;

    let receiver = if with_receiver && !config.server.disable_uploads {
        let mut server = ReflectorServer::new(underlying.clone(), index.clone());
        server.timeout = config.server.receiver_timeout();
        server.grace = config.server.shutdown_grace();
        server
            .start(&config.server.receiver_addr())
            .await
            .context("failed to start reflector receiver")?;
        Some(server)
    } else {
        None
    };

    let mut peer_server = PeerServer::new(outer.clone());
    peer_server.timeout = config.server.peer_timeout();
    peer_server.grace = config.server.shutdown_grace();
    peer_server
        .start(&config.server.tcp_peer_addr())
        .await
        .context("failed to start tcp peer server")?;

    let mut http3_server = Http3Server::new(outer);
    http3_server.timeout = config.server.peer_timeout();
    http3_server.grace = config.server.shutdown_grace();
    http3_server
        .start(&config.server.http3_peer_addr())
        .await
        .context("failed to start http3 peer server")?;

    let metrics_server = MetricsServer::new();
    metrics_server
        .start(&config.server.metrics_addr())
        .await
        .context("failed to start metrics server")?;

    let blocklist_token = CancellationToken::new();
    let mut blocklist_task = None;
    match (&index, &config.blocklist.feed_url) {
        (Some(index), Some(feed_url)) if config.blocklist.enabled => {
            let feed = Arc::new(blocklist::HttpBlocklistFeed::new(feed_url));
            blocklist_task = Some(blocklist::spawn_refresher(
                feed,
                index.clone(),
                config.blocklist.refresh_interval(),
                blocklist_token.clone(),
            ));
            tracing::info!(feed_url = %feed_url, "blocklist refresher started");
        }
        _ => {
            // Existing blocklist entries are still honored by the store.
            tracing::info!("blocklist refresher disabled");
        }
    }

    wait_for_signal().await?;
    tracing::info!("shutting down");

    // Reverse dependency order.
    blocklist_token.cancel();
    if let Some(task) = blocklist_task {
        let _ = task.await;
    }
    metrics_server.shutdown().await;
    http3_server.shutdown().await;
    peer_server.shutdown().await;
    if let Some(receiver) = receiver {
        receiver.shutdown().await;
    }

    Ok(())
}

async fn upload(
    config: AppConfig,
    path: &std::path::Path,
    workers: usize,
    skip_exists_check: bool,
    delete_after_upload: bool,
) -> Result<()> {
    if !config.index.enabled {
        anyhow::bail!("the uploader requires the blob index; enable it in configuration");
    }

    let (store, index) = setup_store(&config)
        .await
        .context("failed to initialize store")?;
    let index = index.expect("index enabled above");

    let uploader = Arc::new(Uploader::new(
        index,
        store,
        workers,
        skip_exists_check,
        delete_after_upload,
    ));

    let signal_uploader = uploader.clone();
    tokio::spawn(async move {
        if wait_for_signal().await.is_ok() {
            tracing::info!("stopping upload");
            signal_uploader.stop();
        }
    });

    uploader.upload(path).await
}

/// Wait for an interrupt or termination signal.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
