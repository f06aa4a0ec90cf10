//! Registry server binary

use std::net::{Ipv4Addr, SocketAddr};

use bucket_registry::{RegistryConfig, router};
use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use eyre::WrapErr as _;
use storage::StorageConfig;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageKind {
    Memory,
    Local,
    Bucket,
    Daemon,
}

#[cfg(feature = "bucket")]
fn bucket_storage() -> eyre::Result<StorageConfig> {
    Ok(StorageConfig::BucketEnv)
}

#[cfg(not(feature = "bucket"))]
fn bucket_storage() -> eyre::Result<StorageConfig> {
    eyre::bail!("built without the bucket feature")
}

#[cfg(feature = "daemon")]
fn daemon_storage() -> eyre::Result<StorageConfig> {
    Ok(StorageConfig::DaemonEnv)
}

#[cfg(not(feature = "daemon"))]
fn daemon_storage() -> eyre::Result<StorageConfig> {
    eyre::bail!("built without the daemon feature")
}

/// Docker registry backed by bucket storage
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file. Arguments and environment variables override it.
    #[arg(long, short, env = "REGISTRY_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Port to listen on
    #[arg(long, short, env = "PORT")]
    port: Option<u16>,

    /// Bucket holding every blob and manifest
    #[arg(long, env = "BUCKET_NAME")]
    bucket: Option<String>,

    /// Local staging directory
    #[arg(long, env = "BUCKET_TEMP_DIR")]
    temp_dir: Option<Utf8PathBuf>,

    /// Storage backend. The bucket service is configured by HUB_HOST, HUB_TOKEN and
    /// BUCKET_ENCRYPTION, the daemon by DAEMON_TOKEN and DAEMON_HOST.
    #[arg(long, env = "REGISTRY_STORAGE", value_enum)]
    storage: Option<StorageKind>,

    /// Root directory for local storage
    #[arg(long, env = "REGISTRY_LOCAL_ROOT")]
    local_root: Option<Utf8PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "REGISTRY_LOG_JSON")]
    json: bool,
}

impl Args {
    fn load(self) -> eyre::Result<RegistryConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("reading configuration {path}"))?;
                toml_edit::de::from_str(&text)
                    .wrap_err_with(|| format!("parsing configuration {path}"))?
            }
            None => RegistryConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bucket) = self.bucket {
            config.bucket = bucket;
        }
        if let Some(temp_dir) = self.temp_dir {
            config.temp_dir = Some(temp_dir);
        }

        match (self.storage, self.local_root) {
            (Some(StorageKind::Memory), _) => config.storage = StorageConfig::Memory,
            (Some(StorageKind::Bucket), _) => config.storage = bucket_storage()?,
            (Some(StorageKind::Daemon), _) => config.storage = daemon_storage()?,
            (Some(StorageKind::Local), Some(path)) | (None, Some(path)) => {
                config.storage = StorageConfig::Local { path }
            }
            (Some(StorageKind::Local), None) => {
                eyre::bail!("local storage requires --local-root or REGISTRY_LOCAL_ROOT")
            }
            (None, None) => {}
        }

        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let config = args.load()?;
    let port = config.port;
    tracing::info!(
        port,
        bucket = %config.bucket,
        staging = %config.staging_dir(),
        "starting registry"
    );

    let storage = config
        .builder()
        .await
        .wrap_err("configuring storage")?
        .into_storage();
    storage
        .ensure_namespace()
        .await
        .wrap_err("preparing storage bucket")?;

    let app = router(storage).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("serving")?;

    Ok(())
}
