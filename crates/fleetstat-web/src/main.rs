mod access_log;
mod handlers;
mod openapi;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use fleetstat_core::aggregator::Aggregator;
use fleetstat_core::fetcher::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_WORKER_PATH, DEFAULT_WORKER_PORT, FetchConfig, HttpStatFetcher,
};
use fleetstat_core::inventory::{
    FileInventory, InventoryProvider, KubernetesInventory, LabelSelector,
};
use fleetstat_core::refresh::Refresher;
use fleetstat_core::store::SnapshotStore;

use state::AppState;

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(name = "fleetstat-web", about = "Fleet stats aggregator", version = fleetstat_core::VERSION)]
struct Args {
    /// The address to serve on.
    #[arg(long, default_value = "localhost:8080", env = "FLEETSTAT_ADDRESS")]
    address: String,

    /// Label selector for worker pods. Empty selects all.
    #[arg(long, default_value = "", env = "FLEETSTAT_SELECTOR")]
    selector: String,

    /// Refresh interval in seconds.
    #[arg(
        long,
        default_value = "3",
        env = "FLEETSTAT_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: u64,

    /// Kubernetes namespace to list worker pods in.
    #[arg(long, default_value = "default", env = "FLEETSTAT_NAMESPACE")]
    namespace: String,

    /// Read the fleet from a JSON file instead of the Kubernetes API.
    #[arg(long, value_name = "PATH", env = "FLEETSTAT_INVENTORY_FILE")]
    inventory_file: Option<PathBuf>,

    /// Port workers serve their stats on.
    #[arg(long, default_value_t = DEFAULT_WORKER_PORT, env = "FLEETSTAT_WORKER_PORT")]
    worker_port: u16,

    /// Path of the stats document on each worker.
    #[arg(long, default_value = DEFAULT_WORKER_PATH, env = "FLEETSTAT_WORKER_PATH")]
    worker_path: String,

    /// Per-worker fetch timeout in milliseconds.
    #[arg(long, default_value_t = 2000, env = "FLEETSTAT_FETCH_TIMEOUT_MS")]
    fetch_timeout_ms: u64,

    /// Largest stats body accepted from a worker, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES, env = "FLEETSTAT_MAX_BODY_BYTES")]
    max_body_bytes: usize,
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("fleetstat_web=info,fleetstat_core=info")
            }),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(version = fleetstat_core::VERSION, "starting");

    let selector = match LabelSelector::parse(&args.selector) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "invalid --selector");
            process::exit(1);
        }
    };

    let inventory = create_inventory(&args);

    let fetch_config = FetchConfig {
        port: args.worker_port,
        path: args.worker_path.clone(),
        timeout: Duration::from_millis(args.fetch_timeout_ms),
        max_body_bytes: args.max_body_bytes,
    };
    let interval = Duration::from_secs(args.interval);
    if fetch_config.timeout >= interval {
        warn!(
            timeout_ms = args.fetch_timeout_ms,
            interval_ms = interval.as_millis() as u64,
            "fetch timeout is not shorter than the refresh interval, slow workers will delay cycles"
        );
    }
    let fetcher = match HttpStatFetcher::new(fetch_config) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "failed to build HTTP client");
            process::exit(1);
        }
    };

    info!(
        inventory = inventory.name(),
        selector = %selector,
        interval_s = args.interval,
        worker_port = args.worker_port,
        worker_path = %args.worker_path,
        "refresh configured"
    );

    let store = Arc::new(SnapshotStore::new());
    let refresher = Refresher::new(
        inventory,
        selector,
        Aggregator::new(Arc::new(fetcher)),
        store.clone(),
    );

    let app = handlers::router(AppState::new(store))
        .into_make_service_with_connect_info::<SocketAddr>();

    let listener = match tokio::net::TcpListener::bind(&args.address).await {
        Ok(l) => l,
        Err(e) => {
            error!(address = %args.address, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "listening"),
        Err(_) => info!(address = %args.address, "listening"),
    }

    // The loop never returns; it ends with the runtime.
    tokio::spawn(refresher.run(interval));

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        process::exit(1);
    }
    info!("stopped");
}

fn create_inventory(args: &Args) -> Arc<dyn InventoryProvider> {
    if let Some(ref path) = args.inventory_file {
        info!(path = %path.display(), "using file inventory");
        return Arc::new(FileInventory::new(path));
    }
    match KubernetesInventory::in_cluster(&args.namespace) {
        Ok(k) => {
            info!(namespace = %args.namespace, "using in-cluster Kubernetes inventory");
            Arc::new(k)
        }
        Err(e) => {
            error!(error = %e, "failed to create Kubernetes inventory (not running in a cluster? use --inventory-file)");
            process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
