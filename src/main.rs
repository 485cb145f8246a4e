use anyhow::Context;
use log::{error, info};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::watch;

use curator::catalog::Catalog;
use curator::config::Config;
use curator::db;
use curator::description::{self, DescriptionEngine};
use curator::scheduler::PhotoScheduler;
use curator::search_index::{ClipTextEmbedder, SearchIndex, VectorIndex};

// Blocking work still running after this is left behind (e.g. an Ollama request)
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(run());
    shutdown(runtime);
    result
}

fn shutdown(runtime: Runtime) {
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    info!("Stopped");
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid listen address")?;

    info!("Starting curator on {}", addr);
    info!("Database: {}", config.db_url);
    info!("Search index: {}", config.search_index_path);
    info!(
        "Description backend: {} ({})",
        config.description.backend, config.description.model
    );

    let pool = db::create_db_pool(&config.db_url)
        .await
        .context("Failed to open catalog database")?;

    // The CLIP text model loads on first use
    let embedder = Arc::new(ClipTextEmbedder::new(&config.description.model_cache_path));
    let index: Arc<dyn SearchIndex> = Arc::new(
        VectorIndex::open(Path::new(&config.search_index_path), embedder)
            .await
            .context("Failed to open search index")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let backend = description::create_backend(&config.description);
    let engine = Arc::new(
        DescriptionEngine::new(pool.clone(), backend, index).with_shutdown(shutdown_rx),
    );

    let catalog = Catalog::new(pool, engine);
    let scheduler = PhotoScheduler::new(
        catalog.clone(),
        Duration::from_secs(config.scheduler_interval),
    );
    let _scheduler_handle = scheduler.start(tokio::runtime::Handle::current());

    let startup = scheduler.clone();
    tokio::spawn(async move {
        info!("Running startup cycle...");
        startup.run_cycle().await;
    });

    let routes = curator::build_routes(catalog, scheduler);
    info!("Server started, listening on http://{}", addr);

    tokio::select! {
        _ = warp::serve(routes).run(addr) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}
