use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use sitepulse_app::delivery::LogDelivery;
use sitepulse_app::scheduler;
use sitepulse_app::secrets::FileSecretStore;
use sitepulse_app::state::AppState;
use sitepulse_core::secrets::SecretStore;
use sitepulse_core::transport::Transport;
use sitepulse_providers::ReqwestTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sitepulse=info".parse()?),
        )
        .json()
        .init();

    let cfg = sitepulse_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    std::fs::create_dir_all(&cfg.data_dir)?;

    let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::open(&cfg.data_dir)?);
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(cfg.request_timeout())?);
    let delivery = Arc::new(LogDelivery::new());

    // `sitepulse fire-now` — deliver due digests immediately and exit. Runs
    // detached from any long-lived process, so everything is rebuilt from
    // persisted storage.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("fire-now") {
        let delivered =
            scheduler::fire_now(&cfg.data_dir, secrets, transport, delivery).await?;
        info!(delivered, "fire-now finished");
        return Ok(());
    }

    let state = Arc::new(AppState::new(&cfg, secrets, transport, delivery).await?);

    let swept = state.sweep_cache();
    info!(swept, accounts = state.registry().accounts().await.len(), "sitepulse started");

    let scheduler_handle = {
        let sched = state.scheduler();
        let tick = cfg.scheduler_tick_seconds;
        tokio::spawn(async move {
            scheduler::run_scheduler_loop(sched, tick).await;
        })
    };

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    scheduler_handle.abort();
    Ok(())
}
