use anyhow::Result;
use tokio_util::sync::CancellationToken;
use usage_mirror::{
    browse,
    config::AppConfig,
    metrics_server,
    observability,
    pipeline::Pipeline,
    publisher::AddressSpace,
    sources::PollingSource,
};
use vue_client::{domain::Device, Credentials, VueSession};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    // Single login attempt; a failure here ends the process.
    let session = VueSession::login(&cfg.vue, &Credentials::from_env()).await?;

    let devices = session.list_devices().await?;
    let gids = Device::unique_gids(&devices);
    tracing::info!(devices = devices.len(), gids = gids.len(), "device list loaded");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let space = AddressSpace::new();
    browse::serve(&cfg.publisher.bind_addr, space.clone())?;

    let source = PollingSource::new(session, gids, cfg.sync.interval(), cancel)
        .with_retry(cfg.sync.max_retries, cfg.sync.retry_backoff());

    let pipeline = Pipeline {
        source,
        devices,
        publisher: space,
    };
    let cycles = pipeline.run().await?;

    tracing::info!(cycles, "usage mirror stopped");
    Ok(())
}
