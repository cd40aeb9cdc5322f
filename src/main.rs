use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tracing::info;

use zumq::{
    logging::init_logging,
    network::{MessageQueueServer, ServerConfig},
    Settings,
};

fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load configuration")?;

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = settings.worker_threads {
        runtime.worker_threads(threads);
    }
    runtime
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(run(settings))
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    init_logging();

    let config = ServerConfig {
        max_connections: settings.max_connections,
        max_total_bytes: settings.max_total_bytes,
        max_queue_bytes: settings.max_queue_bytes,
        sweep_interval: Duration::from_millis(settings.sweep_interval_ms),
        ..ServerConfig::default()
    };
    let server = Arc::new(
        MessageQueueServer::new(&settings.username, &settings.password, config)
            .context("failed to hash broker credentials")?,
    );

    info!("Starting message queue broker on {}", settings.listen_address);
    server.run(&settings.listen_address).await
}
