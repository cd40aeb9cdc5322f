//! Инициализация структурированного логирования.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn build_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap()
}

/// Поднимает подписчика `tracing`: фильтр из `RUST_LOG` (по умолчанию
/// `info`) плюс консольный слой.
pub fn init_logging() {
    let env_filter = build_filter();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_commit = env!("GIT_COMMIT"),
        built_at = env!("BUILD_TIME"),
        "logging initialized"
    );
}
