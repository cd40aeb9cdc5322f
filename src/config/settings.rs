use serde::{Deserialize, Serialize};

use config::{Config, ConfigError, Environment};

/// Конфигурация брокера, собираемая из значений по умолчанию и
/// переменных окружения с префиксом `ZUMQ_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub listen_address: String,
    pub username: String,
    pub password: String,
    pub max_connections: usize,
    /// Общий бюджет буферизованных байтов; `None` — без предела.
    pub max_total_bytes: Option<usize>,
    /// Предел буферизованных байтов одной очереди; `None` — без предела.
    pub max_queue_bytes: Option<usize>,
    pub sweep_interval_ms: u64,
    /// Число рабочих потоков рантайма; `None` — по числу ядер.
    pub worker_threads: Option<usize>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("listen_address", "127.0.0.1:7070")?
            .set_default("username", "admin")?
            .set_default("password", "admin")?
            .set_default("max_connections", 10_000)?
            .set_default("sweep_interval_ms", 1_000)?
            // Добавляем переменные окружения с префиксом ZUMQ_
            .add_source(Environment::with_prefix("ZUMQ"))
            .build()?;

        // Десериализуем конфигурацию в нашу структуру
        cfg.try_deserialize()
    }
}
