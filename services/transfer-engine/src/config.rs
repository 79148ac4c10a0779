use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use ledger_core::LedgerConfig;
use message_bus::QueueConfig;
use serde::{Deserialize, Serialize};
use settlement::PipelineConfig;
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub queue: QueueConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = Self::defaults()?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with TRANSFER_ENGINE__SECTION__KEY variables
        builder = builder.add_source(
            Environment::with_prefix("TRANSFER_ENGINE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("ledger.addresses")
                .try_parsing(true),
        );

        // Well-known variables shared with the deployment
        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(addresses) = env::var("LEDGER_ADDRESSES") {
            builder = builder.set_override("ledger.addresses", LedgerConfig::parse_addresses(&addresses))?;
        }

        if let Ok(webhook_url) = env::var("WEBHOOK_URL") {
            builder = builder.set_override("pipeline.webhook_url", webhook_url)?;
        }

        for (var, key) in [
            ("NATS_URL", "queue.url"),
            ("QUEUE_STREAM", "queue.stream"),
            ("QUEUE_SUBJECT", "queue.subject"),
            ("QUEUE_GROUP_ID", "queue.group_id"),
            ("QUEUE_BATCH_SIZE", "queue.batch_size"),
            ("QUEUE_BATCH_TIMEOUT_MS", "queue.batch_timeout_ms"),
        ] {
            if let Ok(value) = env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        builder.build()?.try_deserialize()
    }

    /// Builder preloaded with every default
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let ledger = LedgerConfig::default();
        let queue = QueueConfig::default();
        let pipeline = PipelineConfig::default();

        config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", 4)?
            .set_default("server.shutdown_timeout_secs", 10)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("ledger.addresses", ledger.addresses)?
            .set_default("ledger.connect_timeout_ms", ledger.connect_timeout_ms)?
            .set_default("ledger.request_timeout_ms", ledger.request_timeout_ms)?
            .set_default("queue.url", queue.url)?
            .set_default("queue.stream", queue.stream)?
            .set_default("queue.subject", queue.subject)?
            .set_default("queue.group_id", queue.group_id)?
            .set_default("queue.batch_size", queue.batch_size as u64)?
            .set_default("queue.batch_timeout_ms", queue.batch_timeout_ms)?
            .set_default("queue.ack_wait_secs", queue.ack_wait_secs)?
            .set_default("pipeline.webhook_url", pipeline.webhook_url)?
            .set_default("pipeline.webhook_timeout_secs", pipeline.webhook_timeout_secs)?
            .set_default("pipeline.cache_ttl_secs", pipeline.cache_ttl_secs)?
            .set_default("pipeline.idle_backoff_ms", pipeline.idle_backoff_ms)?
            .set_default("pipeline.failure_backoff_ms", pipeline.failure_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        self.ledger.validate().map_err(|e| e.to_string())?;

        if self.queue.url.is_empty() {
            return Err("NATS URL is required".to_string());
        }

        if self.queue.subject.is_empty() || self.queue.group_id.is_empty() {
            return Err("Queue subject and group id are required".to_string());
        }

        if self.queue.batch_size == 0 {
            return Err("Queue batch size must be positive".to_string());
        }

        self.pipeline.validate().map_err(|e| e.to_string())?;

        Ok(())
    }
}
