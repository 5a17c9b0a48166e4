//! Producer configuration, loaded once at startup

use config_core::{
    env_or, ConfigError, ConfigResult, CrossAccountConfig, HttpServerConfig, KafkaConfig,
};
use rdkafka::ClientConfig;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_RATE_LIMIT_PER_SECOND: i64 = 100;
/// Upper bound on messages per request, also the default
pub const MAX_BATCH_SIZE: u32 = 1000;
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub kafka: KafkaConfig,
    pub cross_account: Option<CrossAccountConfig>,
    pub http: HttpServerConfig,
    pub rate_limit_per_second: i64,
    pub max_batch_size: u32,
    pub message_timeout_ms: u64,
}

impl ProducerConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            kafka: KafkaConfig::from_env("msk-cross-account-producer")?,
            cross_account: CrossAccountConfig::from_env("msk-producer-session")?,
            http: HttpServerConfig::from_env(DEFAULT_HTTP_PORT)?,
            rate_limit_per_second: env_or(
                "PRODUCER_RATE_LIMIT_PER_SECOND",
                DEFAULT_RATE_LIMIT_PER_SECOND,
            )?,
            max_batch_size: env_or("PRODUCER_MAX_BATCH_SIZE", MAX_BATCH_SIZE)?,
            message_timeout_ms: env_or("KAFKA_MESSAGE_TIMEOUT_MS", DEFAULT_MESSAGE_TIMEOUT_MS)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.kafka.validate()?;
        if let Some(cross_account) = &self.cross_account {
            cross_account.validate()?;
        }
        if self.rate_limit_per_second <= 0 {
            return Err(ConfigError::invalid(
                "PRODUCER_RATE_LIMIT_PER_SECOND",
                format!("must be > 0, got {}", self.rate_limit_per_second),
            ));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.max_batch_size) {
            return Err(ConfigError::invalid(
                "PRODUCER_MAX_BATCH_SIZE",
                format!("must be within 1..={}", MAX_BATCH_SIZE),
            ));
        }
        if self.message_timeout_ms == 0 {
            return Err(ConfigError::invalid("KAFKA_MESSAGE_TIMEOUT_MS", "must be > 0"));
        }
        Ok(())
    }

    /// Durable-write producer settings on top of the shared client config
    pub fn producer_client_config(&self) -> ClientConfig {
        let mut client = self.kafka.base_client_config();
        client
            .set("acks", "all")
            .set("retries", "3")
            .set("batch.size", "16384")
            .set("linger.ms", "10")
            .set("message.timeout.ms", self.message_timeout_ms.to_string());
        client
    }
}
