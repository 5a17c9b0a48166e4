//! Consumer configuration, loaded once at startup

use config_core::{
    env_optional, env_or, ConfigError, ConfigResult, CrossAccountConfig, DatabaseConfig,
    HttpServerConfig, KafkaConfig,
};
use rdkafka::ClientConfig;

pub const DEFAULT_HTTP_PORT: u16 = 8081;
pub const DEFAULT_GROUP_ID: &str = "msk-cross-account-consumer-group";
pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;

const OFFSET_RESET_VALUES: &[&str] = &["earliest", "latest", "error"];

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub kafka: KafkaConfig,
    pub cross_account: Option<CrossAccountConfig>,
    pub http: HttpServerConfig,
    pub database: DatabaseConfig,
    pub group_id: String,
    /// Maximum number of partitions processed at the same time
    pub concurrency: usize,
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
    /// Required by `POST /api/v1/consumer/reset`; unset means every call is refused
    pub admin_token: Option<String>,
}

impl ConsumerConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            kafka: KafkaConfig::from_env("msk-cross-account-consumer")?,
            cross_account: CrossAccountConfig::from_env("msk-consumer-session")?,
            http: HttpServerConfig::from_env(DEFAULT_HTTP_PORT)?,
            database: DatabaseConfig::from_env()?,
            group_id: env_or("KAFKA_GROUP_ID", DEFAULT_GROUP_ID.to_string())?,
            concurrency: env_or("CONSUMER_CONCURRENCY", DEFAULT_CONCURRENCY)?,
            auto_offset_reset: env_or("KAFKA_AUTO_OFFSET_RESET", "earliest".to_string())?
                .to_ascii_lowercase(),
            session_timeout_ms: env_or("KAFKA_SESSION_TIMEOUT_MS", DEFAULT_SESSION_TIMEOUT_MS)?,
            admin_token: env_optional("ADMIN_TOKEN"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.kafka.validate()?;
        self.database.validate()?;
        if let Some(cross_account) = &self.cross_account {
            cross_account.validate()?;
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("CONSUMER_CONCURRENCY", "must be > 0"));
        }
        if !OFFSET_RESET_VALUES.contains(&self.auto_offset_reset.as_str()) {
            return Err(ConfigError::invalid(
                "KAFKA_AUTO_OFFSET_RESET",
                format!("expected one of {:?}", OFFSET_RESET_VALUES),
            ));
        }
        if self.session_timeout_ms == 0 {
            return Err(ConfigError::invalid("KAFKA_SESSION_TIMEOUT_MS", "must be > 0"));
        }
        Ok(())
    }

    /// Manual-commit consumer settings on top of the shared client config
    pub fn consumer_client_config(&self) -> ClientConfig {
        let mut client = self.kafka.base_client_config();
        client
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout_ms.to_string());
        client
    }
}
