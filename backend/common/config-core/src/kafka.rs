//! Kafka (MSK) connection settings

use crate::{env_optional, env_or, env_required, ConfigError, ConfigResult};
use rdkafka::ClientConfig;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TOPIC: &str = "cross-account-messages";

const SASL_MECHANISMS: &[&str] = &[
    "PLAIN",
    "SCRAM-SHA-256",
    "SCRAM-SHA-512",
    "OAUTHBEARER",
    "GSSAPI",
];

/// `security.protocol` values the services accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProtocol {
    Plaintext,
    Ssl,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }
}

impl fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAINTEXT" => Ok(SecurityProtocol::Plaintext),
            "SSL" => Ok(SecurityProtocol::Ssl),
            "SASL_SSL" => Ok(SecurityProtocol::SaslSsl),
            other => Err(format!("unsupported security protocol '{}'", other)),
        }
    }
}

/// Broker connection settings common to producer and consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Topic messages are relayed through
    pub topic: String,
    pub client_id: String,
    pub security_protocol: SecurityProtocol,
    /// Only used with `SASL_SSL`
    pub sasl_mechanism: Option<String>,
}

impl KafkaConfig {
    /// Load from `KAFKA_*` environment variables
    pub fn from_env(default_client_id: &str) -> ConfigResult<Self> {
        let security_protocol = match env_optional("KAFKA_SECURITY_PROTOCOL") {
            Some(raw) => raw
                .parse()
                .map_err(|reason| ConfigError::invalid("KAFKA_SECURITY_PROTOCOL", reason))?,
            None => SecurityProtocol::Plaintext,
        };

        let config = Self {
            brokers: env_required("KAFKA_BROKERS")?,
            topic: env_or("KAFKA_TOPIC", DEFAULT_TOPIC.to_string())?,
            client_id: env_or("KAFKA_CLIENT_ID", default_client_id.to_string())?,
            security_protocol,
            sasl_mechanism: env_optional("KAFKA_SASL_MECHANISM"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.brokers.split(',').all(|b| b.trim().is_empty()) {
            return Err(ConfigError::Missing("KAFKA_BROKERS".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Missing("KAFKA_TOPIC".to_string()));
        }

        match (&self.security_protocol, &self.sasl_mechanism) {
            (SecurityProtocol::SaslSsl, None) => {
                Err(ConfigError::Missing("KAFKA_SASL_MECHANISM".to_string()))
            }
            (SecurityProtocol::SaslSsl, Some(mechanism))
                if !SASL_MECHANISMS.contains(&mechanism.as_str()) =>
            {
                Err(ConfigError::invalid(
                    "KAFKA_SASL_MECHANISM",
                    format!("unsupported mechanism '{}'", mechanism),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Client settings every rdkafka handle in this workspace starts from
    pub fn base_client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("security.protocol", self.security_protocol.as_str());

        if self.security_protocol == SecurityProtocol::SaslSsl {
            if let Some(mechanism) = &self.sasl_mechanism {
                client.set("sasl.mechanism", mechanism);
            }
        }

        client
    }
}
