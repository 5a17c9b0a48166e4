//! Cross-account role settings

use crate::{env_optional, env_or, env_parse_optional, ConfigError, ConfigResult};

const MIN_ROLE_DURATION_SECS: i32 = 900;
const MAX_ROLE_DURATION_SECS: i32 = 43_200;

/// Role the service assumes in the broker's account before connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossAccountConfig {
    pub region: String,
    pub role_arn: String,
    pub session_name: String,
    pub duration_seconds: i32,
}

impl CrossAccountConfig {
    /// Load from `MSK_ROLE_*` / `AWS_REGION`.
    ///
    /// Returns `Ok(None)` when cross-account access is disabled, either
    /// explicitly (`CROSS_ACCOUNT_ENABLED=false`) or implicitly (no role ARN
    /// and no explicit opt-in).
    pub fn from_env(default_session_name: &str) -> ConfigResult<Option<Self>> {
        let enabled = env_parse_optional::<bool>("CROSS_ACCOUNT_ENABLED")?;
        let role_arn = env_optional("MSK_ROLE_ARN");

        let role_arn = match (enabled, role_arn) {
            (Some(false), _) | (None, None) => return Ok(None),
            (_, Some(arn)) => arn,
            (Some(true), None) => return Err(ConfigError::Missing("MSK_ROLE_ARN".to_string())),
        };

        let config = Self {
            region: env_or("AWS_REGION", "us-east-1".to_string())?,
            role_arn,
            session_name: env_or("MSK_ROLE_SESSION_NAME", default_session_name.to_string())?,
            duration_seconds: env_or("MSK_ROLE_DURATION_SECONDS", 3600)?,
        };
        config.validate()?;
        Ok(Some(config))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.role_arn.starts_with("arn:aws") || !self.role_arn.contains(":role/") {
            return Err(ConfigError::invalid(
                "MSK_ROLE_ARN",
                format!("'{}' is not an IAM role ARN", self.role_arn),
            ));
        }

        // STS session names: 2-64 chars of [\w+=,.@-]
        let valid_session = (2..=64).contains(&self.session_name.len())
            && self
                .session_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "_+=,.@-".contains(c));
        if !valid_session {
            return Err(ConfigError::invalid(
                "MSK_ROLE_SESSION_NAME",
                format!("'{}' is not a valid session name", self.session_name),
            ));
        }

        if !(MIN_ROLE_DURATION_SECS..=MAX_ROLE_DURATION_SECS).contains(&self.duration_seconds) {
            return Err(ConfigError::invalid(
                "MSK_ROLE_DURATION_SECONDS",
                format!(
                    "{} is outside {}..={}",
                    self.duration_seconds, MIN_ROLE_DURATION_SECS, MAX_ROLE_DURATION_SECS
                ),
            ));
        }

        Ok(())
    }
}
