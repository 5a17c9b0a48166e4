//! Cross-account credential acquisition for MSK access
//!
//! A producer or consumer running in one AWS account assumes a role in the
//! account that owns the cluster, then exports the temporary credentials into
//! the process environment where the AWS default chain picks them up.
//!
//! ```no_run
//! use config_core::CrossAccountConfig;
//! use cross_account_auth::{establish_cross_account_access, StsCredentialProvider};
//!
//! # async fn run(config: Option<CrossAccountConfig>) -> Result<(), Box<dyn std::error::Error>> {
//! let provider = StsCredentialProvider::new();
//! if let Some(creds) = establish_cross_account_access(&provider, config.as_ref()).await? {
//!     println!("credentials valid until {:?}", creds.expiration);
//! }
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::{CredentialError, CredentialResult};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sts::config::Region;
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, Duration, TimeZone, Utc};
use config_core::CrossAccountConfig;
use std::fmt;
use tracing::{info, warn};

pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";

/// Temporary credentials returned by an assume-role call
#[derive(Clone, PartialEq, Eq)]
pub struct AssumedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl fmt::Debug for AssumedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssumedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &"***")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl AssumedCredentials {
    /// Make the credentials visible to every client created afterwards in
    /// this process
    pub fn export_to_env(&self) {
        std::env::set_var(ENV_ACCESS_KEY_ID, &self.access_key_id);
        std::env::set_var(ENV_SECRET_ACCESS_KEY, &self.secret_access_key);
        std::env::set_var(ENV_SESSION_TOKEN, &self.session_token);
    }

    pub fn expires_within(&self, window: Duration) -> bool {
        match self.expiration {
            Some(expiration) => expiration - Utc::now() <= window,
            None => false,
        }
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn assume_role(&self, config: &CrossAccountConfig)
        -> CredentialResult<AssumedCredentials>;
}

/// Assume-role through AWS STS using the default credential chain as the
/// caller identity
#[derive(Debug, Default, Clone)]
pub struct StsCredentialProvider;

impl StsCredentialProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialProvider for StsCredentialProvider {
    async fn assume_role(
        &self,
        config: &CrossAccountConfig,
    ) -> CredentialResult<AssumedCredentials> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        let client = aws_sdk_sts::Client::new(&sdk_config);

        let response = client
            .assume_role()
            .role_arn(&config.role_arn)
            .role_session_name(&config.session_name)
            .duration_seconds(config.duration_seconds)
            .send()
            .await
            .map_err(|e| {
                let error_msg = DisplayErrorContext(&e).to_string();
                if error_msg.contains("AccessDenied") {
                    CredentialError::AccessDenied(config.role_arn.clone())
                } else if error_msg.contains("ValidationError")
                    || error_msg.contains("MalformedPolicyDocument")
                {
                    CredentialError::InvalidConfiguration(error_msg)
                } else {
                    CredentialError::Sts(error_msg)
                }
            })?;

        let credentials = response
            .credentials()
            .ok_or(CredentialError::MissingCredentials)?;

        Ok(AssumedCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration: Utc.timestamp_opt(credentials.expiration().secs(), 0).single(),
        })
    }
}

/// Assume the configured role and export the resulting credentials.
///
/// Returns `Ok(None)` when cross-account access is disabled. A failure is
/// fatal to startup; callers should not continue with partial credentials.
pub async fn establish_cross_account_access(
    provider: &dyn CredentialProvider,
    config: Option<&CrossAccountConfig>,
) -> CredentialResult<Option<AssumedCredentials>> {
    let Some(config) = config else {
        info!("Cross-account access disabled, using default AWS credentials");
        return Ok(None);
    };

    config
        .validate()
        .map_err(|e| CredentialError::InvalidConfiguration(e.to_string()))?;

    info!(
        role_arn = %config.role_arn,
        session_name = %config.session_name,
        region = %config.region,
        "Assuming cross-account role"
    );

    let credentials = provider.assume_role(config).await.map_err(|e| {
        warn!(role_arn = %config.role_arn, error = %e, "Failed to assume cross-account role");
        e
    })?;

    credentials.export_to_env();
    info!(expiration = ?credentials.expiration, "Cross-account credentials established");

    Ok(Some(credentials))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use serial_test::serial;
    use tokio_test::{assert_err, assert_ok};

    mock! {
        pub Provider {}

        #[async_trait]
        impl CredentialProvider for Provider {
            async fn assume_role(&self, config: &CrossAccountConfig)
                -> CredentialResult<AssumedCredentials>;
        }
    }

    fn cross_account_config() -> CrossAccountConfig {
        CrossAccountConfig {
            region: "us-east-1".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/msk-cross-account".to_string(),
            session_name: "relay-producer".to_string(),
            duration_seconds: 3600,
        }
    }

    fn sample_credentials() -> AssumedCredentials {
        AssumedCredentials {
            access_key_id: "ASIATESTKEY".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[tokio::test]
    async fn test_disabled_skips_provider() {
        let mut provider = MockProvider::new();
        provider.expect_assume_role().never();

        let result = assert_ok!(establish_cross_account_access(&provider, None).await);
        assert!(result.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_assumed_credentials_exported() {
        let mut provider = MockProvider::new();
        provider
            .expect_assume_role()
            .withf(|c| c.session_name == "relay-producer")
            .times(1)
            .returning(|_| Ok(sample_credentials()));

        let config = cross_account_config();
        let creds = establish_cross_account_access(&provider, Some(&config))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(creds.access_key_id, "ASIATESTKEY");
        assert_eq!(std::env::var(ENV_ACCESS_KEY_ID).unwrap(), "ASIATESTKEY");
        assert_eq!(std::env::var(ENV_SESSION_TOKEN).unwrap(), "token");

        std::env::remove_var(ENV_ACCESS_KEY_ID);
        std::env::remove_var(ENV_SECRET_ACCESS_KEY);
        std::env::remove_var(ENV_SESSION_TOKEN);
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let mut provider = MockProvider::new();
        provider
            .expect_assume_role()
            .returning(|c| Err(CredentialError::AccessDenied(c.role_arn.clone())));

        let config = cross_account_config();
        let err = assert_err!(establish_cross_account_access(&provider, Some(&config)).await);
        assert!(matches!(err, CredentialError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_call() {
        let mut provider = MockProvider::new();
        provider.expect_assume_role().never();

        let mut config = cross_account_config();
        config.duration_seconds = 60;
        let err = establish_cross_account_access(&provider, Some(&config))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", sample_credentials());
        assert!(debug.contains("ASIATESTKEY"));
        assert!(!debug.contains("secret\""));
        assert!(!debug.contains("token\""));
    }

    #[test]
    fn test_expires_within() {
        let mut creds = sample_credentials();
        assert!(!creds.expires_within(Duration::minutes(5)));
        creds.expiration = Some(Utc::now() + Duration::minutes(2));
        assert!(creds.expires_within(Duration::minutes(5)));
        creds.expiration = None;
        assert!(!creds.expires_within(Duration::minutes(5)));
    }
}
