//! HTTP server settings

use crate::{env_or, ConfigResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

impl HttpServerConfig {
    pub fn from_env(default_port: u16) -> ConfigResult<Self> {
        Ok(Self {
            host: env_or("HTTP_HOST", "0.0.0.0".to_string())?,
            port: env_or("HTTP_PORT", default_port)?,
        })
    }
}
