use std::time::Duration;

use atelier_shared::constants::{
    AUTH_TIMEOUT_SECS, DEFAULT_HOSTNAME, DEFAULT_PORT, REQUEST_TIMEOUT_SECS,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    /// Base URL advertised in login links; defaults to the listen address
    pub public_base_url: Option<String>,
    /// HMAC secret for token signing; random per process when unset
    pub jwt_secret: Option<String>,
    pub request_timeout: Duration,
    pub auth_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            port: DEFAULT_PORT,
            public_base_url: None,
            jwt_secret: None,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(AUTH_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("PUBLIC_BASE_URL") {
            if !url.is_empty() {
                config.public_base_url = Some(url.trim_end_matches('/').to_string());
            }
        }

        if let Ok(secret) = std::env::var("JWT_PRIVATE_KEY") {
            if !secret.is_empty() {
                config.jwt_secret = Some(secret);
            }
        }

        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn base_url(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.hostname, self.port))
    }
}
