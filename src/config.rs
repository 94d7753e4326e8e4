//! Configuration document: merged from a TOML file plus environment
//! overrides, then validated into a route snapshot and resource limits.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::{ResolvedRoute, Route, RouteSnapshot};
use crate::ssrf::SsrfRejection;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("route '{prefix}' failed validation: {source}")]
    InvalidRoute {
        prefix: String,
        #[source]
        source: SsrfRejection,
    },
    #[error("https listener requested but TLS_CERT/TLS_KEY are not both set")]
    MissingTls,
    #[error("no routes configured")]
    NoRoutes,
    #[error("duplicate route prefix '{0}'")]
    DuplicatePrefix(String),
    #[error("cors.credentials=true is incompatible with cors.allowed_origins=[\"*\"]")]
    InvalidCors,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_trusted_proxy_hops() -> u8 {
    0
}

fn default_requests_per_minute() -> u32 {
    100
}

/// Data-plane admission budget: `requests_per_minute` over a fixed 60s
/// window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodySizeSettings {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for BodySizeSettings {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

/// A window/budget pair handed to the sliding-window limiter; derived from
/// `RateLimitSettings`/`AdminRateLimitSettings` rather than read from the
/// document directly.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitTier {
    pub window_secs: u64,
    pub max_requests: u32,
}

fn default_attempts_per_window() -> u32 {
    5
}

fn default_admin_window_seconds() -> u64 {
    300
}

fn default_block_seconds() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRateLimitSettings {
    #[serde(default = "default_attempts_per_window")]
    pub attempts_per_window: u32,
    #[serde(default = "default_admin_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_block_seconds")]
    pub block_seconds: u64,
}

impl Default for AdminRateLimitSettings {
    fn default() -> Self {
        Self {
            attempts_per_window: default_attempts_per_window(),
            window_seconds: default_admin_window_seconds(),
            block_seconds: default_block_seconds(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_concurrent_per_host() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderSettings {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_max_concurrent_per_host")]
    pub max_concurrent_per_host: usize,
    #[serde(default)]
    pub pin_resolved_addresses: bool,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            max_redirects: default_max_redirects(),
            max_concurrent_per_host: default_max_concurrent_per_host(),
            pin_resolved_addresses: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsSettings {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub credentials: bool,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
}

/// The merged configuration document: spec's §6 configuration file fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_http_port")]
    pub listen_port_http: u16,
    pub listen_port_https: Option<u16>,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// How many `X-Forwarded-For` entries (counted from the right) to trust
    /// as having come from a cooperating upstream proxy. `0` (the default)
    /// trusts none of it and keys admission on the socket peer only.
    #[serde(default = "default_trusted_proxy_hops")]
    pub trusted_proxy_hops: u8,
    #[serde(default)]
    pub body_size: BodySizeSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub admin_rate_limit: AdminRateLimitSettings,
    #[serde(default)]
    pub forwarder: ForwarderSettings,
    #[serde(default)]
    pub cors: CorsSettings,
    pub routes: Vec<Route>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("GATEPROXY_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cors.credentials && self.cors.allowed_origins.iter().any(|o| o == "*") {
            return Err(ConfigError::InvalidCors);
        }
        Ok(())
    }

    /// The single data-plane admission budget: a fixed 60s window.
    pub fn data_plane_tier(&self) -> RateLimitTier {
        RateLimitTier {
            window_secs: 60,
            max_requests: self.rate_limit.requests_per_minute,
        }
    }
}

/// Resolves every configured route's upstream and assembles the snapshot
/// that gets installed. Any single invalid route rejects the whole document.
pub async fn build_snapshot(config: &Config) -> Result<RouteSnapshot, ConfigError> {
    if config.routes.is_empty() {
        return Err(ConfigError::NoRoutes);
    }

    let mut seen = std::collections::HashSet::new();
    let mut resolved = Vec::with_capacity(config.routes.len());
    for route in &config.routes {
        if !seen.insert(route.prefix.clone()) {
            return Err(ConfigError::DuplicatePrefix(route.prefix.clone()));
        }
        let target = crate::ssrf::validate(&route.upstream)
            .await
            .map_err(|source| ConfigError::InvalidRoute {
                prefix: route.prefix.clone(),
                source,
            })?;
        resolved.push(ResolvedRoute {
            route: route.clone(),
            target,
        });
    }

    Ok(RouteSnapshot::from_resolved(resolved))
}

/// Secrets that are always sourced from the environment, never the file,
/// per the external-interfaces contract.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub admin_username: String,
    pub admin_password: String,
    pub token_signing_key: Vec<u8>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub audit_path: String,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("required environment variable {0} is not set")]
    MissingVar(&'static str),
}

impl Credentials {
    pub fn from_env() -> Result<Self, CredentialError> {
        let admin_username = std::env::var("ADMIN_USERNAME")
            .map_err(|_| CredentialError::MissingVar("ADMIN_USERNAME"))?;
        let admin_password = std::env::var("ADMIN_PASSWORD")
            .map_err(|_| CredentialError::MissingVar("ADMIN_PASSWORD"))?;
        let token_signing_key = std::env::var("TOKEN_SIGNING_KEY")
            .map_err(|_| CredentialError::MissingVar("TOKEN_SIGNING_KEY"))?
            .into_bytes();
        let tls_cert = std::env::var("TLS_CERT").ok();
        let tls_key = std::env::var("TLS_KEY").ok();
        let audit_path = std::env::var("AUDIT_PATH").unwrap_or_else(|_| "gateproxy-audit.db".to_string());

        Ok(Self {
            admin_username,
            admin_password,
            token_signing_key,
            tls_cert,
            tls_key,
            audit_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(routes: Vec<Route>) -> Config {
        Config {
            log_level: default_log_level(),
            listen_addr: default_listen_addr(),
            listen_port_http: default_http_port(),
            listen_port_https: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            trusted_proxy_hops: default_trusted_proxy_hops(),
            body_size: BodySizeSettings::default(),
            rate_limit: RateLimitSettings::default(),
            admin_rate_limit: AdminRateLimitSettings::default(),
            forwarder: ForwarderSettings::default(),
            cors: CorsSettings::default(),
            routes,
        }
    }

    #[test]
    fn data_plane_tier_uses_configured_budget() {
        let config = base_config(vec![]);
        assert_eq!(config.data_plane_tier().max_requests, 100);
    }

    #[test]
    fn credentials_with_wildcard_origin_is_rejected() {
        let mut config = base_config(vec![]);
        config.cors.credentials = true;
        config.cors.allowed_origins = vec!["*".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCors)));
    }

    #[tokio::test]
    async fn build_snapshot_rejects_duplicate_prefixes() {
        let config = base_config(vec![
            Route {
                prefix: "/api".to_string(),
                upstream: "http://93.184.216.34".to_string(),
                strip_path: false,
            },
            Route {
                prefix: "/api".to_string(),
                upstream: "http://93.184.216.34".to_string(),
                strip_path: false,
            },
        ]);
        let err = build_snapshot(&config).await.unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePrefix(_)));
    }
}
