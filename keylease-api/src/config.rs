//! API Configuration Module
//!
//! CORS, body limits and the lease policy. Configuration is loaded from
//! environment variables with defaults suited to development.

use crate::constants::{DEFAULT_CORS_MAX_AGE_SECS, DEFAULT_MAX_BODY_BYTES};
use keylease_core::{
    ConfigError, LeasePolicy, DEFAULT_HEARTBEAT_WINDOW_SECS, DEFAULT_LEASE_TTL_SECS,
    DEFAULT_POOL_CAPACITY,
};
use std::time::Duration;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP surface configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    /// Largest accepted request body. Chunk uploads are the big ones.
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(), // Empty = allow all
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `KEYLEASE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `KEYLEASE_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `KEYLEASE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `KEYLEASE_MAX_BODY_BYTES`: Request body limit (default: 96 MiB)
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("KEYLEASE_CORS_ORIGINS")
            .ok()
            .map(|s| parse_origins(&s))
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("KEYLEASE_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs = std::env::var("KEYLEASE_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CORS_MAX_AGE_SECS);

        let max_body_bytes = std::env::var("KEYLEASE_MAX_BODY_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            max_body_bytes,
        }
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern))
                        || origin_domain == pattern;
                }
            }
            false
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

// ============================================================================
// LEASE POLICY
// ============================================================================

/// Build the lease policy from environment variables and validate it.
///
/// Environment variables:
/// - `KEYLEASE_POOL_CAPACITY`: Concurrent leases per key (default: 5)
/// - `KEYLEASE_LEASE_TTL_SECS`: Hard lifetime of a lease (default: 7200)
/// - `KEYLEASE_HEARTBEAT_WINDOW_SECS`: Silence tolerated before reclaim (default: 180)
pub fn lease_policy_from_env() -> Result<LeasePolicy, ConfigError> {
    let capacity = env_parse("KEYLEASE_POOL_CAPACITY", DEFAULT_POOL_CAPACITY)?;
    let ttl_secs = env_parse("KEYLEASE_LEASE_TTL_SECS", DEFAULT_LEASE_TTL_SECS)?;
    let window_secs = env_parse("KEYLEASE_HEARTBEAT_WINDOW_SECS", DEFAULT_HEARTBEAT_WINDOW_SECS)?;

    let policy = LeasePolicy {
        capacity,
        lease_ttl: Duration::from_secs(ttl_secs),
        heartbeat_window: Duration::from_secs(window_secs),
    };
    policy.validate()?;
    Ok(policy)
}

/// Parse an optional numeric env var. Unset means `default`; set but
/// unparseable is an error rather than a silent fallback.
fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
