//! External Providers
//!
//! HTTP clients for the collaborators the pool talks to: the voice provider
//! (per-key subscription usage) and the upload endpoint that receives chunk
//! bytes. Key material is held as `SecretString` and never logged.

mod upload_sink;
mod voice;

pub use upload_sink::{DiscardChunkSink, HttpChunkSink};
pub use voice::VoiceUsageClient;

use keylease_core::KeyIndex;
use secrecy::SecretString;
use std::time::Duration;

use crate::constants::{DEFAULT_MAX_POOL_KEYS, DEFAULT_PROVIDER_TIMEOUT_SECS, DEFAULT_VOICE_API_BASE};

/// One configured voice API key.
#[derive(Clone)]
pub struct VoiceKey {
    pub key_index: KeyIndex,
    pub secret: SecretString,
}

impl std::fmt::Debug for VoiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceKey")
            .field("key_index", &self.key_index)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Configuration for outbound provider calls.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Voice provider base URL, without trailing slash
    pub voice_api_base: String,
    /// Keys found in the environment, ordered by index
    pub voice_keys: Vec<VoiceKey>,
    /// Where chunk bytes are posted. `None` discards them.
    pub upload_endpoint: Option<String>,
    /// Timeout applied to every outbound request
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            voice_api_base: DEFAULT_VOICE_API_BASE.to_string(),
            voice_keys: Vec::new(),
            upload_endpoint: None,
            timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }
}

impl ProviderConfig {
    /// Load provider configuration from environment variables.
    ///
    /// Environment variables:
    /// - `KEYLEASE_VOICE_API_BASE`: Voice provider base URL
    /// - `KEYLEASE_VOICE_API_KEY_{N}`: Key for pool index N (N below `KEYLEASE_MAX_POOL_KEYS`, default 16)
    /// - `KEYLEASE_UPLOAD_ENDPOINT`: Chunk upload URL (unset = discard)
    /// - `KEYLEASE_PROVIDER_TIMEOUT_SECS`: Outbound request timeout (default: 30)
    pub fn from_env() -> Self {
        let max_keys: usize = std::env::var("KEYLEASE_MAX_POOL_KEYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_KEYS);

        let voice_keys = (0..max_keys)
            .filter_map(|i| {
                let key_index = KeyIndex::try_from(i).ok()?;
                let value = std::env::var(format!("KEYLEASE_VOICE_API_KEY_{}", i)).ok()?;
                let value = value.trim().to_string();
                (!value.is_empty()).then(|| VoiceKey {
                    key_index,
                    secret: SecretString::new(value.into()),
                })
            })
            .collect();

        Self {
            voice_api_base: std::env::var("KEYLEASE_VOICE_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_VOICE_API_BASE.to_string()),
            voice_keys,
            upload_endpoint: std::env::var("KEYLEASE_UPLOAD_ENDPOINT")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            timeout: Duration::from_secs(
                std::env::var("KEYLEASE_PROVIDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
            ),
        }
    }

    /// Indices of every configured key.
    pub fn key_indices(&self) -> Vec<KeyIndex> {
        self.voice_keys.iter().map(|k| k.key_index).collect()
    }
}
