//! Voice provider usage client.

use async_trait::async_trait;
use keylease_core::{KeyIndex, KeyleaseResult, ProviderError, SubscriptionUsage, UsageProvider};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{ProviderConfig, VoiceKey};

const PROVIDER_NAME: &str = "voice";

/// Subset of the provider's subscription payload we read.
#[derive(Debug, Deserialize)]
struct SubscriptionPayload {
    character_count: i64,
    character_limit: i64,
}

/// Fetches per-key subscription usage with `GET {base}/v1/user/subscription`.
pub struct VoiceUsageClient {
    client: Client,
    base_url: String,
    keys: BTreeMap<KeyIndex, VoiceKey>,
}

impl VoiceUsageClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: config.voice_api_base.trim_end_matches('/').to_string(),
            keys: config
                .voice_keys
                .iter()
                .map(|k| (k.key_index, k.clone()))
                .collect(),
        })
    }

    fn subscription_url(&self) -> String {
        format!("{}/v1/user/subscription", self.base_url)
    }
}

impl std::fmt::Debug for VoiceUsageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceUsageClient")
            .field("base_url", &self.base_url)
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl UsageProvider for VoiceUsageClient {
    fn configured_keys(&self) -> Vec<KeyIndex> {
        self.keys.keys().copied().collect()
    }

    async fn subscription(&self, key_index: KeyIndex) -> KeyleaseResult<SubscriptionUsage> {
        let key = self
            .keys
            .get(&key_index)
            .ok_or(ProviderError::NotConfigured { key_index })?;

        let response = self
            .client
            .get(self.subscription_url())
            .header("xi-api-key", key.secret.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                status: status.as_u16(),
                message: body,
            }
            .into());
        }

        let payload: SubscriptionPayload =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(SubscriptionUsage {
            character_count: payload.character_count,
            character_limit: payload.character_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> ProviderConfig {
        ProviderConfig {
            voice_api_base: "https://voice.example.com/".to_string(),
            voice_keys: vec![VoiceKey {
                key_index: 1,
                secret: SecretString::new("sk-test".into()),
            }],
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_subscription_url_strips_trailing_slash() -> Result<(), ProviderError> {
        let client = VoiceUsageClient::new(&config())?;
        assert_eq!(
            client.subscription_url(),
            "https://voice.example.com/v1/user/subscription"
        );
        Ok(())
    }

    #[test]
    fn test_debug_lists_indices_only() -> Result<(), ProviderError> {
        let client = VoiceUsageClient::new(&config())?;
        let rendered = format!("{:?}", client);
        assert!(rendered.contains("[1]"));
        assert!(!rendered.contains("sk-test"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unconfigured_key_fails_without_request() -> Result<(), ProviderError> {
        let client = VoiceUsageClient::new(&config())?;
        let result = client.subscription(7).await;
        assert!(matches!(
            result,
            Err(keylease_core::KeyleaseError::Provider(ProviderError::NotConfigured { key_index: 7 }))
        ));
        Ok(())
    }

    #[test]
    fn test_payload_parses_provider_fields() -> Result<(), serde_json::Error> {
        let payload: SubscriptionPayload = serde_json::from_str(
            r#"{"tier":"creator","character_count":1200,"character_limit":10000}"#,
        )?;
        assert_eq!(payload.character_limit - payload.character_count, 8800);
        Ok(())
    }
}
