use reqwest::Client;
use serde_json::{Map, Value};

use crate::config::OpenAiCompatibleConfig;
use crate::error::ProviderError;
use crate::traits::CompletionProvider;
use crate::types::CompletionResponse;

#[derive(Clone)]
pub struct OpenAiCompatibleCompletionProvider {
    config: OpenAiCompatibleConfig,
    client: Client,
}

impl OpenAiCompatibleCompletionProvider {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::Config(
                "completion api key is empty".to_string(),
            ));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait::async_trait]
impl CompletionProvider for OpenAiCompatibleCompletionProvider {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn complete(&self, payload: &Value) -> Result<CompletionResponse, ProviderError> {
        let res = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(payload)
            .send()
            .await?;

        let status = res.status().as_u16();
        let bytes = res.bytes().await?;
        let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::Object(Map::new()));
        Ok(CompletionResponse { status, body })
    }
}
