use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::types::CompletionResponse;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sends one chat-completion payload. Non-2xx replies are returned as
    /// responses; only transport failures are errors.
    async fn complete(&self, payload: &Value) -> Result<CompletionResponse, ProviderError>;
}
