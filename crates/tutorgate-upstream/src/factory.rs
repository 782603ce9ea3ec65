use std::sync::Arc;

use crate::config::CompletionProviderConfig;
use crate::error::ProviderError;
use crate::providers::OpenAiCompatibleCompletionProvider;
use crate::traits::CompletionProvider;

pub fn build_completion_provider(
    cfg: CompletionProviderConfig,
) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
    match cfg {
        CompletionProviderConfig::OpenAiCompatible(c) => {
            Ok(Arc::new(OpenAiCompatibleCompletionProvider::new(c)?))
        }
    }
}
