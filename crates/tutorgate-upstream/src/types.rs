use serde_json::Value;

/// Upstream reply passed through to the caller untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub status: u16,
    pub body: Value,
}

impl CompletionResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
