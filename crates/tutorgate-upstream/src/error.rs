use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// HTTP status attached to the failure, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            Self::Config(_) => None,
        }
    }
}
