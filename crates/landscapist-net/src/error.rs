/// Fetch error
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Unsupported model type: {kind}")]
    UnsupportedModel { kind: &'static str },

    #[error("HTTP error: {status} {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(u32),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("").to_string(),
            };
        }
        Self::Network(err.to_string())
    }
}
