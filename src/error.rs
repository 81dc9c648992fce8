use thiserror::Error;

/// Everything that can go wrong while checking a wallet or loading inputs.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Connection failure, timeout, non-2xx status or an undecodable body.
    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("input error: {0}")]
    Input(String),
}

impl ScanError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Network(_))
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        ScanError::Network(e.to_string())
    }
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        ScanError::Persistence(e.to_string())
    }
}

impl From<csv::Error> for ScanError {
    fn from(e: csv::Error) -> Self {
        ScanError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
