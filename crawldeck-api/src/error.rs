use thiserror::Error;

/// Failures surfaced by the transport.
///
/// Every variant owns its message so a single in-flight result can be cloned
/// out to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response reached us: connect failure, DNS, timeout.
    #[error("Service unavailable: {0}")]
    TransportUnavailable(String),

    /// The service answered with a non-success status.
    #[error("{message}")]
    RequestFailed { status: u16, message: String },

    /// A success response whose body does not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ApiError::TransportUnavailable(_))
    }
}

impl From<url::ParseError> for ApiError {
    fn from(e: url::ParseError) -> Self {
        ApiError::InvalidUrl(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
