// Error types for the resumable upload core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} does not exist (or not found)")]
    FileNotFound(String),

    #[error("Failed to get your token: {0}")]
    CredentialError(String),

    /// A request that either never got a response (`status` is `None`) or
    /// came back outside the 2xx range.
    #[error("{context}: {}", describe_transport(.status, .body))]
    TransportError {
        status: Option<u16>,
        body: String,
        context: String,
    },

    #[error("Unexpected response: {0}")]
    ProtocolError(String),

    #[error("Server finalized the object on range {index} of {planned}")]
    PrematureCompletion { index: usize, planned: usize },

    #[error("Upload cancelled before range {0}")]
    Cancelled(usize),

    #[error("Upload timed out before range {0}")]
    TimedOut(usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_transport(status: &Option<u16>, body: &str) -> String {
    match (*status, body.is_empty()) {
        (Some(code), true) => format!("HTTP {}", code),
        (Some(code), false) => format!("HTTP {} - {}", code, body),
        (None, _) => body.to_string(),
    }
}

impl UploadError {
    pub fn transport(status: Option<u16>, body: impl Into<String>, context: impl Into<String>) -> Self {
        UploadError::TransportError {
            status,
            body: body.into(),
            context: context.into(),
        }
    }

    /// HTTP status carried by the error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::TransportError { status, .. } => *status,
            _ => None,
        }
    }

    /// Connection failures, throttling and server-side errors are worth
    /// another attempt; everything else fails the same way twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::TransportError { status: None, .. } => true,
            UploadError::TransportError { status: Some(code), .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
