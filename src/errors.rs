use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("path is {length} characters, limit is {max}")]
    PathTooLong { length: usize, max: usize },
    #[error("path contains a null character")]
    NullByteInjection,
    #[error("extension '{extension}' is not allowed")]
    ExtensionNotAllowed { extension: String },
    #[error("path resolves outside the data root")]
    OutsideDataRoot,
}

#[derive(Debug, Error)]
pub enum AppError {
    // The rejection reason stays in the value for logging; Display never shows it.
    #[error("ACCESS_DENIED: access denied")]
    Denied(Rejection),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("PAYLOAD_TOO_LARGE: {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("PARSE_FAILURE: {0}")]
    Parse(String),
    #[error("RATE_LIMITED: too many requests from {0}")]
    RateLimited(String),
    #[error("INVALID_REQUEST: {0}")]
    InvalidRequest(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<Rejection> for AppError {
    fn from(value: Rejection) -> Self {
        Self::Denied(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
