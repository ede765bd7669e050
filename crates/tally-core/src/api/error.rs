use eventsource_stream::EventStreamError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SseParseError {
    #[error("UTF-8 error: {details}")]
    Utf8 { details: String },
    #[error("Parse error: {details}")]
    Parser { details: String },
    #[error("Transport error: {details}")]
    Transport { details: String },
}

impl<E> From<EventStreamError<E>> for SseParseError
where
    E: std::error::Error,
{
    fn from(err: EventStreamError<E>) -> Self {
        match err {
            EventStreamError::Utf8(err) => Self::Utf8 {
                details: err.to_string(),
            },
            EventStreamError::Parser(err) => Self::Parser {
                details: err.to_string(),
            },
            EventStreamError::Transport(err) => Self::Transport {
                details: err.to_string(),
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication failed: {details}")]
    AuthenticationFailed { details: String },

    #[error("Rate limited: {details}")]
    RateLimited { details: String },

    #[error("Invalid request: {details}")]
    InvalidRequest { details: String },

    #[error("Server error (Status: {status_code}): {details}")]
    ServerError { status_code: u16, details: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Failed to parse response: {details}")]
    ResponseParsingError { details: String },

    #[error("Stream error: {0}")]
    Stream(#[from] SseParseError),

    #[error("Connection closed before completion")]
    PrematureEnd,

    #[error("A stream is already open for this session")]
    StreamAlreadyOpen,

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Unexpected status {status_code}: {details}")]
    Unknown { status_code: u16, details: String },
}

impl ApiError {
    /// Maps a non-success HTTP status and its body to an error.
    pub fn from_status(status: reqwest::StatusCode, details: String) -> Self {
        match status.as_u16() {
            401 | 403 => ApiError::AuthenticationFailed { details },
            429 => ApiError::RateLimited { details },
            400..=499 => ApiError::InvalidRequest { details },
            500..=599 => ApiError::ServerError {
                status_code: status.as_u16(),
                details,
            },
            status_code => ApiError::Unknown {
                status_code,
                details,
            },
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::AuthenticationFailed { .. })
    }
}
