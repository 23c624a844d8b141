//! Error types for the ESB usage importer.
//!
//! Each pipeline stage has its own error enum so the importer can decide
//! per stage whether a failure is retried, surfaced to the operator as
//! "wait before retrying", or merely logged.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error types.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type that encompasses all application errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Login against the portal failed
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Downloading or parsing readings failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Readings handed to the aggregator were malformed
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    /// Writing statistics to the sink failed
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Reading or writing persisted state failed
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Another cycle for the same meter is still running
    #[error("an import cycle for MPRN {mprn} is already in progress")]
    CycleInProgress { mprn: String },

    /// The cycle was cancelled before it completed
    #[error("import cycle cancelled")]
    Cancelled,

    /// Generic errors that don't fit other categories
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the operator should wait for the provider's window to reset
    /// instead of retrying by hand.
    pub fn requires_operator_wait(&self) -> bool {
        matches!(
            self,
            Error::Auth(AuthError::RateLimited) | Error::Auth(AuthError::CaptchaRequired)
        )
    }
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration value is invalid
    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Portal login errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The portal rejected the email/password pair
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The local login budget for the current UTC day is used up, or the
    /// portal itself answered with a throttling response
    #[error("login rate limit reached, wait until the window resets at UTC midnight")]
    RateLimited,

    /// The portal demanded a CAPTCHA that cannot be solved automatically
    #[error("portal requires a CAPTCHA, log in manually once and wait before retrying")]
    CaptchaRequired,

    /// Transport-level failure
    #[error("network error during login: {0}")]
    Network(String),

    /// The login flow returned a page we do not recognise
    #[error("unexpected login response: {0}")]
    UnexpectedResponse(String),
}

/// Errors returned while downloading readings.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The portal response could not be parsed
    #[error("failed to parse portal response")]
    Parse(#[from] ParseError),

    /// The session was rejected by the portal
    #[error("portal session expired or was rejected")]
    SessionExpired,

    /// The portal returned no readings for the requested range
    #[error("portal returned no readings for {range}")]
    EmptyResult { range: String },

    /// Transport-level failure
    #[error("network error during fetch: {0}")]
    Network(String),

    /// Server returned an error status
    #[error("server error (status {status}): {message}")]
    ServerError { status: u16, message: String },
}

/// Response parsing errors.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Element not found in HTML
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// Invalid CSS selector
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    /// Failed to parse numeric value
    #[error("failed to parse number from '{text}': {message}")]
    NumberParse { text: String, message: String },

    /// Failed to parse date/time
    #[error("failed to parse date/time from '{text}': {message}")]
    DateTimeParse { text: String, message: String },

    /// Download did not look like the portal's CSV export
    #[error("invalid CSV export: {0}")]
    InvalidCsv(String),

    /// Every record of a non-empty chunk was rejected
    #[error("all {rejected} records in the response were unparsable")]
    AllRecordsRejected { rejected: usize },

    /// Unexpected response structure
    #[error("unexpected response structure: {0}")]
    UnexpectedStructure(String),
}

/// Malformed aggregator input. The fetcher filters these out, so hitting one
/// indicates a bug upstream.
#[derive(Error, Debug, PartialEq)]
pub enum AggregationError {
    #[error("reading at {timestamp} is not on a half-hour boundary")]
    OffGrid { timestamp: String },

    #[error("reading at {timestamp} has a non-finite value")]
    NonFinite { timestamp: String },

    #[error("more than one reading for the half-hour slot {timestamp}")]
    DuplicateSlot { timestamp: String },
}

/// Statistics sink errors.
#[derive(Error, Debug)]
pub enum SinkError {
    /// HTTP error talking to the sink directly
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Write operation failed
    #[error("failed to write {count} statistics: {message}")]
    WriteFailed { count: usize, message: String },

    /// Purge operation failed
    #[error("failed to purge {series} (status {status}): {message}")]
    PurgeFailed {
        series: String,
        status: u16,
        message: String,
    },

    /// Invalid data point
    #[error("invalid data point: {0}")]
    InvalidDataPoint(String),
}

/// File persistence errors for import state and the development cache.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Creates a new invalid configuration error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl AuthError {
    /// Creates a network error from any displayable transport failure.
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network(err.to_string())
    }

    /// Creates an unexpected response error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse(message.into())
    }

    /// Only transport failures are worth retrying; everything else is an
    /// answer from the portal that will not change within a cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl FetchError {
    /// Creates a network error from any displayable transport failure.
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network(err.to_string())
    }

    /// Creates an error from a non-success HTTP status. 401 and 403 mean the
    /// portal no longer accepts the session.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => Self::SessionExpired,
            code => Self::ServerError {
                status: code,
                message: body,
            },
        }
    }

    /// Creates an empty result error for the given range.
    pub fn empty(range: impl std::fmt::Display) -> Self {
        Self::EmptyResult {
            range: range.to_string(),
        }
    }

    /// Network failures and 5xx responses may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl ParseError {
    /// Creates an element not found error.
    pub fn element_not_found(selector: impl Into<String>) -> Self {
        Self::ElementNotFound {
            selector: selector.into(),
        }
    }

    /// Creates an invalid selector error.
    pub fn invalid_selector(selector: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            message: err.to_string(),
        }
    }

    /// Creates a number parse error.
    pub fn number_parse(text: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::NumberParse {
            text: text.into(),
            message: err.to_string(),
        }
    }

    /// Creates a datetime parse error.
    pub fn datetime_parse(text: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::DateTimeParse {
            text: text.into(),
            message: err.to_string(),
        }
    }
}

impl SinkError {
    /// Creates a write failed error.
    pub fn write_failed(count: usize, err: impl std::fmt::Display) -> Self {
        Self::WriteFailed {
            count,
            message: err.to_string(),
        }
    }
}

impl PersistError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
