//! Error types for NSX manager operations.
//!
//! The variants fall into four groups so that callers can decide what to do
//! without inspecting HTTP details:
//! - validation failures (a required field is absent or mistyped), raised
//!   before any request is sent
//! - transport failures, never retried automatically
//! - remote rejections, carrying the status and body for diagnostics
//! - stale section tokens, which a caller may answer by re-fetching the token

use thiserror::Error;

/// HTTP status the manager answers with when an `If-Match` precondition fails.
pub const PRECONDITION_FAILED: u16 = 412;

/// HTTP status for a missing object.
pub const NOT_FOUND: u16 = 404;

/// Top-level error type for the nsx-api crate.
#[derive(Debug, Error)]
pub enum NsxError {
    /// A required configuration field is absent.
    #[error("{field} argument is required")]
    MissingField { field: String },

    /// A configuration field holds a value of the wrong type.
    #[error("{field} must be a {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },

    /// A configuration field is present and typed correctly but its value is
    /// not acceptable.
    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },

    /// The request/response exchange itself failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The manager answered with a status other than the expected one.
    #[error("remote rejected request with status {status}: {body}")]
    RemoteRejection { status: u16, body: String },

    /// The section changed since its token was read.
    #[error("section {section_id} changed since token {token} was read (status {status})")]
    TokenStale {
        section_id: u64,
        token: String,
        status: u16,
    },

    /// Request or response body could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Client configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl NsxError {
    /// Shorthand for [`NsxError::MissingField`].
    pub fn missing(field: impl Into<String>) -> Self {
        NsxError::MissingField {
            field: field.into(),
        }
    }

    /// Shorthand for [`NsxError::TypeMismatch`].
    pub fn mismatch(field: impl Into<String>, expected: &'static str) -> Self {
        NsxError::TypeMismatch {
            field: field.into(),
            expected,
        }
    }

    /// Shorthand for [`NsxError::InvalidField`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NsxError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised while checking configuration, before
    /// any remote call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NsxError::MissingField { .. }
                | NsxError::TypeMismatch { .. }
                | NsxError::InvalidField { .. }
        )
    }

    /// Returns true if the section token was rejected as stale.
    pub fn is_stale(&self) -> bool {
        matches!(self, NsxError::TokenStale { .. })
    }

    /// Returns true if re-running the whole fetch/write cycle may succeed.
    ///
    /// Transport failures are excluded: the manager's create call is not
    /// idempotent, so a timed out write may already have been applied.
    pub fn is_retryable(&self) -> bool {
        self.is_stale()
    }

    /// Returns true if this is a transport failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, NsxError::Transport(_))
    }

    /// Returns true if the manager reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(NOT_FOUND)
    }

    /// The HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            NsxError::RemoteRejection { status, .. } | NsxError::TokenStale { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NsxError {
    fn from(err: reqwest::Error) -> Self {
        NsxError::Transport(err.to_string())
    }
}

/// Shorthand result alias for NSX operations.
pub type NsxResult<T> = Result<T, NsxError>;
