//! The uniform success/error wrapper returned by every remote operation.
//!
//! Protocol-level failures (4xx/5xx with a structured body) and transport
//! failures are both reported through [`ResultEnvelope::error`]; nothing is
//! raised as a separate error channel. Check [`ResultEnvelope::succeeded`]
//! before reading [`ResultEnvelope::result`].
//!
//! ```
//! # use skywire::{ResultEnvelope, ErrorKind};
//! # fn handle(envelope: ResultEnvelope<String>) {
//! match envelope.into_result() {
//!     Ok(value) => println!("got {value}"),
//!     Err(detail) if detail.kind == ErrorKind::RateLimited => println!("back off"),
//!     Err(detail) => eprintln!("{detail}"),
//! }
//! # }
//! ```

use std::fmt::Display;

use reqwest::StatusCode;

use crate::errors::Error;

/// Caller-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection refused, DNS, TLS, timeout, or the stream dropped.
    Transport,
    /// Proof rejected after the nonce retry, or the server refused the credentials.
    AuthFailed,
    /// The session ended; re-authentication is required.
    SessionExpired,
    /// No session has been established.
    NotAuthenticated,
    /// Identity resolution exhausted all strategies, or the server answered 404.
    NotFound,
    /// Malformed or unexpected response shape.
    Protocol,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// The caller's cancellation signal fired.
    Cancelled,
    /// Any other 4xx, or invalid caller input.
    InvalidRequest,
}

impl ErrorKind {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode) -> Self {
        Self::from_status_u16(status.as_u16())
    }

    pub(crate) fn from_status_u16(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::AuthFailed,
            404 | 410 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::InvalidRequest,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(
            match self {
                ErrorKind::Transport => "Transport",
                ErrorKind::AuthFailed => "AuthFailed",
                ErrorKind::SessionExpired => "SessionExpired",
                ErrorKind::NotAuthenticated => "NotAuthenticated",
                ErrorKind::NotFound => "NotFound",
                ErrorKind::Protocol => "Protocol",
                ErrorKind::RateLimited => "RateLimited",
                ErrorKind::ServerError => "ServerError",
                ErrorKind::Cancelled => "Cancelled",
                ErrorKind::InvalidRequest => "InvalidRequest",
            },
            f,
        )
    }
}

/// Error half of a [`ResultEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Classification.
    pub kind: ErrorKind,
    /// Machine readable error name sent by the server, e.g. `RecordNotFound`.
    pub error: Option<String>,
    /// Human readable description.
    pub message: String,
}

impl ErrorDetail {
    /// Detail without a server error name.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            error: None,
            message: message.into(),
        }
    }
}

impl Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{} ({error}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ErrorDetail {}

impl From<&Error> for ErrorDetail {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            error: error.server_code().map(str::to_string),
            message: error.to_string(),
        }
    }
}

impl From<Error> for ErrorDetail {
    fn from(error: Error) -> Self {
        Self::from(&error)
    }
}

/// Outcome of a remote operation.
///
/// Exactly one of [`result`](Self::result) and [`error`](Self::error) is
/// populated. `succeeded()` is true iff a result is present, and when a status
/// code is attached to a successful envelope it is 2xx. Operations that are
/// not HTTP round-trips (stream control) carry no status code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ResultEnvelope<T> {
    status_code: Option<StatusCode>,
    result: Option<T>,
    error: Option<ErrorDetail>,
}

impl<T> ResultEnvelope<T> {
    /// Successful envelope.
    pub fn ok(status_code: Option<StatusCode>, result: T) -> Self {
        debug_assert!(status_code.is_none_or(|s| s.is_success()));
        Self {
            status_code,
            result: Some(result),
            error: None,
        }
    }

    /// Failed envelope.
    pub fn failure(status_code: Option<StatusCode>, error: ErrorDetail) -> Self {
        Self {
            status_code,
            result: None,
            error: Some(error),
        }
    }

    /// Fold an internal result into an envelope. Errors keep the server status they carry.
    pub(crate) fn from_result(status_code: Option<StatusCode>, result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Self::ok(status_code, value),
            Err(error) => Self::failure(error.status(), ErrorDetail::from(&error)),
        }
    }

    /// True iff the operation succeeded and a result is present.
    pub fn succeeded(&self) -> bool {
        self.result.is_some()
    }

    /// HTTP status, when the server answered.
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code
    }

    /// The result of a successful operation.
    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    /// The failure of an unsuccessful operation.
    pub fn error(&self) -> Option<&ErrorDetail> {
        self.error.as_ref()
    }

    /// True if this envelope failed with `kind`.
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.error.as_ref().is_some_and(|e| e.kind == kind)
    }

    /// Convert into a plain `Result`.
    pub fn into_result(self) -> Result<T, ErrorDetail> {
        match (self.result, self.error) {
            (Some(value), _) => Ok(value),
            (None, Some(error)) => Err(error),
            (None, None) => Err(ErrorDetail::new(
                ErrorKind::Protocol,
                "envelope carried neither result nor error",
            )),
        }
    }

    /// Map the result, keeping status and error untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResultEnvelope<U> {
        ResultEnvelope {
            status_code: self.status_code,
            result: self.result.map(f),
            error: self.error,
        }
    }
}

impl<T> From<crate::Result<T>> for ResultEnvelope<T> {
    fn from(result: crate::Result<T>) -> Self {
        Self::from_result(None, result)
    }
}
