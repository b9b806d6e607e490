//! Unified error types for the `skywire` crate.
//!
//! Internally every fallible step returns [`Result`] and propagates with `?`.
//! At the public boundary errors are folded into a
//! [`ResultEnvelope`](crate::ResultEnvelope) through [`Error::kind`], so callers
//! get a single decision point instead of a mix of envelopes and exceptions.

use reqwest::StatusCode;
use thiserror::Error;

use crate::envelope::ErrorKind;

// --- Build-Time Error ---

/// Errors that can occur while building an [`HttpClient`](crate::HttpClient).
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to build the HTTP client (reqwest configuration).
    #[error("Failed to build the HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

// --- The Main Operational Error Enum ---

/// The crate's top-level error type.
///
/// It groups failures into high-level categories:
/// - [`Error::Request`]: HTTP transport/server/validation issues
/// - [`Error::Identity`]: handle and DID resolution
/// - [`Error::Authentication`]: session, token and proof issues
/// - [`Error::Stream`]: firehose connection and decoding
/// - [`Error::Cancelled`]: the caller's cancellation token fired
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request/response failed (transport, server, validation, JSON).
    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    /// Identity resolution failed.
    #[error("Identity resolution failed: {0}")]
    Identity(#[from] IdentityError),

    /// Authentication failed (session state, token grant, proof).
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    /// Event stream failed.
    #[error("Event stream error: {0}")]
    Stream(#[from] StreamError),

    /// URL parsing failed while preparing a request.
    #[error("Failed to parse URL: {0}")]
    Parse(#[from] url::ParseError),

    /// Building the client failed.
    #[error("Client build failed: {0}")]
    Build(#[from] BuildError),

    /// The operation was cancelled by the caller.
    #[error("Operation was cancelled")]
    Cancelled,
}

impl Error {
    /// Classify this error into the caller-facing [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Request(e) => e.kind(),
            Error::Identity(e) => e.kind(),
            Error::Authentication(e) => e.kind(),
            Error::Stream(e) => e.kind(),
            Error::Parse(_) => ErrorKind::InvalidRequest,
            Error::Build(_) => ErrorKind::Transport,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// HTTP status attached to this error, if the server answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Request(RequestError::Server { status, .. }) => Some(*status),
            Error::Authentication(AuthError::GrantRejected { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// Server supplied error code (`error` field of an XRPC or OAuth error body).
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Error::Request(RequestError::Server { error, .. }) => error.as_deref(),
            Error::Authentication(AuthError::GrantRejected { error, .. }) => Some(error),
            _ => None,
        }
    }
}

// --- Request Error ---

/// Transport and server-side HTTP errors.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Network/protocol failure from reqwest (timeouts, TLS, I/O, etc.).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server returned a non-success status.
    #[error("Server responded with an error: {status} - {message}")]
    Server {
        /// The HTTP status code returned by the server.
        status: StatusCode,
        /// Machine readable error name from the body, when the server sent one.
        error: Option<String>,
        /// Human readable message, or the canonical reason when the body had none.
        message: String,
    },

    /// Caller supplied an invalid URL/path/argument for this API.
    #[error("Invalid request: {message}")]
    Validation {
        /// Human-readable explanation of what was invalid.
        message: String,
    },

    /// JSON decoding failed when parsing a server response.
    #[error("JSON decode error: {message}")]
    DecodeJson {
        /// Error message from the JSON deserializer.
        message: String,
    },
}

impl RequestError {
    fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Transport(e) if e.is_decode() => ErrorKind::Protocol,
            RequestError::Transport(_) => ErrorKind::Transport,
            RequestError::Server { status, .. } => ErrorKind::from_status(*status),
            RequestError::Validation { .. } => ErrorKind::InvalidRequest,
            RequestError::DecodeJson { .. } => ErrorKind::Protocol,
        }
    }
}

// --- Identity Error ---

/// Errors from handle and DID resolution.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Input is not a syntactically valid identifier.
    #[error(transparent)]
    InvalidIdentifier(#[from] skywire_common::identifier::Error),

    /// Every resolution strategy failed.
    #[error("Could not resolve `{identifier}`")]
    NotFound {
        /// The identifier that was looked up.
        identifier: String,
    },

    /// The DID document was missing required data or did not match the DID.
    #[error("Invalid DID document: {message}")]
    DidDocument {
        /// What was wrong with the document.
        message: String,
    },
}

impl IdentityError {
    fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::InvalidIdentifier(_) => ErrorKind::InvalidRequest,
            IdentityError::NotFound { .. } => ErrorKind::NotFound,
            IdentityError::DidDocument { .. } => ErrorKind::Protocol,
        }
    }
}

// --- Authentication Error ---

/// Errors from the session manager.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No active session: never authenticated, or authentication still in progress.
    #[error("No active session")]
    NotAuthenticated,

    /// The session ended (refresh rejected, missing refresh token, or logout).
    #[error("Session expired: {reason}")]
    SessionExpired {
        /// Why the session ended.
        reason: String,
    },

    /// The server kept rejecting the proof nonce after the single allowed retry.
    #[error("DPoP nonce rejected after retry")]
    NonceRejected,

    /// The authorization server rejected a grant.
    #[error("Grant rejected ({status}): {error}")]
    GrantRejected {
        /// HTTP status of the token endpoint response.
        status: StatusCode,
        /// OAuth error code, e.g. `invalid_grant`.
        error: String,
        /// Optional description.
        description: Option<String>,
    },

    /// Proof key could not be created, imported or used.
    #[error("DPoP key error: {0}")]
    Key(String),

    /// Caller or input validation error.
    #[error("{0}")]
    Validation(String),
}

impl AuthError {
    fn kind(&self) -> ErrorKind {
        match self {
            AuthError::NotAuthenticated => ErrorKind::NotAuthenticated,
            AuthError::SessionExpired { .. } => ErrorKind::SessionExpired,
            AuthError::NonceRejected | AuthError::GrantRejected { .. } => ErrorKind::AuthFailed,
            AuthError::Key(_) | AuthError::Validation(_) => ErrorKind::InvalidRequest,
        }
    }
}

// --- Stream Error ---

/// Errors from the event stream consumer.
#[derive(Debug, Error)]
pub enum StreamError {
    /// WebSocket handshake or frame failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame could not be decoded into an event.
    #[error("Malformed stream message: {message}")]
    Decode {
        /// Decoder error.
        message: String,
    },

    /// Subscription options are invalid.
    #[error("Invalid subscription options: {message}")]
    Options {
        /// What was wrong.
        message: String,
    },

    /// The consumer is closed.
    #[error("Stream is closed")]
    Closed,
}

impl StreamError {
    fn kind(&self) -> ErrorKind {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match self {
            StreamError::WebSocket(WsError::Capacity(_) | WsError::Protocol(_)) => {
                ErrorKind::Protocol
            }
            StreamError::WebSocket(WsError::Http(response)) => {
                ErrorKind::from_status_u16(response.status().as_u16())
            }
            StreamError::WebSocket(_) | StreamError::Closed => ErrorKind::Transport,
            StreamError::Decode { .. } => ErrorKind::Protocol,
            StreamError::Options { .. } => ErrorKind::InvalidRequest,
        }
    }
}

/// A specialized `Result` type for `skywire` operations.
pub type Result<T> = std::result::Result<T, Error>;

// Ergonomic "Staircase" From Implementations ---
macro_rules! impl_from_for_error {
    ($from_type:ty, $to_variant:path) => {
        impl From<$from_type> for Error {
            fn from(err: $from_type) -> Self {
                $to_variant(err.into())
            }
        }
    };
}

impl_from_for_error!(reqwest::Error, Error::Request);
impl_from_for_error!(skywire_common::identifier::Error, Error::Identity);
impl_from_for_error!(tokio_tungstenite::tungstenite::Error, Error::Stream);
