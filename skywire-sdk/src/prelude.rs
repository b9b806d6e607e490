//! Common imports for quick starts.

// Common
pub use crate::{BuildError, Error, ErrorDetail, ErrorKind, Result, ResultEnvelope};

// Transport
pub use crate::{HttpClient, HttpClientBuilder};

// Façade and actors
pub use crate::Skywire;
// Handle and DID resolution
pub use crate::{Identity, IdentityResolver};
// DPoP sessions
pub use crate::{SessionConfig, SessionManager, SessionState};
// Typed XRPC calls
pub use crate::{Page, XrpcClient};
// Firehose
pub use crate::{FirehoseConsumer, JetstreamBuilder, StreamEvent, SubscriberOptions};

// Identifiers
pub use crate::{AtIdentifier, Did, Handle, Nsid};
