#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(any(), deny(clippy::unwrap_used))]

mod client;
mod envelope;
pub mod errors;
mod global;
mod identity;
mod session;
mod skywire;
mod stream;
mod util;
mod xrpc;

pub mod prelude;

// --- PUBLIC API EXPORTS ---
// Transport
pub use client::core::{ClientConfig, HttpClient, HttpClientBuilder};
// Façade and actors
pub use identity::{DidDocument, DidService, Identity, IdentityResolver};
pub use session::{
    DEFAULT_REFRESH_SKEW, DpopKey, SessionConfig, SessionManager, SessionSnapshot, SessionState,
    StoredSession,
};
pub use skywire::Skywire;
pub use stream::{
    AccountEvent, CloseReason, CommitEvent, ConsumerControl, EventKind, FirehoseConsumer,
    HandlerId, IdentityEvent, JetstreamBuilder, StreamEvent, SubscriberOptions,
};
pub use xrpc::{Page, XrpcClient, XrpcRequest};

// Envelope, errors and global client
pub use envelope::{ErrorDetail, ErrorKind, ResultEnvelope};
pub use errors::{BuildError, Error, Result};
pub use global::{drop_global_client, global_client, set_global_client};

// Re-exports
pub use reqwest::{Method, StatusCode};
pub use skywire_common::events::{CommitOperation, StreamCursor};
pub use skywire_common::session::TokenSet;
pub use skywire_common::{AtIdentifier, Did, Handle, Nsid, constants};
