//! Constants used across skywire.

/// Default public service used for unauthenticated XRPC calls and handle resolution.
pub const DEFAULT_SERVICE: &str = "https://public.api.bsky.app";

/// Default `did:plc` directory.
pub const DEFAULT_PLC_DIRECTORY: &str = "https://plc.directory";

/// Default Jetstream firehose endpoint.
pub const DEFAULT_JETSTREAM: &str = "wss://jetstream2.us-east.bsky.network/subscribe";

/// XRPC path prefix.
pub const XRPC_PREFIX: &str = "/xrpc/";

/// Well-known path serving a handle's DID as plain text.
pub const WELL_KNOWN_ATPROTO_DID: &str = "/.well-known/atproto-did";

/// Well-known path of a `did:web` DID document.
pub const WELL_KNOWN_DID_JSON: &str = "/.well-known/did.json";

/// Service id of the personal data server entry in a DID document.
pub const PDS_SERVICE_ID: &str = "#atproto_pds";

/// XRPC methods the SDK calls itself.
pub mod nsid {
    /// Resolve a handle to a DID.
    pub const RESOLVE_HANDLE: &str = "com.atproto.identity.resolveHandle";
}

/// HTTP header names specific to DPoP.
pub mod headers {
    /// Request header carrying the proof token.
    pub const DPOP: &str = "DPoP";
    /// Response header carrying a fresh server nonce.
    pub const DPOP_NONCE: &str = "DPoP-Nonce";
    /// Rate limit reset (unix seconds), as sent by XRPC servers.
    pub const RATELIMIT_RESET: &str = "ratelimit-reset";
}

/// Limits imposed by the Jetstream subscription protocol.
pub mod jetstream_limits {
    /// Maximum number of `wantedCollections` entries.
    pub const MAX_WANTED_COLLECTIONS: usize = 100;
    /// Maximum number of `wantedDids` entries.
    pub const MAX_WANTED_DIDS: usize = 10_000;
}
