//! Actor identifiers: DIDs, handles, NSIDs and the `at-identifier` union.
//!
//! Syntax checks use process-wide compiled patterns; nothing here touches the network.

use std::fmt::Display;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const MAX_DID_LEN: usize = 2048;
const MAX_HANDLE_LEN: usize = 253;
const MAX_NSID_LEN: usize = 317;

static DID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").expect("valid DID pattern")
});

static HANDLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$",
    )
    .expect("valid handle pattern")
});

static NSID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z]([a-zA-Z0-9-]{0,62}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,62}[a-zA-Z0-9])?)+\.[a-zA-Z][a-zA-Z0-9]{0,62}$",
    )
    .expect("valid NSID pattern")
});

/// Errors produced when parsing identifiers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Input is not a syntactically valid DID.
    #[error("Identifier: invalid DID `{0}`")]
    InvalidDid(String),
    /// Input is not a syntactically valid handle.
    #[error("Identifier: invalid handle `{0}`")]
    InvalidHandle(String),
    /// Input is not a syntactically valid NSID.
    #[error("Identifier: invalid NSID `{0}`")]
    InvalidNsid(String),
    /// Input is neither a DID nor a handle.
    #[error("Identifier: `{0}` is neither a DID nor a handle")]
    NotAnIdentifier(String),
}

/// Decentralized Identifier, the stable canonical id of an actor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Did(String);

impl Did {
    /// Returns true if `value` has DID syntax.
    pub fn is_valid(value: &str) -> bool {
        value.len() <= MAX_DID_LEN && DID_PATTERN.is_match(value)
    }

    /// The full DID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// DID method, e.g. `plc` for `did:plc:...`.
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Everything after `did:<method>:`.
    pub fn method_specific_id(&self) -> &str {
        let prefix_len = "did:".len() + self.method().len() + 1;
        &self.0[prefix_len..]
    }

    /// Host of a `did:web` identifier (`%3A` decoded to `:`), `None` for other methods.
    ///
    /// Path-based `did:web` identifiers are not supported by the protocol and yield `None`.
    pub fn web_host(&self) -> Option<String> {
        if self.method() != "web" {
            return None;
        }
        let id = self.method_specific_id();
        if id.contains(':') {
            return None;
        }
        Some(id.replace("%3A", ":").replace("%3a", ":"))
    }
}

impl Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Did {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        if !Did::is_valid(value) {
            return Err(Error::InvalidDid(value.to_string()));
        }
        Ok(Did(value.to_string()))
    }
}

impl TryFrom<String> for Did {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        value.as_str().try_into()
    }
}

impl FromStr for Did {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

/// Human-readable, domain-backed actor name. Stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(String);

impl Handle {
    /// Returns true if `value` has handle syntax.
    pub fn is_valid(value: &str) -> bool {
        value.len() <= MAX_HANDLE_LEN && HANDLE_PATTERN.is_match(value)
    }

    /// The normalized handle.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Handle {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        let value = value.strip_prefix('@').unwrap_or(value);
        if !Handle::is_valid(value) {
            return Err(Error::InvalidHandle(value.to_string()));
        }
        Ok(Handle(value.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for Handle {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        value.as_str().try_into()
    }
}

impl FromStr for Handle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

/// Namespaced identifier of an XRPC method or record collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nsid(String);

impl Nsid {
    /// Returns true if `value` has NSID syntax.
    pub fn is_valid(value: &str) -> bool {
        value.len() <= MAX_NSID_LEN && NSID_PATTERN.is_match(value)
    }

    /// The full NSID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment, e.g. `post` for `app.bsky.feed.post`.
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or_default()
    }
}

impl Display for Nsid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Nsid {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        if !Nsid::is_valid(value) {
            return Err(Error::InvalidNsid(value.to_string()));
        }
        Ok(Nsid(value.to_string()))
    }
}

impl TryFrom<String> for Nsid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        value.as_str().try_into()
    }
}

impl FromStr for Nsid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

/// Either a DID or a handle, classified by syntax.
///
/// DID syntax is checked first, so a DID-shaped input is never treated as a handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AtIdentifier {
    /// Canonical identifier.
    Did(Did),
    /// Human-readable name that still needs resolution.
    Handle(Handle),
}

impl AtIdentifier {
    /// Returns the DID if this identifier is one.
    pub fn as_did(&self) -> Option<&Did> {
        match self {
            AtIdentifier::Did(did) => Some(did),
            AtIdentifier::Handle(_) => None,
        }
    }
}

impl Display for AtIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtIdentifier::Did(did) => did.fmt(f),
            AtIdentifier::Handle(handle) => handle.fmt(f),
        }
    }
}

impl TryFrom<&str> for AtIdentifier {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        let value = value.trim();
        if value.starts_with("did:") {
            return Did::try_from(value).map(AtIdentifier::Did);
        }
        Handle::try_from(value)
            .map(AtIdentifier::Handle)
            .map_err(|_| Error::NotAnIdentifier(value.to_string()))
    }
}

impl FromStr for AtIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

impl From<Did> for AtIdentifier {
    fn from(did: Did) -> Self {
        AtIdentifier::Did(did)
    }
}

impl From<Handle> for AtIdentifier {
    fn from(handle: Handle) -> Self {
        AtIdentifier::Handle(handle)
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.as_str().serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let string: String = Deserialize::deserialize(deserializer)?;

                string.try_into().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Did);
string_serde!(Handle);
string_serde!(Nsid);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_parts() {
        let did = Did::try_from("did:plc:ewvi7nxzyoun6zhxrhs64oiz").unwrap();
        assert_eq!(did.method(), "plc");
        assert_eq!(did.method_specific_id(), "ewvi7nxzyoun6zhxrhs64oiz");
        assert_eq!(did.web_host(), None);

        let web = Did::try_from("did:web:localhost%3A8080").unwrap();
        assert_eq!(web.web_host().as_deref(), Some("localhost:8080"));
    }

    #[test]
    fn rejects_malformed_dids() {
        for bad in ["did:", "did:PLC:abc", "did:plc:", "did:plc:abc:", "plc:abc", "did:plc:a b"] {
            assert!(Did::try_from(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn handles_are_normalized() {
        let handle = Handle::try_from("@Alice.Bsky.Social").unwrap();
        assert_eq!(handle.as_str(), "alice.bsky.social");

        assert!(Handle::try_from("localhost").is_err());
        assert!(Handle::try_from("-bad.example.com").is_err());
        assert!(Handle::try_from("bad.example.123").is_err());
    }

    #[test]
    fn nsid_syntax() {
        let nsid = Nsid::try_from("app.bsky.feed.post").unwrap();
        assert_eq!(nsid.name(), "post");
        assert!(Nsid::try_from("com.atproto.identity.resolveHandle").is_ok());
        assert!(Nsid::try_from("app.bsky").is_err());
        assert!(Nsid::try_from("app.bsky.feed.*").is_err());
    }

    #[test]
    fn at_identifier_prefers_did_shape() {
        let id = AtIdentifier::try_from("did:plc:z72i7hdynmk6r22z27h6tvur").unwrap();
        assert!(matches!(id, AtIdentifier::Did(_)));

        let id = AtIdentifier::try_from("bsky.app").unwrap();
        assert!(matches!(id, AtIdentifier::Handle(_)));

        // A malformed DID must not fall back to handle parsing.
        assert!(matches!(
            AtIdentifier::try_from("did:PLC:oops"),
            Err(Error::InvalidDid(_))
        ));
        assert!(matches!(
            AtIdentifier::try_from("not an id"),
            Err(Error::NotAnIdentifier(_))
        ));
    }

    #[test]
    fn serde_as_strings() {
        let did = Did::try_from("did:plc:abc123").unwrap();
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, "\"did:plc:abc123\"");
        let back: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(back, did);

        assert!(serde_json::from_str::<Handle>("\"not a handle\"").is_err());
    }
}
