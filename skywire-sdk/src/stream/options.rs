use std::collections::BTreeSet;

use serde_json::{Value, json};
use skywire_common::constants::jetstream_limits::{MAX_WANTED_COLLECTIONS, MAX_WANTED_DIDS};
use skywire_common::events::StreamCursor;
use skywire_common::{Did, Nsid};
use url::Url;

use super::event::{EventKind, StreamEvent};
use crate::errors::{Result, StreamError};

/// What a firehose subscription asks for.
///
/// Empty sets mean "everything". Collections may end in `.*` to match a whole
/// namespace (`app.bsky.graph.*`). The collection filter applies to commit
/// events only; identity and account events always pass it. The DID filter
/// applies to every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberOptions {
    /// Collection NSIDs or `.*` prefixes.
    pub wanted_collections: BTreeSet<String>,
    /// Repositories to follow.
    pub wanted_dids: BTreeSet<Did>,
    /// Largest message the server should send; `0` means no limit.
    pub max_message_size_bytes: u64,
    /// Replay from this timestamp on connect.
    pub cursor: Option<StreamCursor>,
}

impl SubscriberOptions {
    /// Options matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a wanted collection.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.wanted_collections.insert(collection.into());
        self
    }

    /// Add a wanted repository.
    pub fn did(mut self, did: Did) -> Self {
        self.wanted_dids.insert(did);
        self
    }

    /// Set the maximum message size.
    pub fn max_message_size_bytes(mut self, bytes: u64) -> Self {
        self.max_message_size_bytes = bytes;
        self
    }

    /// Set the replay cursor.
    pub fn cursor(mut self, cursor: StreamCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Check limits and collection syntax.
    pub fn validate(&self) -> Result<()> {
        if self.wanted_collections.len() > MAX_WANTED_COLLECTIONS {
            return Err(invalid(format!(
                "at most {MAX_WANTED_COLLECTIONS} collections may be requested"
            )));
        }
        if self.wanted_dids.len() > MAX_WANTED_DIDS {
            return Err(invalid(format!(
                "at most {MAX_WANTED_DIDS} DIDs may be requested"
            )));
        }
        for collection in &self.wanted_collections {
            let valid = match collection.strip_suffix(".*") {
                Some(prefix) => {
                    !prefix.is_empty()
                        && prefix
                            .split('.')
                            .all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
                }
                None => Nsid::is_valid(collection),
            };
            if !valid {
                return Err(invalid(format!("invalid collection filter `{collection}`")));
            }
        }
        Ok(())
    }

    /// True if the subscription wants `event`.
    pub fn matches(&self, event: &StreamEvent) -> bool {
        if !self.wanted_dids.is_empty() && !self.wanted_dids.contains(&event.did) {
            return false;
        }
        match &event.kind {
            EventKind::Commit(commit) => self.wants_collection(&commit.collection),
            _ => true,
        }
    }

    fn wants_collection(&self, collection: &str) -> bool {
        self.wanted_collections.is_empty()
            || self.wanted_collections.iter().any(|wanted| {
                match wanted.strip_suffix('*') {
                    Some(prefix) => collection.starts_with(prefix),
                    None => wanted == collection,
                }
            })
    }

    /// Append the subscription as connection parameters.
    ///
    /// With `filters == false` only the cursor is added; the filters then travel
    /// in-band as the first `options_update`.
    pub(crate) fn append_to(&self, url: &mut Url, filters: bool) {
        let mut query = url.query_pairs_mut();
        if filters {
            for collection in &self.wanted_collections {
                query.append_pair("wantedCollections", collection);
            }
            for did in &self.wanted_dids {
                query.append_pair("wantedDids", did.as_str());
            }
            if self.max_message_size_bytes > 0 {
                query.append_pair(
                    "maxMessageSizeBytes",
                    &self.max_message_size_bytes.to_string(),
                );
            }
        }
        if let Some(cursor) = self.cursor {
            query.append_pair("cursor", &cursor.to_string());
        }
    }

    /// The `options_update` control message for these filters.
    pub fn to_options_update(&self) -> Value {
        json!({
            "type": "options_update",
            "payload": {
                "wantedCollections": self.wanted_collections,
                "wantedDids": self.wanted_dids.iter().map(Did::as_str).collect::<Vec<_>>(),
                "maxMessageSizeBytes": self.max_message_size_bytes,
            }
        })
    }
}

fn invalid(message: String) -> crate::Error {
    StreamError::Options { message }.into()
}
