use serde::{Deserialize, Serialize};
use serde_json::Value;
use skywire_common::Did;
use skywire_common::events::{CommitOperation, StreamCursor};

use crate::errors::{Result, StreamError};

/// One message from the firehose.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Repository (actor) the event is about.
    pub did: Did,
    /// Server timestamp in microseconds; doubles as the resume cursor.
    pub time_us: u64,
    /// Kind-specific payload.
    pub kind: EventKind,
}

/// Discriminated payload of a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A record was created, updated or deleted.
    Commit(CommitEvent),
    /// Handle or DID document change.
    Identity(IdentityEvent),
    /// Hosting status change.
    Account(AccountEvent),
    /// A kind this SDK does not know; the full message is kept.
    Other {
        /// The `kind` tag.
        kind: String,
        /// The whole message.
        raw: Value,
    },
}

/// Record change carried by a commit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    /// Repository revision.
    pub rev: String,
    /// What happened to the record.
    pub operation: CommitOperation,
    /// Record collection NSID, e.g. `app.bsky.feed.post`.
    pub collection: String,
    /// Record key.
    pub rkey: String,
    /// Record body as JSON bytes. Absent for deletes.
    pub record: Option<Vec<u8>>,
    /// Record CID. Absent for deletes.
    pub cid: Option<String>,
}

impl CommitEvent {
    /// Decode the record body.
    pub fn record_as<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T>> {
        self.record.as_deref().map(|bytes| {
            serde_json::from_slice(bytes).map_err(|e| {
                StreamError::Decode {
                    message: e.to_string(),
                }
                .into()
            })
        })
    }
}

/// Payload of an identity event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEvent {
    /// Subject DID.
    pub did: Did,
    /// New handle, if any.
    #[serde(default)]
    pub handle: Option<String>,
    /// Upstream sequence number.
    pub seq: u64,
    /// Upstream timestamp.
    pub time: String,
}

/// Payload of an account event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEvent {
    /// Whether the account is active.
    pub active: bool,
    /// Subject DID.
    pub did: Did,
    /// Upstream sequence number.
    pub seq: u64,
    /// Upstream timestamp.
    pub time: String,
    /// Why the account is inactive (`takendown`, `suspended`, `deactivated`, ...).
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Deserialize)]
struct RawEvent {
    did: Did,
    time_us: u64,
    kind: String,
    #[serde(default)]
    commit: Option<RawCommit>,
    #[serde(default)]
    identity: Option<IdentityEvent>,
    #[serde(default)]
    account: Option<AccountEvent>,
}

#[derive(Deserialize)]
struct RawCommit {
    rev: String,
    operation: CommitOperation,
    collection: String,
    rkey: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    cid: Option<String>,
}

impl StreamEvent {
    /// Cursor that resumes right at this event.
    pub fn cursor(&self) -> StreamCursor {
        StreamCursor::new(self.time_us)
    }

    /// The commit payload, for commit events.
    pub fn as_commit(&self) -> Option<&CommitEvent> {
        match &self.kind {
            EventKind::Commit(commit) => Some(commit),
            _ => None,
        }
    }

    /// Decode a JSON text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(decode)?;
        let raw = RawEvent::deserialize(&value).map_err(decode)?;

        let kind = match raw.kind.as_str() {
            "commit" => {
                let commit = raw.commit.ok_or_else(|| missing("commit"))?;
                let record = commit
                    .record
                    .map(|record| serde_json::to_vec(&record))
                    .transpose()
                    .map_err(decode)?;
                EventKind::Commit(CommitEvent {
                    rev: commit.rev,
                    operation: commit.operation,
                    collection: commit.collection,
                    rkey: commit.rkey,
                    record,
                    cid: commit.cid,
                })
            }
            "identity" => EventKind::Identity(raw.identity.ok_or_else(|| missing("identity"))?),
            "account" => EventKind::Account(raw.account.ok_or_else(|| missing("account"))?),
            _ => EventKind::Other {
                kind: raw.kind,
                raw: value,
            },
        };

        Ok(StreamEvent {
            did: raw.did,
            time_us: raw.time_us,
            kind,
        })
    }
}

fn decode(error: serde_json::Error) -> crate::Error {
    StreamError::Decode {
        message: error.to_string(),
    }
    .into()
}

fn missing(field: &str) -> crate::Error {
    StreamError::Decode {
        message: format!("`{field}` event without `{field}` payload"),
    }
    .into()
}
