//! Event-stream primitives shared by the stream consumer and its callers.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Resume position in the firehose: the `time_us` of an event.
///
/// Microseconds since the unix epoch, as assigned by the stream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamCursor(u64);

impl StreamCursor {
    /// Create a cursor from a microsecond timestamp.
    #[must_use]
    pub fn new(time_us: u64) -> Self {
        Self(time_us)
    }

    /// Microseconds since the unix epoch.
    #[must_use]
    pub fn time_us(&self) -> u64 {
        self.0
    }
}

impl Display for StreamCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamCursor {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StreamCursor(s.parse()?))
    }
}

impl From<u64> for StreamCursor {
    fn from(time_us: u64) -> Self {
        StreamCursor(time_us)
    }
}

/// Repository operation carried by a commit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOperation {
    /// Record created.
    Create,
    /// Record replaced.
    Update,
    /// Record deleted; no payload.
    Delete,
}

impl CommitOperation {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitOperation::Create => "create",
            CommitOperation::Update => "update",
            CommitOperation::Delete => "delete",
        }
    }
}

impl Display for CommitOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
