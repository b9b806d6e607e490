//! DPoP-bound sessions: proof keys, token lifecycle and persistence.

mod core;
pub mod dpop;
mod persist;

pub use self::core::{
    DEFAULT_REFRESH_SKEW, SessionConfig, SessionManager, SessionSnapshot, SessionState,
};
pub use dpop::DpopKey;
pub use persist::StoredSession;
