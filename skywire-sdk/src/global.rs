//! Global, resettable [`HttpClient`] shared by the lazy constructors.
//!
//! `IdentityResolver::new()`, `XrpcClient::new()` and `SessionManager::new(..)`
//! all reuse this process-wide client instead of taking one explicitly, so
//! they share a single connection pool and endpoint configuration.
//!
//! Backing storage is an `ArcSwapOption<HttpClient>` inside a `OnceLock`:
//! reads are a single atomic load, and replacing or clearing the global never
//! invalidates clients that were already handed out.
//!
//! Concurrent first calls may each build a client; the last stored wins.
//!
//! Tests can call [`drop_global_client`] for a fresh default, or
//! [`set_global_client`] to point the lazy constructors at a local server.
//!
//! ```
//! # use skywire::{global_client, set_global_client, HttpClient};
//! let client = global_client()?;
//!
//! let custom = HttpClient::builder().user_agent_extra("mybot/0.1").build()?;
//! set_global_client(custom);
//! let now_custom = global_client()?;
//! # Ok::<(), skywire::BuildError>(())
//! ```

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::OnceLock;

use crate::{BuildError, HttpClient};

static GLOBAL_CLIENT: OnceLock<ArcSwapOption<HttpClient>> = OnceLock::new();

#[inline]
fn slot() -> &'static ArcSwapOption<HttpClient> {
    GLOBAL_CLIENT.get_or_init(|| ArcSwapOption::from(None))
}

/// Get-or-init the process-wide default client.
///
/// Returns a cheap clone; it keeps working after [`set_global_client`] or
/// [`drop_global_client`].
pub fn global_client() -> Result<HttpClient, BuildError> {
    if let Some(current) = slot().load_full() {
        return Ok(current.as_ref().clone());
    }

    let fresh = HttpClient::new()?;
    slot().store(Some(Arc::new(fresh.clone())));
    Ok(fresh)
}

/// Replace the global default client.
pub fn set_global_client(new_client: HttpClient) {
    slot().store(Some(Arc::new(new_client)));
}

/// Clear the global default client; the next [`global_client`] builds a fresh one.
pub fn drop_global_client() {
    slot().store(None);
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    #[test]
    fn set_and_drop() {
        let custom = HttpClient::builder()
            .service(Url::parse("http://localhost:2583").unwrap())
            .build()
            .unwrap();
        set_global_client(custom);
        let current = global_client().unwrap();
        assert_eq!(current.service().as_str(), "http://localhost:2583/");

        drop_global_client();
        let fresh = global_client().unwrap();
        assert_eq!(fresh.service().as_str(), "https://public.api.bsky.app/");
        // Handles taken earlier are unaffected.
        assert_eq!(current.service().as_str(), "http://localhost:2583/");
    }
}
