//! High-level façade for the skywire crate.
//!
//! ## Mental model
//! - `Skywire` - your entrypoint to the SDK. Owns an `HttpClient` and an identity memo.
//! - `IdentityResolver` - handle and DID lookups.
//! - `SessionManager` - DPoP-bound OAuth session for one account.
//! - `XrpcClient` - typed queries and procedures, anonymous or as the session's account.
//! - `JetstreamBuilder` - firehose subscriptions.
//!
//! ## Quick starts
//! ### 1) Public read
//! ```no_run
//! use skywire::Skywire;
//!
//! # async fn run() -> skywire::Result<()> {
//! let sky = Skywire::new()?;
//! let followers = sky
//!     .xrpc()
//!     .query("app.bsky.graph.getFollowers")
//!     .param("actor", "atproto.com")
//!     .limit(50)
//!     .send_page::<serde_json::Value>("followers")
//!     .await;
//! println!("{:?}", followers.result().map(|page| page.items.len()));
//! # Ok(()) }
//! ```
//!
//! ### 2) Authenticated call on the account's own server
//! ```no_run
//! use skywire::{SessionConfig, Skywire};
//! use url::Url;
//!
//! # async fn run(code: &str, verifier: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let sky = Skywire::new()?;
//! let config = SessionConfig::new(
//!     "https://app.example/client-metadata.json",
//!     Url::parse("https://auth.example/oauth/token")?,
//! );
//! let session = sky.session_manager(config);
//! session
//!     .exchange_code(code, verifier, "https://app.example/callback")
//!     .await
//!     .into_result()?;
//!
//! let xrpc = sky.xrpc_for_session(&session).await.into_result()?;
//! let prefs = xrpc
//!     .query("app.bsky.actor.getPreferences")
//!     .send::<serde_json::Value>()
//!     .await;
//! # let _ = prefs;
//! # Ok(()) }
//! ```

use crate::errors::AuthError;
use crate::{
    HttpClient, IdentityResolver, JetstreamBuilder, Result, ResultEnvelope, SessionConfig,
    SessionManager, XrpcClient,
};

/// High-level façade. Owns an [`HttpClient`] and constructs the main actors.
///
/// Clones share the transport and the handle memo.
#[derive(Clone, Debug)]
pub struct Skywire {
    client: HttpClient,
    resolver: IdentityResolver,
}

impl Skywire {
    /// Construct with default endpoints.
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(HttpClient::new()?))
    }

    /// Construct from an already-configured transport.
    pub fn with_client(client: HttpClient) -> Self {
        Self {
            resolver: IdentityResolver::with_client(client.clone()),
            client,
        }
    }

    /// Identity resolver sharing this façade's memo.
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Anonymous XRPC client on the configured service.
    pub fn xrpc(&self) -> XrpcClient {
        XrpcClient::with_client(self.client.clone())
    }

    /// Fresh, anonymous session manager with a new proof key.
    pub fn session_manager(&self, config: SessionConfig) -> SessionManager {
        SessionManager::with_client(self.client.clone(), config)
    }

    /// Authenticated XRPC client pointed at the personal data server of the
    /// session's account, found through its DID document.
    pub async fn xrpc_for_session(&self, session: &SessionManager) -> ResultEnvelope<XrpcClient> {
        let Some(did) = session.did().await else {
            return ResultEnvelope::from(Err(AuthError::NotAuthenticated.into()));
        };
        self.resolver
            .resolve_identity(did.as_str())
            .await
            .map(|identity| {
                tracing::debug!(%did, service = %identity.service_endpoint, "session service resolved");
                XrpcClient::authenticated(session.clone(), identity.service_endpoint)
            })
    }

    /// Firehose builder on the default endpoint.
    pub fn jetstream(&self) -> JetstreamBuilder {
        JetstreamBuilder::new()
    }

    /// Access the underlying transport (advanced use).
    #[inline]
    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn anonymous_session_has_no_service() {
        let sky = Skywire::new().unwrap();
        let session = sky.session_manager(SessionConfig::new(
            "client",
            Url::parse("http://127.0.0.1:9/token").unwrap(),
        ));
        let envelope = sky.xrpc_for_session(&session).await;
        assert!(envelope.is_kind(ErrorKind::NotAuthenticated));
        assert_eq!(envelope.status_code(), None);
    }

    #[test]
    fn actors_share_the_transport() {
        let client = HttpClient::builder()
            .service(Url::parse("http://localhost:2583").unwrap())
            .build()
            .unwrap();
        let sky = Skywire::with_client(client);
        assert_eq!(sky.xrpc().service().as_str(), "http://localhost:2583/");
        assert_eq!(sky.client().service().as_str(), "http://localhost:2583/");
    }
}
