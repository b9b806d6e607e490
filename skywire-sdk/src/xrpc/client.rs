use reqwest::Method;
use url::Url;

use super::request::XrpcRequest;
use crate::errors::Result;
use crate::{HttpClient, SessionManager, global::global_client};

/// Typed XRPC caller bound to one service.
///
/// Unauthenticated clients talk to the configured service (an AppView by
/// default). Authenticated clients route every request through a
/// [`SessionManager`], which attaches DPoP authorization and handles nonce
/// challenges and token refresh.
///
/// ```no_run
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// use serde::Deserialize;
/// use skywire::XrpcClient;
///
/// #[derive(Deserialize)]
/// struct Profile { handle: String }
///
/// let xrpc = XrpcClient::new()?;
/// let profile = xrpc
///     .query("app.bsky.actor.getProfile")
///     .param("actor", "atproto.com")
///     .send::<Profile>()
///     .await;
/// match profile.into_result() {
///     Ok(p) => println!("{}", p.handle),
///     Err(e) => eprintln!("{e}"),
/// }
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct XrpcClient {
    pub(crate) client: HttpClient,
    pub(crate) service: Url,
    pub(crate) session: Option<SessionManager>,
}

impl XrpcClient {
    /// Unauthenticated client on the global client's service.
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(global_client()?))
    }

    /// Unauthenticated client on `client`'s configured service.
    pub fn with_client(client: HttpClient) -> Self {
        let service = client.service().clone();
        Self {
            client,
            service,
            session: None,
        }
    }

    /// Authenticated client sending to `service` (usually the account's PDS).
    pub fn authenticated(session: SessionManager, service: Url) -> Self {
        Self {
            client: session.client().clone(),
            service,
            session: Some(session),
        }
    }

    /// Same transport and session, different service.
    pub fn with_service(mut self, service: Url) -> Self {
        self.service = service;
        self
    }

    /// Service requests are sent to.
    pub fn service(&self) -> &Url {
        &self.service
    }

    /// Session used for authorization, if any.
    pub fn session(&self) -> Option<&SessionManager> {
        self.session.as_ref()
    }

    /// `GET /xrpc/<nsid>`.
    pub fn query(&self, nsid: &str) -> XrpcRequest<'_> {
        XrpcRequest::new(self, Method::GET, nsid)
    }

    /// `POST /xrpc/<nsid>`.
    pub fn procedure(&self, nsid: &str) -> XrpcRequest<'_> {
        XrpcRequest::new(self, Method::POST, nsid)
    }

    /// Any method on `/xrpc/<nsid>`.
    pub fn call(&self, method: Method, nsid: &str) -> XrpcRequest<'_> {
        XrpcRequest::new(self, method, nsid)
    }
}
