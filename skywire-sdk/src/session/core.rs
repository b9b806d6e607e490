use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use skywire_common::Did;
use skywire_common::constants::headers::{DPOP, DPOP_NONCE};
use skywire_common::session::{OAuthErrorBody, TokenResponse, TokenSet};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use super::dpop::DpopKey;
use crate::client::http::{PreparedRequest, RawResponse};
use crate::errors::{AuthError, Error, RequestError, Result};
use crate::util::{XrpcErrorBody, check_http_status, now_secs};
use crate::{HttpClient, ResultEnvelope, global::global_client};

/// Default margin before `expires_at` at which the access token is refreshed proactively.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(30);

/// Authorization server settings for a [`SessionManager`].
///
/// ```
/// # use skywire::SessionConfig;
/// # use url::Url;
/// let config = SessionConfig::new(
///     "https://app.example.com/client-metadata.json",
///     Url::parse("https://bsky.social/oauth/token").unwrap(),
/// )
/// .revocation_endpoint(Url::parse("https://bsky.social/oauth/revoke").unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// OAuth client id sent with every grant.
    pub client_id: String,
    /// Token endpoint for `authorization_code` and `refresh_token` grants.
    pub token_endpoint: Url,
    /// Optional revocation endpoint used by [`SessionManager::logout`].
    pub revocation_endpoint: Option<Url>,
    /// Refresh this long before the access token expires.
    pub refresh_skew: Duration,
}

impl SessionConfig {
    /// Config with no revocation endpoint and [`DEFAULT_REFRESH_SKEW`].
    pub fn new(client_id: impl Into<String>, token_endpoint: Url) -> Self {
        Self {
            client_id: client_id.into(),
            token_endpoint,
            revocation_endpoint: None,
            refresh_skew: DEFAULT_REFRESH_SKEW,
        }
    }

    /// Set the revocation endpoint.
    pub fn revocation_endpoint(mut self, endpoint: Url) -> Self {
        self.revocation_endpoint = Some(endpoint);
        self
    }

    /// Set the proactive refresh margin. `Duration::ZERO` only refreshes reactively.
    pub fn refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }
}

/// Externally visible lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No credentials yet.
    Anonymous,
    /// A grant is being exchanged.
    Authenticating,
    /// Tokens are held and usable.
    Active,
    /// Terminal until the caller authenticates again.
    LoggedOut,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionState::Anonymous => "anonymous",
            SessionState::Authenticating => "authenticating",
            SessionState::Active => "active",
            SessionState::LoggedOut => "logged-out",
        })
    }
}

/// Point-in-time view of a session, read under a single lock.
///
/// Tokens are never part of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Authenticated account, when active.
    pub did: Option<Did>,
    /// Access token expiry in unix seconds, when known.
    pub expires_at: Option<u64>,
    /// Whether the session can be refreshed.
    pub has_refresh_token: bool,
}

#[derive(Clone)]
pub(crate) struct ActiveSession {
    pub did: Did,
    pub tokens: TokenSet,
}

#[derive(Clone)]
pub(crate) enum State {
    Anonymous,
    Authenticating,
    Active(ActiveSession),
    LoggedOut,
}

impl State {
    fn label(&self) -> SessionState {
        match self {
            State::Anonymous => SessionState::Anonymous,
            State::Authenticating => SessionState::Authenticating,
            State::Active(_) => SessionState::Active,
            State::LoggedOut => SessionState::LoggedOut,
        }
    }
}

/// Everything guarded by the session lock. Tokens and nonces are always read together.
pub(crate) struct SessionCell {
    pub state: State,
    /// Latest `DPoP-Nonce` per contacted origin; `None` until the origin sends one.
    pub nonces: HashMap<String, Option<String>>,
}

pub(crate) struct Inner {
    pub client: HttpClient,
    pub config: SessionConfig,
    pub key: DpopKey,
    pub cell: RwLock<SessionCell>,
    /// Held for the whole duration of a refresh exchange.
    refresh_gate: Mutex<()>,
    /// Held while a request first contacts an origin or answers a nonce challenge.
    nonce_gate: Mutex<()>,
}

/// How the server pushed back on an authenticated request.
#[derive(Debug, PartialEq, Eq)]
enum Challenge {
    /// Proof nonce stale or absent; carries the nonce from `DPoP-Nonce`, if any.
    Nonce(Option<String>),
    /// Access token expired or revoked.
    Expired,
    None,
}

/// Owner of one account's DPoP-bound tokens.
///
/// Every authenticated request made through the SDK passes through here. The
/// manager attaches `Authorization: DPoP <token>` and a fresh proof, answers a
/// nonce challenge with exactly one retry, and answers an expired access token
/// with one refresh followed by one retry.
///
/// State moves `Anonymous -> Authenticating -> Active -> {Active, LoggedOut}`
/// and is only ever changed by methods on this type. Refreshes are serialized:
/// callers that saw the same stale token wait for the one in-flight refresh and
/// reuse its result, so a rotating refresh token is never spent twice.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("client_id", &self.inner.config.client_id)
            .field("token_endpoint", &self.inner.config.token_endpoint.as_str())
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Anonymous session on the global client with a freshly generated proof key.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Ok(Self::with_client(global_client()?, config))
    }

    /// Anonymous session on an explicit client with a freshly generated proof key.
    pub fn with_client(client: HttpClient, config: SessionConfig) -> Self {
        Self::with_key(client, config, DpopKey::generate())
    }

    /// Anonymous session using an existing proof key.
    pub fn with_key(client: HttpClient, config: SessionConfig, key: DpopKey) -> Self {
        Self::from_parts(client, config, key, State::Anonymous)
    }

    pub(crate) fn from_parts(
        client: HttpClient,
        config: SessionConfig,
        key: DpopKey,
        state: State,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                key,
                cell: RwLock::new(SessionCell {
                    state,
                    nonces: HashMap::new(),
                }),
                refresh_gate: Mutex::new(()),
                nonce_gate: Mutex::new(()),
            }),
        }
    }

    // === Getters ===

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.cell.read().await.state.label()
    }

    /// DID of the authenticated account, when active.
    pub async fn did(&self) -> Option<Did> {
        match &self.inner.cell.read().await.state {
            State::Active(active) => Some(active.did.clone()),
            _ => None,
        }
    }

    /// State, account and token metadata as one consistent view.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let cell = self.inner.cell.read().await;
        match &cell.state {
            State::Active(active) => SessionSnapshot {
                state: SessionState::Active,
                did: Some(active.did.clone()),
                expires_at: active.tokens.expires_at,
                has_refresh_token: active.tokens.refresh_token.is_some(),
            },
            other => SessionSnapshot {
                state: other.label(),
                did: None,
                expires_at: None,
                has_refresh_token: false,
            },
        }
    }

    /// The proof key bound to this session's tokens.
    pub fn dpop_key(&self) -> &DpopKey {
        &self.inner.key
    }

    /// Settings this manager was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Transport used for token and resource requests.
    pub fn client(&self) -> &HttpClient {
        &self.inner.client
    }

    // === Authentication ===

    /// Exchange an authorization code (with its PKCE verifier) for tokens.
    ///
    /// Passes through `Authenticating`. On failure the previous state is restored.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> ResultEnvelope<Did> {
        let previous = self.begin_authentication().await;
        let client_id = self.inner.config.client_id.clone();
        let result: Result<(Did, TokenSet)> = async {
            let response = self
                .token_request(&[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("code_verifier", code_verifier),
                    ("redirect_uri", redirect_uri),
                    ("client_id", &client_id),
                ])
                .await?;
            if !response.token_type.eq_ignore_ascii_case("dpop") {
                return Err(AuthError::Validation(format!(
                    "expected a DPoP-bound token, got `{}`",
                    response.token_type
                ))
                .into());
            }
            let did = response.sub.clone().ok_or_else(|| {
                AuthError::Validation("token response is missing `sub`".into())
            })?;
            Ok((did, TokenSet::from_response(&response, now_secs(), None)))
        }
        .await;

        match result {
            Ok((did, tokens)) => {
                self.activate(did.clone(), tokens).await;
                ResultEnvelope::ok(Some(StatusCode::OK), did)
            }
            Err(error) => {
                self.inner.cell.write().await.state = previous;
                ResultEnvelope::from(Err(error))
            }
        }
    }

    /// Take over tokens obtained by a flow outside this SDK.
    ///
    /// The tokens must be bound to this manager's [`DpopKey`].
    pub async fn adopt_tokens(&self, did: Did, tokens: TokenSet) {
        self.begin_authentication().await;
        self.activate(did, tokens).await;
    }

    /// Force a refresh-token exchange now.
    pub async fn refresh(&self) -> ResultEnvelope<()> {
        let result: Result<()> = async {
            let access = self.access_token().await?;
            self.refresh_after(&access).await
        }
        .await;
        ResultEnvelope::from_result(Some(StatusCode::OK), result)
    }

    /// End the session.
    ///
    /// The refresh token is revoked best-effort when a revocation endpoint is
    /// configured; a failed revocation is logged and does not fail the logout.
    pub async fn logout(&self) -> ResultEnvelope<()> {
        let refresh_token = {
            let mut cell = self.inner.cell.write().await;
            let previous = std::mem::replace(&mut cell.state, State::LoggedOut);
            match previous {
                State::Active(active) => active.tokens.refresh_token,
                _ => None,
            }
        };
        tracing::info!("session logged out");

        if let (Some(endpoint), Some(token)) =
            (self.inner.config.revocation_endpoint.clone(), refresh_token)
        {
            if let Err(error) = self.revoke(endpoint, &token).await {
                tracing::warn!(%error, "token revocation failed");
            }
        }
        ResultEnvelope::ok(None, ())
    }

    // === Authenticated requests ===

    /// Send `request` with DPoP authorization, handling nonce challenges and token expiry.
    pub(crate) async fn send(&self, request: &PreparedRequest) -> Result<RawResponse> {
        self.refresh_if_expiring().await?;

        let mut nonce_retried = false;
        let mut refreshed = false;
        loop {
            // Callers queued here pick up the nonce recorded by the one ahead of them.
            let gate = if nonce_retried || !self.origin_known(&request.url).await {
                Some(self.inner.nonce_gate.lock().await)
            } else {
                None
            };
            let access = self.access_token().await?;
            let response = self.send_once(request, &access).await;
            drop(gate);
            let response = response?;

            match classify(&response) {
                Challenge::Nonce(fresh) => {
                    if nonce_retried || fresh.is_none() {
                        tracing::warn!(url = %request.url, "DPoP nonce rejected after retry");
                        return Err(AuthError::NonceRejected.into());
                    }
                    tracing::debug!(url = %request.url, "retrying with fresh DPoP nonce");
                    nonce_retried = true;
                }
                Challenge::Expired if !refreshed => {
                    tracing::debug!(url = %request.url, "access token expired, refreshing");
                    refreshed = true;
                    self.refresh_after(&access).await?;
                }
                _ => return Ok(response),
            }
        }
    }

    /// Headers authorizing a single request, for transports that cannot go
    /// through [`Self::send`] (the stream handshake).
    pub(crate) async fn auth_headers(&self, method: &Method, url: &Url) -> Result<HeaderMap> {
        self.refresh_if_expiring().await?;
        let access = self.access_token().await?;
        let nonce = self.nonce_for(url).await;
        let proof = self
            .inner
            .key
            .proof(method, url, nonce.as_deref(), Some(&access))?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&format!("DPoP {access}"))?);
        headers.insert(DPOP, header_value(&proof)?);
        Ok(headers)
    }

    async fn send_once(&self, request: &PreparedRequest, access: &str) -> Result<RawResponse> {
        let nonce = self.nonce_for(&request.url).await;
        let proof =
            self.inner
                .key
                .proof(&request.method, &request.url, nonce.as_deref(), Some(access))?;
        let builder = request
            .builder(&self.inner.client)
            .header(AUTHORIZATION, format!("DPoP {access}"))
            .header(DPOP, proof);
        let response = self.inner.client.execute(builder).await?;
        self.record_nonce(&request.url, &response).await;
        Ok(response)
    }

    // === Refresh ===

    async fn refresh_if_expiring(&self) -> Result<()> {
        let skew = self.inner.config.refresh_skew.as_secs();
        let stale = {
            let cell = self.inner.cell.read().await;
            match &cell.state {
                State::Active(active) if active.tokens.expires_within(now_secs(), skew) => {
                    Some(active.tokens.access_token.clone())
                }
                _ => None,
            }
        };
        match stale {
            Some(access) => self.refresh_after(&access).await,
            None => Ok(()),
        }
    }

    /// Refresh unless another caller already replaced `stale_access`.
    async fn refresh_after(&self, stale_access: &str) -> Result<()> {
        let _gate = self.inner.refresh_gate.lock().await;

        let (did, refresh_token) = {
            let cell = self.inner.cell.read().await;
            match &cell.state {
                State::Active(active) if active.tokens.access_token != stale_access => {
                    tracing::debug!("reusing token refreshed by a concurrent call");
                    return Ok(());
                }
                State::Active(active) => (active.did.clone(), active.tokens.refresh_token.clone()),
                State::LoggedOut => return Err(logged_out()),
                State::Anonymous | State::Authenticating => {
                    return Err(AuthError::NotAuthenticated.into());
                }
            }
        };

        let Some(refresh_token) = refresh_token else {
            if !self.end_session(stale_access, "no refresh token").await {
                return self.superseded().await;
            }
            return Err(AuthError::SessionExpired {
                reason: "no refresh token available".into(),
            }
            .into());
        };

        let client_id = self.inner.config.client_id.clone();
        let response = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", &client_id),
            ])
            .await;

        match response {
            Ok(response) => {
                if response.sub.as_ref().is_some_and(|sub| sub != &did) {
                    if !self
                        .end_session(stale_access, "refresh returned a different account")
                        .await
                    {
                        return self.superseded().await;
                    }
                    return Err(AuthError::SessionExpired {
                        reason: "refresh returned tokens for a different account".into(),
                    }
                    .into());
                }
                let tokens = TokenSet::from_response(&response, now_secs(), Some(&refresh_token));
                {
                    let mut cell = self.inner.cell.write().await;
                    if is_generation(&cell.state, stale_access) {
                        cell.state = State::Active(ActiveSession { did, tokens });
                        tracing::info!("session tokens refreshed");
                        return Ok(());
                    }
                }

                // Logged out or re-authenticated while the exchange was in flight.
                tracing::info!("session changed during refresh, discarding refreshed tokens");
                if let (Some(endpoint), Some(token)) = (
                    self.inner.config.revocation_endpoint.clone(),
                    response.refresh_token.as_deref(),
                ) {
                    if let Err(error) = self.revoke(endpoint, token).await {
                        tracing::warn!(%error, "revoking discarded refresh token failed");
                    }
                }
                self.superseded().await
            }
            Err(Error::Authentication(AuthError::GrantRejected {
                error, description, ..
            })) => {
                if !self.end_session(stale_access, &error).await {
                    return self.superseded().await;
                }
                Err(AuthError::SessionExpired {
                    reason: description.unwrap_or(error),
                }
                .into())
            }
            // Transport and 5xx failures leave the session usable.
            Err(error) => Err(error),
        }
    }

    /// POST a form grant to the token endpoint, answering one nonce challenge.
    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let endpoint = self.inner.config.token_endpoint.clone();
        let request = PreparedRequest::new(Method::POST, endpoint.clone()).form_body(form);

        let mut retried = false;
        loop {
            let nonce = self.nonce_for(&endpoint).await;
            let proof = self
                .inner
                .key
                .proof(&Method::POST, &endpoint, nonce.as_deref(), None)?;
            let builder = request.builder(&self.inner.client).header(DPOP, proof);
            let response = self.inner.client.execute(builder).await?;
            self.record_nonce(&endpoint, &response).await;

            if !response.status.is_client_error() {
                return check_http_status(response)?.json();
            }

            let body: OAuthErrorBody =
                serde_json::from_slice(&response.body).unwrap_or_else(|_| OAuthErrorBody {
                    error: response
                        .status
                        .canonical_reason()
                        .unwrap_or("unknown_error")
                        .to_string(),
                    error_description: None,
                });

            if body.is_use_dpop_nonce() {
                if retried || response.header(DPOP_NONCE).is_none() {
                    return Err(AuthError::NonceRejected.into());
                }
                retried = true;
                continue;
            }

            return Err(AuthError::GrantRejected {
                status: response.status,
                error: body.error,
                description: body.error_description,
            }
            .into());
        }
    }

    async fn revoke(&self, endpoint: Url, token: &str) -> Result<()> {
        let request = PreparedRequest::new(Method::POST, endpoint.clone()).form_body(&[
            ("token", token),
            ("token_type_hint", "refresh_token"),
            ("client_id", &self.inner.config.client_id),
        ]);
        let nonce = self.nonce_for(&endpoint).await;
        let proof = self
            .inner
            .key
            .proof(&Method::POST, &endpoint, nonce.as_deref(), None)?;
        let response = self
            .inner
            .client
            .execute(request.builder(&self.inner.client).header(DPOP, proof))
            .await?;
        self.record_nonce(&endpoint, &response).await;
        check_http_status(response)?;
        Ok(())
    }

    // === State helpers ===

    async fn begin_authentication(&self) -> State {
        let mut cell = self.inner.cell.write().await;
        std::mem::replace(&mut cell.state, State::Authenticating)
    }

    async fn activate(&self, did: Did, tokens: TokenSet) {
        tracing::info!(%did, "session established");
        self.inner.cell.write().await.state = State::Active(ActiveSession { did, tokens });
    }

    /// Log out the session generation holding `stale_access`.
    ///
    /// Returns `false` when the state already moved on, in which case it is left alone.
    async fn end_session(&self, stale_access: &str, reason: &str) -> bool {
        let mut cell = self.inner.cell.write().await;
        if !is_generation(&cell.state, stale_access) {
            return false;
        }
        cell.state = State::LoggedOut;
        tracing::info!(reason, "session ended, re-authentication required");
        true
    }

    /// Outcome for a refresh whose session generation was replaced meanwhile.
    async fn superseded(&self) -> Result<()> {
        match &self.inner.cell.read().await.state {
            // Re-authenticated: the caller retries with the new tokens.
            State::Active(_) => Ok(()),
            State::LoggedOut => Err(logged_out()),
            State::Anonymous | State::Authenticating => Err(AuthError::NotAuthenticated.into()),
        }
    }

    async fn access_token(&self) -> Result<String> {
        match &self.inner.cell.read().await.state {
            State::Active(active) => Ok(active.tokens.access_token.clone()),
            State::LoggedOut => Err(logged_out()),
            State::Anonymous | State::Authenticating => Err(AuthError::NotAuthenticated.into()),
        }
    }

    async fn nonce_for(&self, url: &Url) -> Option<String> {
        self.inner
            .cell
            .read()
            .await
            .nonces
            .get(&origin_key(url))
            .cloned()
            .flatten()
    }

    async fn origin_known(&self, url: &Url) -> bool {
        self.inner
            .cell
            .read()
            .await
            .nonces
            .contains_key(&origin_key(url))
    }

    async fn record_nonce(&self, url: &Url, response: &RawResponse) {
        let origin = origin_key(url);
        match response.header(DPOP_NONCE) {
            Some(nonce) => {
                self.inner
                    .cell
                    .write()
                    .await
                    .nonces
                    .insert(origin, Some(nonce.to_string()));
            }
            None if !self.origin_known(url).await => {
                self.inner
                    .cell
                    .write()
                    .await
                    .nonces
                    .entry(origin)
                    .or_insert(None);
            }
            None => {}
        }
    }
}

/// Whether `state` is still the session generation that was using `access`.
fn is_generation(state: &State, access: &str) -> bool {
    matches!(state, State::Active(active) if active.tokens.access_token == access)
}

fn logged_out() -> Error {
    AuthError::SessionExpired {
        reason: "session is logged out".into(),
    }
    .into()
}

fn origin_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        RequestError::Validation {
            message: format!("invalid header value: {e}"),
        }
        .into()
    })
}

fn classify(response: &RawResponse) -> Challenge {
    let status = response.status.as_u16();
    if status != 400 && status != 401 {
        return Challenge::None;
    }

    let www_authenticate = response
        .headers
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let body = XrpcErrorBody::parse(&response.body);
    let error = body.error.as_deref().unwrap_or_default();
    let fresh_nonce = response.header(DPOP_NONCE).map(str::to_string);

    if error == "use_dpop_nonce" || www_authenticate.contains("use_dpop_nonce") {
        return Challenge::Nonce(fresh_nonce);
    }
    let expired = match status {
        401 => {
            www_authenticate.contains("invalid_token")
                || matches!(error, "ExpiredToken" | "InvalidToken" | "invalid_token")
        }
        _ => error == "ExpiredToken",
    };
    if expired {
        Challenge::Expired
    } else {
        Challenge::None
    }
}
