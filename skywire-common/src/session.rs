//! Token records exchanged with an authorization server.

use serde::{Deserialize, Serialize};

use crate::identifier::Did;

/// Successful token endpoint response (`authorization_code` or `refresh_token` grant).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    /// Access token to send as `Authorization: DPoP <token>`.
    pub access_token: String,
    /// Refresh token; servers rotate it on every use.
    pub refresh_token: Option<String>,
    /// Token type, `DPoP` for bound tokens.
    pub token_type: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: Option<u64>,
    /// DID of the account the tokens were issued for.
    pub sub: Option<Did>,
    /// Granted scopes, space separated.
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("sub", &self.sub)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Error body of the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthErrorBody {
    /// Machine readable code such as `invalid_grant` or `use_dpop_nonce`.
    pub error: String,
    /// Optional description.
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    /// The server wants the proof re-sent with its nonce.
    pub fn is_use_dpop_nonce(&self) -> bool {
        self.error == "use_dpop_nonce"
    }
}

/// Access/refresh token pair plus expiry. Replaced as a unit.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    /// Access token.
    pub access_token: String,
    /// Refresh token, if the server issued one.
    pub refresh_token: Option<String>,
    /// Unix seconds after which the access token is expired.
    pub expires_at: Option<u64>,
}

impl TokenSet {
    /// Build a token set from a token response received at `now` (unix seconds).
    ///
    /// A response without a refresh token keeps `previous_refresh`.
    pub fn from_response(
        response: &TokenResponse,
        now: u64,
        previous_refresh: Option<&str>,
    ) -> Self {
        Self {
            access_token: response.access_token.clone(),
            refresh_token: response
                .refresh_token
                .clone()
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: response.expires_in.map(|secs| now.saturating_add(secs)),
        }
    }

    /// True if the access token expires within `skew` seconds of `now`.
    pub fn expires_within(&self, now: u64, skew: u64) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now.saturating_add(skew))
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
