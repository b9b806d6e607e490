use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use skywire_common::Did;
use skywire_common::session::TokenSet;
use url::Url;

use super::core::{ActiveSession, SessionConfig, SessionManager, State};
use super::dpop::DpopKey;
use crate::HttpClient;
use crate::errors::{AuthError, RequestError, Result};
use crate::global::global_client;

/// Everything needed to resume a session after a restart.
///
/// Contains the DPoP private key and the refresh token. Treat the serialized
/// form as a **bearer secret**: do not log it, store it securely.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSession {
    /// Account the tokens belong to.
    pub did: Did,
    /// Current token pair.
    pub tokens: TokenSet,
    /// Base64url P-256 secret scalar of the proof key.
    pub dpop_key: String,
    /// OAuth client id.
    pub client_id: String,
    /// Token endpoint.
    pub token_endpoint: Url,
    /// Revocation endpoint, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<Url>,
}

impl std::fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSession")
            .field("did", &self.did)
            .field("tokens", &self.tokens)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Export the data needed to restore this session later.
    ///
    /// Fails with `NotAuthenticated` unless the session is active.
    pub async fn export(&self) -> Result<StoredSession> {
        let cell = self.inner.cell.read().await;
        let State::Active(active) = &cell.state else {
            return Err(AuthError::NotAuthenticated.into());
        };
        let config = &self.inner.config;
        Ok(StoredSession {
            did: active.did.clone(),
            tokens: active.tokens.clone(),
            dpop_key: URL_SAFE_NO_PAD.encode(self.inner.key.to_bytes()),
            client_id: config.client_id.clone(),
            token_endpoint: config.token_endpoint.clone(),
            revocation_endpoint: config.revocation_endpoint.clone(),
        })
    }

    /// Rehydrate an active session on the global client.
    ///
    /// No request is made; an expired access token is refreshed on first use.
    pub fn restore(stored: StoredSession) -> Result<Self> {
        Self::restore_with_client(global_client()?, stored)
    }

    /// Rehydrate an active session on an explicit client.
    pub fn restore_with_client(client: HttpClient, stored: StoredSession) -> Result<Self> {
        let secret = URL_SAFE_NO_PAD
            .decode(stored.dpop_key.trim())
            .map_err(|e| AuthError::Key(format!("invalid stored key encoding: {e}")))?;
        let key = DpopKey::from_bytes(&secret)?;

        let mut config = SessionConfig::new(stored.client_id, stored.token_endpoint);
        config.revocation_endpoint = stored.revocation_endpoint;

        let state = State::Active(ActiveSession {
            did: stored.did,
            tokens: stored.tokens,
        });
        Ok(Self::from_parts(client, config, key, state))
    }

    /// Write the exported session as JSON. If the file exists, it is overwritten.
    /// On Unix, permissions are set to 600.
    pub async fn write_session_file(&self, path: &Path) -> Result<()> {
        let stored = self.export().await?;
        let json = serde_json::to_vec_pretty(&stored).map_err(|e| RequestError::Validation {
            message: format!("failed to encode session: {e}"),
        })?;
        write_private(path, &json).await.map_err(|e| RequestError::Validation {
            message: format!("failed to write session file: {e}"),
        })?;
        Ok(())
    }

    /// Restore a session from a file written by [`Self::write_session_file`].
    pub fn from_session_file(path: &Path) -> Result<Self> {
        Self::restore(read_stored(path)?)
    }

    /// Like [`Self::from_session_file`], on an explicit client.
    pub fn from_session_file_with_client(client: HttpClient, path: &Path) -> Result<Self> {
        Self::restore_with_client(client, read_stored(path)?)
    }
}

fn read_stored(path: &Path) -> Result<StoredSession> {
    let raw = std::fs::read(path).map_err(|e| RequestError::Validation {
        message: format!("failed to read session file: {e}"),
    })?;
    serde_json::from_slice(&raw).map_err(|e| {
        RequestError::Validation {
            message: format!("invalid session file: {e}"),
        }
        .into()
    })
}

async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionState;

    fn active_session() -> SessionManager {
        let stored = StoredSession {
            did: Did::try_from("did:plc:persisted").unwrap(),
            tokens: TokenSet {
                access_token: "at".into(),
                refresh_token: Some("rt".into()),
                expires_at: Some(42),
            },
            dpop_key: URL_SAFE_NO_PAD.encode(DpopKey::generate().to_bytes()),
            client_id: "client".into(),
            token_endpoint: Url::parse("https://auth.test/oauth/token").unwrap(),
            revocation_endpoint: None,
        };
        SessionManager::restore_with_client(HttpClient::new().unwrap(), stored).unwrap()
    }

    #[tokio::test]
    async fn export_restore_keeps_key_and_tokens() {
        let session = active_session();
        let stored = session.export().await.unwrap();
        let restored =
            SessionManager::restore_with_client(HttpClient::new().unwrap(), stored.clone())
                .unwrap();

        assert_eq!(restored.state().await, SessionState::Active);
        assert_eq!(
            restored.dpop_key().thumbprint(),
            session.dpop_key().thumbprint()
        );
        assert_eq!(restored.export().await.unwrap(), stored);
        assert!(!format!("{stored:?}").contains(&stored.dpop_key));
    }

    #[tokio::test]
    async fn session_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("skywire-session-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.json");

        let session = active_session();
        session.write_session_file(&path).await.unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let restored =
            SessionManager::from_session_file_with_client(HttpClient::new().unwrap(), &path)
                .unwrap();
        assert_eq!(restored.did().await, session.did().await);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn export_requires_active_session() {
        let session = SessionManager::with_client(
            HttpClient::new().unwrap(),
            SessionConfig::new("c", Url::parse("https://auth.test/token").unwrap()),
        );
        let err = session.export().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotAuthenticated);
    }
}
