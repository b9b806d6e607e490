use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use skywire::{
    Did, ErrorKind, SessionConfig, SessionManager, SessionState, TokenSet, XrpcClient,
};
use url::Url;

use super::utils::{client_for, init_tracing, serve};

const WHOAMI: &str = "app.test.whoami";

/// Authorization and resource server in one, with switchable failure modes.
#[derive(Default)]
struct AuthServer {
    /// Nonce the server currently accepts.
    nonce: Mutex<String>,
    /// Move to a new nonce on every resource request, so no retry can succeed.
    rotate_nonce: bool,
    /// Resource requests must carry the current nonce.
    resource_nonce: bool,
    /// Token requests must carry the current nonce.
    token_nonce: bool,
    /// Access token the resource server accepts.
    access: Mutex<String>,
    reject_refresh: bool,
    resource_calls: AtomicUsize,
    token_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
}

impl AuthServer {
    fn new(access: &str) -> Self {
        Self {
            nonce: Mutex::new("nonce-0".into()),
            access: Mutex::new(access.into()),
            ..Self::default()
        }
    }

    fn nonce_ok(&self, headers: &HeaderMap) -> bool {
        proof_claims(headers)
            .and_then(|claims| claims["nonce"].as_str().map(str::to_string))
            .is_some_and(|nonce| nonce == *self.nonce.lock().unwrap())
    }

    fn challenge(&self, status: StatusCode) -> Response {
        let nonce = self.nonce.lock().unwrap().clone();
        (
            status,
            [
                ("www-authenticate", r#"DPoP error="use_dpop_nonce""#.to_string()),
                ("dpop-nonce", nonce),
            ],
            Json(json!({"error": "use_dpop_nonce", "message": "Authorization server requires nonce in DPoP proof"})),
        )
            .into_response()
    }
}

fn proof_claims(headers: &HeaderMap) -> Option<Value> {
    let proof = headers.get("dpop")?.to_str().ok()?;
    let payload = proof.split('.').nth(1)?;
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()
}

async fn whoami(State(server): State<Arc<AuthServer>>, headers: HeaderMap) -> Response {
    let n = server.resource_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if server.rotate_nonce {
        *server.nonce.lock().unwrap() = format!("nonce-{n}");
    }
    if server.resource_nonce && !server.nonce_ok(&headers) {
        return server.challenge(StatusCode::UNAUTHORIZED);
    }

    let expected = format!("DPoP {}", server.access.lock().unwrap());
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != expected || proof_claims(&headers).is_none_or(|c| c["ath"].is_null()) {
        return (
            StatusCode::UNAUTHORIZED,
            [("www-authenticate", r#"DPoP error="invalid_token""#)],
            Json(json!({"error": "InvalidToken", "message": "token expired"})),
        )
            .into_response();
    }
    Json(json!({"did": "did:plc:alice"})).into_response()
}

async fn token(
    State(server): State<Arc<AuthServer>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    server.token_calls.fetch_add(1, Ordering::SeqCst);
    if server.token_nonce && !server.nonce_ok(&headers) {
        return server.challenge(StatusCode::BAD_REQUEST);
    }
    let invalid_grant = |description: &str| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": description})),
        )
            .into_response()
    };

    let (access, refresh) = match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            if form.get("code").map(String::as_str) != Some("code-1")
                || form.get("code_verifier").is_none()
            {
                return invalid_grant("bad code");
            }
            ("at-1".to_string(), "rt-1".to_string())
        }
        Some("refresh_token") => {
            let n = server.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if server.reject_refresh {
                return invalid_grant("refresh token revoked");
            }
            // Keep the refresh in flight long enough for concurrent callers to queue.
            tokio::time::sleep(Duration::from_millis(50)).await;
            (format!("at-r{n}"), format!("rt-r{n}"))
        }
        _ => return invalid_grant("unsupported grant"),
    };

    *server.access.lock().unwrap() = access.clone();
    Json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "DPoP",
        "expires_in": 3600,
        "sub": "did:plc:alice",
        "scope": "atproto",
    }))
    .into_response()
}

async fn revoke(State(server): State<Arc<AuthServer>>) -> StatusCode {
    server.revoke_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn start(server: AuthServer) -> (Arc<AuthServer>, Url) {
    init_tracing();
    let server = Arc::new(server);
    let app = Router::new()
        .route(&format!("/xrpc/{WHOAMI}"), get(whoami))
        .route("/oauth/token", post(token))
        .route("/oauth/revoke", post(revoke))
        .with_state(server.clone());
    (server, serve(app).await)
}

fn manager(base: &Url) -> SessionManager {
    let config = SessionConfig::new(
        "https://app.test/client-metadata.json",
        base.join("/oauth/token").unwrap(),
    )
    .revocation_endpoint(base.join("/oauth/revoke").unwrap());
    SessionManager::with_client(client_for(base), config)
}

async fn adopted(base: &Url, access: &str, expires_at: Option<u64>) -> SessionManager {
    let session = manager(base);
    session
        .adopt_tokens(
            Did::try_from("did:plc:alice").unwrap(),
            TokenSet {
                access_token: access.into(),
                refresh_token: Some("rt-1".into()),
                expires_at,
            },
        )
        .await;
    session
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[tokio::test]
async fn nonce_challenge_is_retried_exactly_once() {
    let (server, base) = start(AuthServer {
        resource_nonce: true,
        ..AuthServer::new("at-1")
    })
    .await;
    let session = adopted(&base, "at-1", None).await;
    let xrpc = XrpcClient::authenticated(session.clone(), base.clone());

    let first = xrpc.query(WHOAMI).send::<Value>().await;
    assert!(first.succeeded(), "{:?}", first.error());
    assert_eq!(server.resource_calls.load(Ordering::SeqCst), 2);
    assert_eq!(session.dpop_key().proofs_issued(), 2);

    // The nonce is remembered for the origin.
    let second = xrpc.query(WHOAMI).send::<Value>().await;
    assert!(second.succeeded());
    assert_eq!(server.resource_calls.load(Ordering::SeqCst), 3);
    assert_eq!(session.dpop_key().proofs_issued(), 3);
}

#[tokio::test]
async fn repeated_nonce_challenge_fails_after_one_retry() {
    let (server, base) = start(AuthServer {
        resource_nonce: true,
        rotate_nonce: true,
        ..AuthServer::new("at-1")
    })
    .await;
    let session = adopted(&base, "at-1", None).await;

    let envelope = XrpcClient::authenticated(session.clone(), base.clone())
        .query(WHOAMI)
        .send::<Value>()
        .await;

    assert!(envelope.is_kind(ErrorKind::AuthFailed));
    assert_eq!(server.resource_calls.load(Ordering::SeqCst), 2);
    assert_eq!(session.state().await, SessionState::Active);
}

#[tokio::test]
async fn code_exchange_answers_token_endpoint_nonce() {
    let (server, base) = start(AuthServer {
        token_nonce: true,
        ..AuthServer::new("unused")
    })
    .await;
    let session = manager(&base);
    assert_eq!(session.state().await, SessionState::Anonymous);

    let envelope = session
        .exchange_code("code-1", "verifier", "https://app.test/callback")
        .await;

    assert_eq!(envelope.result().map(Did::as_str), Some("did:plc:alice"));
    assert_eq!(server.token_calls.load(Ordering::SeqCst), 2);
    assert_eq!(session.state().await, SessionState::Active);
    assert_eq!(session.did().await.map(|d| d.to_string()).as_deref(), Some("did:plc:alice"));

    let bad = manager(&base)
        .exchange_code("wrong", "verifier", "https://app.test/callback")
        .await;
    assert!(bad.is_kind(ErrorKind::AuthFailed));
    assert_eq!(bad.error().unwrap().error.as_deref(), Some("invalid_grant"));
}

#[tokio::test]
async fn failed_exchange_restores_previous_state() {
    let (_server, base) = start(AuthServer::new("unused")).await;
    let session = manager(&base);
    let envelope = session
        .exchange_code("wrong", "verifier", "https://app.test/callback")
        .await;
    assert!(!envelope.succeeded());
    assert_eq!(session.state().await, SessionState::Anonymous);
}

#[tokio::test]
async fn expired_token_refreshes_once_for_concurrent_calls() {
    let (server, base) = start(AuthServer::new("at-current")).await;
    let session = adopted(&base, "at-stale", None).await;
    let xrpc = XrpcClient::authenticated(session.clone(), base.clone());

    let calls = (0..5).map(|_| xrpc.query(WHOAMI).send::<Value>());
    let results = futures_util::future::join_all(calls).await;

    for envelope in &results {
        assert!(envelope.succeeded(), "{:?}", envelope.error());
    }
    assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.state().await, SessionState::Active);

    // The rotated refresh token is kept.
    let stored = session.export().await.unwrap();
    assert_eq!(stored.tokens.access_token, "at-r1");
    assert_eq!(stored.tokens.refresh_token.as_deref(), Some("rt-r1"));
}

#[tokio::test]
async fn concurrent_nonce_challenges_share_one_discovery() {
    let (server, base) = start(AuthServer {
        resource_nonce: true,
        ..AuthServer::new("at-1")
    })
    .await;
    let session = adopted(&base, "at-1", None).await;
    let xrpc = XrpcClient::authenticated(session.clone(), base.clone());

    let calls = (0..5).map(|_| xrpc.query(WHOAMI).send::<Value>());
    let results = futures_util::future::join_all(calls).await;

    for envelope in &results {
        assert!(envelope.succeeded(), "{:?}", envelope.error());
    }
    // One challenged request, then every caller reuses the recorded nonce.
    assert_eq!(server.resource_calls.load(Ordering::SeqCst), 6);
    assert_eq!(session.dpop_key().proofs_issued(), 6);
}

/// Wait until the token endpoint has started serving a refresh.
async fn refresh_in_flight(server: &AuthServer) {
    while server.refresh_calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn logout_during_refresh_stays_logged_out() {
    let (server, base) = start(AuthServer::new("at-current")).await;
    let session = adopted(&base, "at-stale", None).await;
    let xrpc = XrpcClient::authenticated(session.clone(), base.clone());

    let call = tokio::spawn(async move { xrpc.query(WHOAMI).send::<Value>().await });
    refresh_in_flight(&server).await;
    assert!(session.logout().await.succeeded());
    assert_eq!(session.state().await, SessionState::LoggedOut);

    let envelope = call.await.unwrap();
    assert!(envelope.is_kind(ErrorKind::SessionExpired));
    assert_eq!(session.state().await, SessionState::LoggedOut);
    assert!(session.export().await.is_err());
    assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
    // The logged-out refresh token and the one minted too late are both revoked.
    assert_eq!(server.revoke_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn tokens_adopted_during_refresh_are_kept() {
    let (server, base) = start(AuthServer::new("at-current")).await;
    let session = adopted(&base, "at-stale", None).await;
    let xrpc = XrpcClient::authenticated(session.clone(), base.clone());

    let call = tokio::spawn(async move { xrpc.query(WHOAMI).send::<Value>().await });
    refresh_in_flight(&server).await;
    session
        .adopt_tokens(
            Did::try_from("did:plc:alice").unwrap(),
            TokenSet {
                access_token: "at-adopted".into(),
                refresh_token: Some("rt-adopted".into()),
                expires_at: None,
            },
        )
        .await;
    let _ = call.await.unwrap();

    assert_eq!(session.state().await, SessionState::Active);
    let stored = session.export().await.unwrap();
    assert_eq!(stored.tokens.access_token, "at-adopted");
    assert_eq!(stored.tokens.refresh_token.as_deref(), Some("rt-adopted"));
    assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.revoke_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn token_close_to_expiry_is_refreshed_before_sending() {
    let (server, base) = start(AuthServer::new("at-1")).await;
    let session = adopted(&base, "at-1", Some(now() + 5)).await;

    let envelope = XrpcClient::authenticated(session, base.clone())
        .query(WHOAMI)
        .send::<Value>()
        .await;

    assert!(envelope.succeeded());
    assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.resource_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_refresh_ends_the_session() {
    let (server, base) = start(AuthServer {
        reject_refresh: true,
        ..AuthServer::new("at-current")
    })
    .await;
    let session = adopted(&base, "at-stale", None).await;
    let xrpc = XrpcClient::authenticated(session.clone(), base.clone());

    let envelope = xrpc.query(WHOAMI).send::<Value>().await;
    assert!(envelope.is_kind(ErrorKind::SessionExpired));
    assert_eq!(session.state().await, SessionState::LoggedOut);

    // Nothing is sent once logged out.
    let after = xrpc.query(WHOAMI).send::<Value>().await;
    assert!(after.is_kind(ErrorKind::SessionExpired));
    assert_eq!(server.resource_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_revokes_and_blocks_requests() {
    let (server, base) = start(AuthServer::new("at-1")).await;
    let session = adopted(&base, "at-1", None).await;

    assert!(session.logout().await.succeeded());
    assert_eq!(session.state().await, SessionState::LoggedOut);
    assert_eq!(server.revoke_calls.load(Ordering::SeqCst), 1);

    let envelope = XrpcClient::authenticated(session.clone(), base.clone())
        .query(WHOAMI)
        .send_empty()
        .await;
    assert!(envelope.is_kind(ErrorKind::SessionExpired));
    assert_eq!(server.resource_calls.load(Ordering::SeqCst), 0);

    let refresh = session.refresh().await;
    assert!(refresh.is_kind(ErrorKind::SessionExpired));
}

#[tokio::test]
async fn restored_session_keeps_working() {
    let (server, base) = start(AuthServer::new("at-1")).await;
    let session = adopted(&base, "at-1", None).await;

    let dir = std::env::temp_dir().join(format!("skywire-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("session.json");
    session.write_session_file(&path).await.unwrap();

    let restored = SessionManager::from_session_file_with_client(client_for(&base), &path).unwrap();
    assert_eq!(
        restored.dpop_key().thumbprint(),
        session.dpop_key().thumbprint()
    );
    assert_eq!(restored.state().await, SessionState::Active);

    let envelope = XrpcClient::authenticated(restored, base.clone())
        .query(WHOAMI)
        .send::<Value>()
        .await;
    assert!(envelope.succeeded());
    assert_eq!(server.resource_calls.load(Ordering::SeqCst), 1);

    std::fs::remove_dir_all(&dir).unwrap();
}
