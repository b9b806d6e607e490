use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use skywire_common::Nsid;
use skywire_common::constants::XRPC_PREFIX;
use tokio_util::sync::CancellationToken;

use super::client::XrpcClient;
use super::page::Page;
use super::params::query_pairs;
use crate::client::http::{PreparedRequest, RawResponse};
use crate::errors::{Error, RequestError, Result};
use crate::util::check_http_status;
use crate::{ErrorDetail, ResultEnvelope};

/// Builder for one XRPC call.
///
/// Built via [`XrpcClient::query`], [`XrpcClient::procedure`] or
/// [`XrpcClient::call`]. Configure parameters, body, cursor and cancellation,
/// then finish with [`send`](Self::send), [`send_page`](Self::send_page) or
/// [`send_empty`](Self::send_empty).
///
/// Argument errors (bad NSID, unserializable parameters) are reported by the
/// finishing call, in the envelope, like any other failure.
#[derive(Debug)]
#[must_use]
pub struct XrpcRequest<'a> {
    xrpc: &'a XrpcClient,
    method: Method,
    nsid: String,
    params: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    cancel: Option<CancellationToken>,
    error: Option<Error>,
}

impl<'a> XrpcRequest<'a> {
    pub(crate) fn new(xrpc: &'a XrpcClient, method: Method, nsid: &str) -> Self {
        Self {
            xrpc,
            method,
            nsid: nsid.to_string(),
            params: Vec::new(),
            body: None,
            cancel: None,
            error: None,
        }
    }

    /// Add every member of `params` (any struct or map) as query parameters.
    pub fn params<P: Serialize + ?Sized>(mut self, params: &P) -> Self {
        match query_pairs(params) {
            Ok(pairs) => self.params.extend(pairs),
            Err(error) => self.fail(error),
        }
        self
    }

    /// Add one query parameter. Call repeatedly for array parameters.
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    /// Resume from a cursor returned by a previous page. `None` or empty is a no-op,
    /// so a pagination loop can pass `page.cursor.as_deref()` straight through.
    pub fn cursor(self, cursor: Option<&str>) -> Self {
        match cursor {
            Some(cursor) if !cursor.is_empty() => self.param("cursor", cursor),
            _ => self,
        }
    }

    /// Maximum number of items per page (the server may cap it).
    pub fn limit(self, limit: u32) -> Self {
        self.param("limit", limit)
    }

    /// JSON request body for procedures.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.body = Some(bytes),
            Err(e) => self.fail(
                RequestError::Validation {
                    message: format!("body is not serializable: {e}"),
                }
                .into(),
            ),
        }
        self
    }

    /// Abort the call when `token` is cancelled. The envelope then fails with `Cancelled`.
    pub fn cancel_on(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Send and decode a 2xx body as `T`.
    pub async fn send<T: DeserializeOwned>(self) -> ResultEnvelope<T> {
        let result = self
            .execute()
            .await
            .and_then(|response| Ok((response.status, response.json::<T>()?)));
        envelope(result)
    }

    /// Send and decode one page whose items live under `items_field`.
    pub async fn send_page<T: DeserializeOwned>(self, items_field: &str) -> ResultEnvelope<Page<T>> {
        let result = self.execute().await.and_then(|response| {
            Ok((
                response.status,
                Page::from_body(&response.body, items_field)?,
            ))
        });
        envelope(result)
    }

    /// Send and ignore the response body.
    pub async fn send_empty(self) -> ResultEnvelope<()> {
        envelope(self.execute().await.map(|response| (response.status, ())))
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    async fn execute(self) -> Result<RawResponse> {
        let XrpcRequest {
            xrpc,
            method,
            nsid,
            params,
            body,
            cancel,
            error,
        } = self;
        if let Some(error) = error {
            return Err(error);
        }

        let nsid = Nsid::try_from(nsid.as_str()).map_err(|e| RequestError::Validation {
            message: e.to_string(),
        })?;
        let mut url = xrpc.service.join(&format!("{XRPC_PREFIX}{nsid}"))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }

        let mut request = PreparedRequest::new(method, url);
        if let Some(body) = body {
            request = request.json_body(body);
        }
        tracing::debug!(method = %request.method, %nsid, authenticated = xrpc.session.is_some(), "xrpc call");

        let call = async {
            match &xrpc.session {
                Some(session) => session.send(&request).await,
                None => xrpc.client.execute(request.builder(&xrpc.client)).await,
            }
        };
        let response = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(%nsid, "xrpc call cancelled");
                    return Err(Error::Cancelled);
                }
                response = call => response?,
            },
            None => call.await?,
        };

        check_http_status(response)
    }
}

fn envelope<T>(result: Result<(StatusCode, T)>) -> ResultEnvelope<T> {
    match result {
        Ok((status, value)) => ResultEnvelope::ok(Some(status), value),
        Err(error) => ResultEnvelope::failure(error.status(), ErrorDetail::from(&error)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use serde::Deserialize;
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::{ErrorKind, HttpClient};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Profile {
        handle: String,
    }

    fn xrpc(server: &MockServer) -> XrpcClient {
        let client = HttpClient::builder()
            .service(Url::parse(&server.base_url()).unwrap())
            .build()
            .unwrap();
        XrpcClient::with_client(client)
    }

    #[tokio::test]
    async fn query_decodes_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/xrpc/app.bsky.actor.getProfile")
                    .query_param("actor", "alice.test");
                then.status(200).json_body(json!({"handle": "alice.test"}));
            })
            .await;

        let envelope = xrpc(&server)
            .query("app.bsky.actor.getProfile")
            .params(&json!({"actor": "alice.test"}))
            .send::<Profile>()
            .await;

        mock.assert_async().await;
        assert!(envelope.succeeded());
        assert_eq!(envelope.status_code(), Some(StatusCode::OK));
        assert!(envelope.error().is_none());
        assert_eq!(envelope.result().unwrap().handle, "alice.test");
    }

    #[tokio::test]
    async fn structured_and_synthesized_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/xrpc/com.atproto.repo.getRecord");
                then.status(400)
                    .json_body(json!({"error": "RecordNotFound", "message": "Could not locate record"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/xrpc/app.bsky.feed.getTimeline");
                then.status(503).body("upstream unavailable");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/xrpc/app.bsky.feed.getLikes");
                then.status(429)
                    .header("ratelimit-reset", "1700000000")
                    .json_body(json!({"error": "RateLimitExceeded"}));
            })
            .await;

        let xrpc = xrpc(&server);

        let record = xrpc.query("com.atproto.repo.getRecord").send::<Profile>().await;
        assert!(!record.succeeded());
        assert!(record.result().is_none());
        let detail = record.error().unwrap();
        assert_eq!(detail.kind, ErrorKind::InvalidRequest);
        assert_eq!(detail.error.as_deref(), Some("RecordNotFound"));
        assert_eq!(record.status_code(), Some(StatusCode::BAD_REQUEST));

        let timeline = xrpc.query("app.bsky.feed.getTimeline").send_empty().await;
        assert!(timeline.is_kind(ErrorKind::ServerError));
        assert_eq!(timeline.error().unwrap().error, None);

        let likes = xrpc.query("app.bsky.feed.getLikes").send_empty().await;
        assert!(likes.is_kind(ErrorKind::RateLimited));
        assert!(likes.error().unwrap().message.contains("1700000000"));
    }

    #[tokio::test]
    async fn malformed_body_is_protocol_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/xrpc/app.bsky.actor.getProfile");
                then.status(200).body("not json");
            })
            .await;
        let envelope = xrpc(&server)
            .query("app.bsky.actor.getProfile")
            .send::<Profile>()
            .await;
        assert!(envelope.is_kind(ErrorKind::Protocol));
    }

    #[tokio::test]
    async fn procedure_sends_json_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/xrpc/com.atproto.repo.createRecord")
                    .header("content-type", "application/json")
                    .json_body(json!({"repo": "did:plc:alice", "collection": "app.bsky.feed.post"}));
                then.status(200).json_body(json!({"uri": "at://x", "cid": "bafy"}));
            })
            .await;

        let envelope = xrpc(&server)
            .procedure("com.atproto.repo.createRecord")
            .json(&json!({"repo": "did:plc:alice", "collection": "app.bsky.feed.post"}))
            .send::<serde_json::Value>()
            .await;
        mock.assert_async().await;
        assert_eq!(envelope.result().unwrap()["cid"], "bafy");
    }

    #[tokio::test]
    async fn invalid_arguments_fail_without_a_request() {
        let server = MockServer::start_async().await;
        let xrpc = xrpc(&server);

        let bad_nsid = xrpc.query("not an nsid").send_empty().await;
        assert!(bad_nsid.is_kind(ErrorKind::InvalidRequest));

        let bad_params = xrpc
            .query("app.bsky.actor.getProfile")
            .params(&json!({"nested": {"a": 1}}))
            .send_empty()
            .await;
        assert!(bad_params.is_kind(ErrorKind::InvalidRequest));
        assert_eq!(bad_params.status_code(), None);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_call() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/xrpc/app.bsky.feed.getTimeline");
                then.status(200)
                    .delay(Duration::from_secs(5))
                    .json_body(json!({}));
            })
            .await;

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let envelope = xrpc(&server)
            .query("app.bsky.feed.getTimeline")
            .cancel_on(&token)
            .send_empty()
            .await;
        assert!(envelope.is_kind(ErrorKind::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
