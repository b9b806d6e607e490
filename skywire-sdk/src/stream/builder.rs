use futures_util::SinkExt;
use reqwest::Method;
use skywire_common::Did;
use skywire_common::constants::DEFAULT_JETSTREAM;
use skywire_common::events::StreamCursor;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::consumer::FirehoseConsumer;
use super::options::SubscriberOptions;
use crate::errors::{RequestError, Result};
use crate::{ResultEnvelope, SessionManager};

/// Credentials presented on the WebSocket handshake.
#[derive(Clone, Default)]
pub(crate) enum StreamAuth {
    #[default]
    None,
    Session(SessionManager),
    Bearer(String),
}

impl std::fmt::Debug for StreamAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StreamAuth::None => "None",
            StreamAuth::Session(_) => "Session",
            StreamAuth::Bearer(_) => "Bearer",
        })
    }
}

/// Builder for a firehose connection.
///
/// Construct via [`crate::Skywire::jetstream`] or [`JetstreamBuilder::new`].
///
/// # Example
/// ```no_run
/// use skywire::{JetstreamBuilder, SubscriberOptions};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), skywire::ErrorDetail> {
/// let mut consumer = JetstreamBuilder::new()
///     .options(SubscriberOptions::new().collection("app.bsky.feed.post"))
///     .connect()
///     .await
///     .into_result()?;
///
/// consumer.register(|event| println!("{} {}", event.did, event.time_us));
/// let reason = consumer.run(&CancellationToken::new()).await;
/// println!("closed: {reason:?}, resume from {:?}", consumer.last_cursor());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct JetstreamBuilder {
    pub(crate) endpoint: Url,
    pub(crate) options: SubscriberOptions,
    pub(crate) require_hello: bool,
    pub(crate) skip_replayed: bool,
    pub(crate) auth: StreamAuth,
}

impl Default for JetstreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JetstreamBuilder {
    /// Builder for the default public endpoint, subscribed to everything.
    pub fn new() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_JETSTREAM).expect("default stream URL is valid"),
            options: SubscriberOptions::default(),
            require_hello: false,
            skip_replayed: true,
            auth: StreamAuth::None,
        }
    }

    /// Stream endpoint (`ws://` or `wss://`).
    pub fn endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Replace the whole subscription.
    pub fn options(mut self, options: SubscriberOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a wanted collection (`app.bsky.feed.post` or `app.bsky.graph.*`).
    pub fn wanted_collection(mut self, collection: impl Into<String>) -> Self {
        self.options.wanted_collections.insert(collection.into());
        self
    }

    /// Add a wanted repository.
    pub fn wanted_did(mut self, did: Did) -> Self {
        self.options.wanted_dids.insert(did);
        self
    }

    /// Ask the server to drop messages larger than `bytes`.
    pub fn max_message_size_bytes(mut self, bytes: u64) -> Self {
        self.options.max_message_size_bytes = bytes;
        self
    }

    /// Replay from `cursor`.
    pub fn cursor(mut self, cursor: StreamCursor) -> Self {
        self.options.cursor = Some(cursor);
        self
    }

    /// Send the filters as an in-band `options_update` right after connecting
    /// instead of as connection parameters. The server holds events until it
    /// receives them.
    pub fn require_hello(mut self, require_hello: bool) -> Self {
        self.require_hello = require_hello;
        self
    }

    /// Drop events at or before the replay cursor (on by default).
    ///
    /// Servers may replay the cursor event itself or a little before it; with
    /// this off those duplicates are delivered and handlers must be idempotent.
    pub fn skip_replayed(mut self, skip: bool) -> Self {
        self.skip_replayed = skip;
        self
    }

    /// Authenticate the handshake with the session's DPoP headers.
    pub fn session(mut self, session: SessionManager) -> Self {
        self.auth = StreamAuth::Session(session);
        self
    }

    /// Authenticate the handshake with `Authorization: Bearer <token>`.
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.auth = StreamAuth::Bearer(token.into());
        self
    }

    /// The URL the handshake goes to.
    pub fn request_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        self.options.append_to(&mut url, !self.require_hello);
        if self.require_hello {
            url.query_pairs_mut().append_pair("requireHello", "true");
        }
        url
    }

    /// Open the connection.
    pub async fn connect(self) -> ResultEnvelope<FirehoseConsumer> {
        ResultEnvelope::from(self.connect_inner().await)
    }

    async fn connect_inner(self) -> Result<FirehoseConsumer> {
        self.options.validate()?;
        let url = self.request_url();
        let mut request = url.as_str().into_client_request()?;

        let auth_headers = match &self.auth {
            StreamAuth::None => Vec::new(),
            StreamAuth::Bearer(token) => {
                vec![("authorization".to_string(), format!("Bearer {token}").into_bytes())]
            }
            StreamAuth::Session(session) => session
                .auth_headers(&Method::GET, &url)
                .await?
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                .collect(),
        };
        for (name, value) in auth_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid_header(&e))?;
            let value = HeaderValue::from_bytes(&value).map_err(|e| invalid_header(&e))?;
            request.headers_mut().insert(name, value);
        }

        let (mut socket, response) = connect_async(request).await?;
        tracing::info!(endpoint = %self.endpoint, status = %response.status(), "event stream connected");

        if self.require_hello {
            let hello = self.options.to_options_update().to_string();
            socket.send(Message::Text(hello)).await?;
            tracing::debug!("sent subscription hello");
        }

        Ok(FirehoseConsumer::new(socket, self))
    }
}

fn invalid_header(error: &dyn std::fmt::Display) -> crate::Error {
    RequestError::Validation {
        message: format!("invalid handshake header: {error}"),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_carries_filters_or_hello() {
        let builder = JetstreamBuilder::new()
            .endpoint(Url::parse("ws://localhost:6008/subscribe").unwrap())
            .wanted_collection("app.bsky.feed.post")
            .cursor(StreamCursor::new(7));
        assert_eq!(
            builder.request_url().as_str(),
            "ws://localhost:6008/subscribe?wantedCollections=app.bsky.feed.post&cursor=7"
        );

        let hello = builder.require_hello(true);
        assert_eq!(
            hello.request_url().as_str(),
            "ws://localhost:6008/subscribe?cursor=7&requireHello=true"
        );
    }

    #[tokio::test]
    async fn invalid_options_fail_before_connecting() {
        let envelope = JetstreamBuilder::new()
            .endpoint(Url::parse("ws://127.0.0.1:9/subscribe").unwrap())
            .wanted_collection("*")
            .connect()
            .await;
        assert!(envelope.is_kind(crate::ErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn refused_connection_is_transport() {
        let envelope = JetstreamBuilder::new()
            .endpoint(Url::parse("ws://127.0.0.1:9/subscribe").unwrap())
            .connect()
            .await;
        assert!(envelope.is_kind(crate::ErrorKind::Transport));
    }
}
