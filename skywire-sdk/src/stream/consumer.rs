use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use skywire_common::events::StreamCursor;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::builder::JetstreamBuilder;
use super::event::StreamEvent;
use super::options::SubscriberOptions;
use crate::errors::{Error, Result, StreamError};
use crate::{ErrorDetail, ResultEnvelope};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handler = Box<dyn FnMut(&StreamEvent) + Send>;

/// How long a graceful close waits for the server's close reply.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Revocable registration returned by [`FirehoseConsumer::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Why a consumer stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`FirehoseConsumer::close`] or [`ConsumerControl::close`].
    Closed,
    /// The cancellation token passed to [`FirehoseConsumer::run`] fired.
    Cancelled,
    /// The server ended the connection.
    ServerClosed {
        /// WebSocket close code, if one was sent.
        code: Option<u16>,
        /// Close reason text.
        reason: String,
    },
    /// The connection failed.
    Failed(ErrorDetail),
}

enum Command {
    Update(SubscriberOptions, oneshot::Sender<ResultEnvelope<()>>),
    Close(oneshot::Sender<ResultEnvelope<()>>),
}

enum Signal {
    Cancelled,
    Command(Command),
    Frame(Option<std::result::Result<Message, WsError>>),
}

enum Step {
    Event(StreamEvent),
    Idle,
    Ended,
    Failed(Error),
}

/// A live firehose connection.
///
/// Events come out in exactly the order the server sent them, either pulled
/// with [`next_event`](Self::next_event) or pushed to registered handlers by
/// [`run`](Self::run). Events outside the current [`SubscriberOptions`] are
/// never delivered, even if the server sends them.
///
/// There is no automatic reconnect. After a drop, [`last_cursor`](Self::last_cursor)
/// is the `time_us` of the last fully processed event and
/// [`resume_builder`](Self::resume_builder) prepares a connection that replays
/// from it. Delivery across a resume is at-least-once unless `skip_replayed` is on.
pub struct FirehoseConsumer {
    socket: Option<Socket>,
    settings: JetstreamBuilder,
    skip_until: Option<StreamCursor>,
    last_cursor: Option<StreamCursor>,
    handlers: Vec<(HandlerId, Handler)>,
    next_handler: u64,
    control_tx: mpsc::UnboundedSender<Command>,
    control_rx: mpsc::UnboundedReceiver<Command>,
    closed: CancellationToken,
    close_reason: Option<CloseReason>,
}

impl std::fmt::Debug for FirehoseConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirehoseConsumer")
            .field("endpoint", &self.settings.endpoint.as_str())
            .field("options", &self.settings.options)
            .field("connected", &self.socket.is_some())
            .field("handlers", &self.handlers.len())
            .field("last_cursor", &self.last_cursor)
            .field("close_reason", &self.close_reason)
            .finish_non_exhaustive()
    }
}

impl FirehoseConsumer {
    pub(crate) fn new(socket: Socket, settings: JetstreamBuilder) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let skip_until = settings
            .skip_replayed
            .then_some(settings.options.cursor)
            .flatten();
        Self {
            socket: Some(socket),
            settings,
            skip_until,
            last_cursor: None,
            handlers: Vec::new(),
            next_handler: 0,
            control_tx,
            control_rx,
            closed: CancellationToken::new(),
            close_reason: None,
        }
    }

    // === Handlers ===

    /// Register a handler. Handlers run in registration order, on the receive loop.
    ///
    /// A slow handler slows consumption; events are never dropped for it.
    pub fn register<F>(&mut self, handler: F) -> HandlerId
    where
        F: FnMut(&StreamEvent) + Send + 'static,
    {
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was already removed.
    pub fn unregister(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);
        self.handlers.len() != before
    }

    // === Getters ===

    /// `time_us` of the last event that was fully processed.
    pub fn last_cursor(&self) -> Option<StreamCursor> {
        self.last_cursor
    }

    /// Active subscription.
    pub fn options(&self) -> &SubscriberOptions {
        &self.settings.options
    }

    /// True once the connection is gone, for any reason.
    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    /// Why the consumer stopped, once it has.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Handle for updating or closing this consumer from other tasks.
    pub fn control(&self) -> ConsumerControl {
        ConsumerControl {
            tx: self.control_tx.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Builder for a new connection that resumes after the last processed event.
    ///
    /// Keeps endpoint, filters and credentials. Without a processed event the
    /// original cursor (if any) is kept.
    pub fn resume_builder(&self) -> JetstreamBuilder {
        let mut builder = self.settings.clone();
        if let Some(cursor) = self.last_cursor {
            builder.options.cursor = Some(cursor);
        }
        builder
    }

    // === Receiving ===

    /// Pull the next event. `None` once the consumer is closed.
    ///
    /// The returned event counts as processed: [`last_cursor`](Self::last_cursor)
    /// moves to it. A connection failure is returned once, then `None`.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        loop {
            match self.step(None).await {
                Step::Event(event) => {
                    self.last_cursor = Some(event.cursor());
                    return Some(Ok(event));
                }
                Step::Idle => {}
                Step::Ended => return None,
                Step::Failed(error) => return Some(Err(error)),
            }
        }
    }

    /// Deliver events to the registered handlers until the connection ends.
    ///
    /// The cursor moves after all handlers have returned. Cancelling `cancel`
    /// closes the connection and returns [`CloseReason::Cancelled`] without
    /// delivering anything further.
    pub async fn run(&mut self, cancel: &CancellationToken) -> CloseReason {
        loop {
            match self.step(Some(cancel)).await {
                Step::Event(event) => {
                    for (_, handler) in self.handlers.iter_mut() {
                        handler(&event);
                    }
                    self.last_cursor = Some(event.cursor());
                }
                Step::Idle => {}
                Step::Ended | Step::Failed(_) => {
                    return self.close_reason.clone().unwrap_or(CloseReason::Closed);
                }
            }
        }
    }

    // === Control ===

    /// Replace the filters on the live connection.
    ///
    /// Returns once the `options_update` is sent and the local filter is swapped;
    /// from then on no event outside the new filter is delivered.
    pub async fn update_options(&mut self, options: SubscriberOptions) -> ResultEnvelope<()> {
        ResultEnvelope::from(self.apply_options(options).await)
    }

    /// Close gracefully. Idempotent.
    pub async fn close(&mut self) -> ResultEnvelope<()> {
        self.shutdown(CloseReason::Closed, true).await;
        ResultEnvelope::ok(None, ())
    }

    async fn step(&mut self, cancel: Option<&CancellationToken>) -> Step {
        let Some(socket) = self.socket.as_mut() else {
            return Step::Ended;
        };

        let signal = tokio::select! {
            biased;
            _ = wait_cancelled(cancel) => Signal::Cancelled,
            Some(command) = self.control_rx.recv() => Signal::Command(command),
            frame = socket.next() => Signal::Frame(frame),
        };

        match signal {
            Signal::Cancelled => {
                tracing::debug!("event stream cancelled");
                self.shutdown(CloseReason::Cancelled, false).await;
                Step::Ended
            }
            Signal::Command(Command::Update(options, ack)) => {
                let _ = ack.send(ResultEnvelope::from(self.apply_options(options).await));
                Step::Idle
            }
            Signal::Command(Command::Close(ack)) => {
                self.shutdown(CloseReason::Closed, true).await;
                let _ = ack.send(ResultEnvelope::ok(None, ()));
                Step::Ended
            }
            Signal::Frame(None)
            | Signal::Frame(Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed))) => {
                let reason = self.close_reason.take().unwrap_or(CloseReason::ServerClosed {
                    code: None,
                    reason: String::new(),
                });
                tracing::info!(?reason, "event stream ended");
                self.finish(reason);
                Step::Ended
            }
            Signal::Frame(Some(Err(error))) => {
                let error = Error::from(error);
                tracing::warn!(%error, "event stream failed");
                self.finish(CloseReason::Failed(ErrorDetail::from(&error)));
                Step::Failed(error)
            }
            Signal::Frame(Some(Ok(message))) => match self.accept(message) {
                Some(event) => Step::Event(event),
                None => Step::Idle,
            },
        }
    }

    /// Decode and filter one frame.
    fn accept(&mut self, message: Message) -> Option<StreamEvent> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!("skipping non-UTF-8 binary frame");
                    return None;
                }
            },
            Message::Close(frame) => {
                // Remembered until the socket reports the end.
                self.close_reason = Some(CloseReason::ServerClosed {
                    code: frame.as_ref().map(|f| u16::from(f.code)),
                    reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
                });
                return None;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return None,
        };

        let event = match StreamEvent::parse(&text) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%error, "skipping malformed stream message");
                return None;
            }
        };

        if self
            .skip_until
            .is_some_and(|cursor| event.time_us <= cursor.time_us())
        {
            tracing::trace!(time_us = event.time_us, "skipping replayed event");
            return None;
        }
        if !self.settings.options.matches(&event) {
            return None;
        }
        Some(event)
    }

    async fn apply_options(&mut self, mut options: SubscriberOptions) -> Result<()> {
        options.validate()?;
        let socket = self.socket.as_mut().ok_or(StreamError::Closed)?;
        let update = options.to_options_update().to_string();
        socket.send(Message::Text(update)).await?;

        options.cursor = self.settings.options.cursor;
        self.settings.options = options;
        tracing::info!(
            collections = self.settings.options.wanted_collections.len(),
            dids = self.settings.options.wanted_dids.len(),
            "subscription updated"
        );
        Ok(())
    }

    async fn shutdown(&mut self, reason: CloseReason, drain: bool) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(error) = socket.close(None).await {
                tracing::debug!(%error, "close frame not sent");
            } else if drain {
                // Frames still in flight are read and dropped, never delivered.
                let _ = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
                    while let Some(Ok(_)) = socket.next().await {}
                })
                .await;
            }
            tracing::info!(?reason, "event stream closed");
        }
        self.finish(reason);
    }

    fn finish(&mut self, reason: CloseReason) {
        self.socket = None;
        // The first reason sticks.
        if !self.closed.is_cancelled() {
            self.close_reason = Some(reason);
        }
        self.closed.cancel();
    }
}

impl Drop for FirehoseConsumer {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn wait_cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle for steering a [`FirehoseConsumer`] from other tasks.
///
/// Commands are processed by the consumer's receive loop, between events, so
/// they only complete while [`FirehoseConsumer::run`] or
/// [`FirehoseConsumer::next_event`] is being driven.
#[derive(Debug, Clone)]
pub struct ConsumerControl {
    tx: mpsc::UnboundedSender<Command>,
    closed: CancellationToken,
}

impl ConsumerControl {
    /// Replace the filters; see [`FirehoseConsumer::update_options`].
    pub async fn update_options(&self, options: SubscriberOptions) -> ResultEnvelope<()> {
        let (ack, done) = oneshot::channel();
        self.request(Command::Update(options, ack), done, false).await
    }

    /// Close gracefully: the in-flight event finishes, nothing is delivered after.
    pub async fn close(&self) -> ResultEnvelope<()> {
        let (ack, done) = oneshot::channel();
        self.request(Command::Close(ack), done, true).await
    }

    /// True once the consumer has stopped or been dropped.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn request(
        &self,
        command: Command,
        done: oneshot::Receiver<ResultEnvelope<()>>,
        closed_is_ok: bool,
    ) -> ResultEnvelope<()> {
        let closed = || {
            if closed_is_ok {
                ResultEnvelope::ok(None, ())
            } else {
                ResultEnvelope::from(Err(Error::from(StreamError::Closed)))
            }
        };

        if self.closed.is_cancelled() || self.tx.send(command).is_err() {
            return closed();
        }
        tokio::select! {
            biased;
            result = done => result.unwrap_or_else(|_| closed()),
            _ = self.closed.cancelled() => closed(),
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Update(options, _) => f.debug_tuple("Update").field(options).finish(),
            Command::Close(_) => f.write_str("Close"),
        }
    }
}
