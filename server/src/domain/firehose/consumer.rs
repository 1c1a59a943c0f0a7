//! Firehose consumer
//!
//! A single persistent WebSocket to the upstream relay. On connect it
//! resumes from the stored cursor when one exists; each decoded event is
//! pushed to the durable queue (push may block the ingest loop; that is the
//! back-pressure story) and re-broadcast to in-process observers.
//!
//! Keep-alive: ping every 30 s, reconnect if no pong within 45 s.
//! Stall watchdog: reconnect if no event of any kind for 2 min.
//! Reconnect: exponential backoff 1 s -> 30 s, reset on successful open.
//! Auth failures are fatal: ingestion stops and readiness stays unhealthy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::events::{FrameError, decode_frame};
use crate::core::config::IngestConfig;
use crate::core::constants::{
    FIREHOSE_BACKOFF_BASE_SECS, FIREHOSE_BACKOFF_MAX_SECS, FIREHOSE_CONNECT_TIMEOUT_SECS,
    FIREHOSE_PING_INTERVAL_SECS, FIREHOSE_PONG_TIMEOUT_SECS, FIREHOSE_STALL_TIMEOUT_SECS,
};
use crate::data::queue::{BroadcastSubscription, ControlMessage, QueueService};
use crate::domain::cursor::CursorTracker;
use crate::domain::health::FirehoseStatus;
use crate::domain::metrics::{Metrics, keys};
use crate::utils::retry::Backoff;

/// Failure taxonomy; everything except `Auth` triggers a reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Timeout,
    Protocol,
    Auth,
    RateLimit,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::Protocol => "protocol",
            FailureKind::Auth => "auth",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::Unknown => "unknown",
        }
    }
}

#[derive(Error, Debug)]
pub enum FirehoseError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<WsError>),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("No pong within {0:?}")]
    KeepAliveTimeout(Duration),
}

impl FirehoseError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FirehoseError::ConnectTimeout(_) | FirehoseError::KeepAliveTimeout(_) => {
                FailureKind::Timeout
            }
            FirehoseError::WebSocket(e) => classify_ws_error(e),
        }
    }
}

fn classify_ws_error(error: &WsError) -> FailureKind {
    match error {
        WsError::Http(response) => match response.status().as_u16() {
            401 | 403 => FailureKind::Auth,
            429 => FailureKind::RateLimit,
            _ => FailureKind::Protocol,
        },
        WsError::Io(_) | WsError::Tls(_) | WsError::ConnectionClosed | WsError::AlreadyClosed => {
            FailureKind::Network
        }
        WsError::Protocol(_) | WsError::Utf8 | WsError::Url(_) | WsError::HttpFormat(_) => {
            FailureKind::Protocol
        }
        _ => FailureKind::Unknown,
    }
}

/// How a connected session ended without an error
enum SessionEnd {
    Shutdown,
    Reconnect,
}

pub struct FirehoseConsumer {
    config: IngestConfig,
    queue: Arc<QueueService>,
    cursor: Arc<CursorTracker>,
    metrics: Arc<Metrics>,
    status: Arc<FirehoseStatus>,
}

impl FirehoseConsumer {
    pub fn new(
        config: IngestConfig,
        queue: Arc<QueueService>,
        cursor: Arc<CursorTracker>,
        metrics: Arc<Metrics>,
        status: Arc<FirehoseStatus>,
    ) -> Self {
        Self {
            config,
            queue,
            cursor,
            metrics,
            status,
        }
    }

    /// Spawn the single long-running ingest task
    pub fn start(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.status.mark_started();

            let mut control = match self.queue.subscribe_control().await {
                Ok(sub) => sub,
                Err(e) => {
                    tracing::warn!(error = %e, "Control channel unavailable to firehose consumer");
                    BroadcastSubscription {
                        receiver: Box::pin(futures::stream::pending()),
                    }
                }
            };

            let mut backoff = Backoff::new(
                Duration::from_secs(FIREHOSE_BACKOFF_BASE_SECS),
                Duration::from_secs(FIREHOSE_BACKOFF_MAX_SECS),
            );

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match self
                    .run_session(&mut shutdown_rx, &mut control, &mut backoff)
                    .await
                {
                    Ok(SessionEnd::Shutdown) => break,
                    Ok(SessionEnd::Reconnect) => {
                        self.status.set_connected(false);
                        self.metrics.incr(keys::FIREHOSE_RECONNECTS);
                    }
                    Err(e) => {
                        let kind = e.kind();
                        self.status.set_connected(false);
                        self.status.record_failure();
                        self.metrics.incr(keys::FIREHOSE_RECONNECTS);

                        if kind == FailureKind::Auth {
                            tracing::error!(
                                error = %e,
                                failure = kind.as_str(),
                                "Firehose authentication failed; stopping ingestion"
                            );
                            self.status.mark_fatal();
                            break;
                        }

                        let delay = backoff.next_delay();
                        tracing::warn!(
                            error = %e,
                            failure = kind.as_str(),
                            backoff_secs = delay.as_secs(),
                            "Firehose connection failed, reconnecting after backoff"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() { break; }
                            }
                        }
                    }
                }
            }

            self.status.set_connected(false);
            tracing::info!("Firehose consumer stopped");
        })
    }

    /// Connect once and pump events until the session ends
    async fn run_session(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        control: &mut BroadcastSubscription,
        backoff: &mut Backoff,
    ) -> Result<SessionEnd, FirehoseError> {
        let url = self.subscribe_url();
        tracing::debug!(url = %url, "Connecting to relay");

        let connect_timeout = Duration::from_secs(FIREHOSE_CONNECT_TIMEOUT_SECS);
        let ws = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => {
                result.map_err(Box::new)?.0
            }
            _ = tokio::time::sleep(connect_timeout) => {
                return Err(FirehoseError::ConnectTimeout(connect_timeout));
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() { return Ok(SessionEnd::Shutdown); }
                return Ok(SessionEnd::Reconnect);
            }
        };

        self.status.set_connected(true);
        backoff.reset();
        tracing::info!(cursor = ?self.cursor.current(), "Firehose connected");

        let (mut write, mut read) = ws.split();

        let ping_interval_duration = Duration::from_secs(FIREHOSE_PING_INTERVAL_SECS);
        let pong_timeout = Duration::from_secs(FIREHOSE_PONG_TIMEOUT_SECS);
        let stall_timeout = Duration::from_secs(FIREHOSE_STALL_TIMEOUT_SECS);

        let mut ping_interval = tokio::time::interval(ping_interval_duration);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_pong = Instant::now();
        let mut last_event = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }

                payload = control.receiver.next() => {
                    if let Some(Ok(payload)) = payload
                        && QueueService::decode_control(&payload)
                            == Some(ControlMessage::ReconnectFirehose)
                    {
                        tracing::info!("Reconnect requested via control channel");
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Ok(SessionEnd::Reconnect);
                    }
                }

                // Keep-alive outranks the read loop so a busy stream cannot
                // starve pings into a spurious pong timeout
                _ = ping_interval.tick() => {
                    if last_pong.elapsed() > pong_timeout {
                        return Err(FirehoseError::KeepAliveTimeout(pong_timeout));
                    }
                    if last_event.elapsed() > stall_timeout {
                        tracing::warn!(
                            stalled_secs = last_event.elapsed().as_secs(),
                            "No events from relay; forcing reconnect"
                        );
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Ok(SessionEnd::Reconnect);
                    }
                    if write.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        return Ok(SessionEnd::Reconnect);
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            last_event = Instant::now();
                            self.status.record_event();
                            self.handle_frame(text.as_str()).await;
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            last_event = Instant::now();
                            self.status.record_event();
                            match std::str::from_utf8(&bytes) {
                                Ok(text) => self.handle_frame(text).await,
                                Err(e) => {
                                    tracing::warn!(error = %e, "Non-UTF-8 frame from relay");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if write.send(WsMessage::Pong(payload)).await.is_err() {
                                return Ok(SessionEnd::Reconnect);
                            }
                        }
                        Some(Ok(WsMessage::Pong(_))) => {
                            last_pong = Instant::now();
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            tracing::info!("Relay closed the connection");
                            return Ok(SessionEnd::Reconnect);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(Box::new(e).into()),
                        None => return Ok(SessionEnd::Reconnect),
                    }
                }
            }
        }
    }

    /// Decode one frame and hand it to the queue
    async fn handle_frame(&self, raw: &str) {
        let event = match decode_frame(raw) {
            Ok(event) => event,
            Err(FrameError::UnknownKind(kind)) => {
                tracing::debug!(kind = %kind, "Skipping unknown frame kind");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable frame");
                return;
            }
        };

        let counter_key = match event.kind() {
            "commit" => keys::EVENTS_COMMIT,
            "identity" => keys::EVENTS_IDENTITY,
            _ => keys::EVENTS_ACCOUNT,
        };

        // Push may block on queue back-pressure; a failed push is counted,
        // not retried (the event is rebuildable from the stream)
        match self.queue.push(&event).await {
            Ok(_) => {
                self.metrics.incr(counter_key);
                if let Some(seq) = event.seq.as_deref().and_then(|s| s.parse::<i64>().ok()) {
                    self.cursor.advance(seq);
                }
                // Lightweight fan-out for in-process observers
                if let Err(e) = self.queue.publish_event(&event).await {
                    tracing::debug!(error = %e, "Event fan-out failed");
                }
            }
            Err(e) => {
                self.metrics.incr(keys::PUSH_ERRORS);
                tracing::warn!(error = %e, "Failed to push event to queue");
            }
        }
    }

    /// Relay URL with the resume cursor advertised as a query parameter.
    /// No stored cursor means "start at head"; cursor 0 means "oldest".
    fn subscribe_url(&self) -> String {
        match self.cursor.current() {
            Some(seq) => {
                let separator = if self.config.relay_url.contains('?') {
                    '&'
                } else {
                    '?'
                };
                format!("{}{}cursor={}", self.config.relay_url, separator, seq)
            }
            None => self.config.relay_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_statuses() {
        // Only HTTP-derived classifications are constructible without a
        // socket; build the responses tungstenite would carry
        let unauthorized = WsError::Http(
            tokio_tungstenite::tungstenite::http::Response::builder()
                .status(401)
                .body(None)
                .unwrap(),
        );
        assert_eq!(classify_ws_error(&unauthorized), FailureKind::Auth);

        let limited = WsError::Http(
            tokio_tungstenite::tungstenite::http::Response::builder()
                .status(429)
                .body(None)
                .unwrap(),
        );
        assert_eq!(classify_ws_error(&limited), FailureKind::RateLimit);

        let server_error = WsError::Http(
            tokio_tungstenite::tungstenite::http::Response::builder()
                .status(502)
                .body(None)
                .unwrap(),
        );
        assert_eq!(classify_ws_error(&server_error), FailureKind::Protocol);
    }

    #[test]
    fn test_classify_io_and_close() {
        let io = WsError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "x"));
        assert_eq!(classify_ws_error(&io), FailureKind::Network);
        assert_eq!(
            classify_ws_error(&WsError::ConnectionClosed),
            FailureKind::Network
        );
    }

    #[test]
    fn test_timeout_kinds() {
        let timeout = FirehoseError::ConnectTimeout(Duration::from_secs(10));
        assert_eq!(timeout.kind(), FailureKind::Timeout);
        let keepalive = FirehoseError::KeepAliveTimeout(Duration::from_secs(45));
        assert_eq!(keepalive.kind(), FailureKind::Timeout);
    }
}
