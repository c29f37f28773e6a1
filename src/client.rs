//! Auto-reconnecting push-stream consumer.
//!
//! Dashboard clients hold one long-lived SSE connection per owner and
//! reconnect with a fixed backoff on any drop. The consumer is an
//! explicit task with a connection state machine — Connecting →
//! Streaming → (Erroring ⇄ Streaming) → Closed — and terminates only
//! on an explicit stop; `Closed` releases the event channel exactly
//! once, by dropping it.

use crate::reminder::ReminderEvent;
use crate::sse::SseStreamParser;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Connection lifecycle of one stream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Handshake in flight.
    Connecting,
    /// Receiving events.
    Streaming,
    /// Server reported a soft error; still listening.
    Erroring,
    /// Terminal; resources released.
    Closed,
}

/// Why one connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamOutcome {
    /// Network drop, non-success status, or server close: reconnect.
    Dropped,
    /// The payload consumer went away: terminate the task.
    ConsumerGone,
}

/// Auto-reconnecting consumer of one owner's push stream.
pub struct StreamClient {
    url: String,
    bearer_token: Option<String>,
    reconnect: Duration,
}

/// Handle to a running [`StreamClient`] task.
pub struct StreamClientHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl StreamClientHandle {
    /// Request clean termination. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

impl StreamClient {
    /// Create a client for the given stream URL.
    #[must_use]
    pub fn new(url: impl Into<String>, bearer_token: Option<String>, reconnect: Duration) -> Self {
        Self {
            url: url.into(),
            bearer_token,
            reconnect,
        }
    }

    /// Spawn the consumer task. Decoded `reminder` payloads arrive on
    /// the returned channel; the task reconnects with a fixed backoff
    /// until the handle is stopped or the receiver is dropped.
    pub fn spawn(self) -> (StreamClientHandle, mpsc::Receiver<ReminderEvent>) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let client = reqwest::Client::new();
            loop {
                let outcome = tokio::select! {
                    outcome = self.run_once(&client, &event_tx) => outcome,
                    _ = &mut stop_rx => break,
                };

                match outcome {
                    StreamOutcome::ConsumerGone => break,
                    StreamOutcome::Dropped => {
                        debug!(
                            "stream dropped, reconnecting in {:?}",
                            self.reconnect
                        );
                    }
                }

                tokio::select! {
                    () = tokio::time::sleep(self.reconnect) => {}
                    _ = &mut stop_rx => break,
                }
            }
            debug!(state = ?StreamState::Closed, "stream client terminated");
        });

        (
            StreamClientHandle {
                stop_tx: Some(stop_tx),
                handle,
            },
            event_rx,
        )
    }

    /// Drive one connection until it drops or the consumer goes away.
    async fn run_once(
        &self,
        client: &reqwest::Client,
        event_tx: &mpsc::Sender<ReminderEvent>,
    ) -> StreamOutcome {
        let mut state = StreamState::Connecting;
        debug!(state = ?state, url = %self.url, "connecting to push stream");

        let mut request = client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("push stream connect failed: {e}");
                return StreamOutcome::Dropped;
            }
        };
        if !response.status().is_success() {
            warn!("push stream rejected with status {}", response.status());
            return StreamOutcome::Dropped;
        }

        state = StreamState::Streaming;
        info!(state = ?state, "push stream connected");

        let mut parser = SseStreamParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("push stream read failed: {e}");
                    return StreamOutcome::Dropped;
                }
            };

            for event in parser.push(&chunk) {
                match event.event_type.as_deref() {
                    Some("reminder") => match event.json::<ReminderEvent>() {
                        Ok(payload) => {
                            if event_tx.send(payload).await.is_err() {
                                return StreamOutcome::ConsumerGone;
                            }
                        }
                        Err(e) => warn!("undecodable reminder payload: {e}"),
                    },
                    Some("notify-error") => {
                        // Soft server-side failure: log and keep
                        // listening on the same connection.
                        state = StreamState::Erroring;
                        warn!(state = ?state, "server reported: {}", event.data);
                        state = StreamState::Streaming;
                        debug!(state = ?state, "resuming stream");
                    }
                    other => debug!("ignoring event {other:?}"),
                }
            }
        }

        debug!("push stream ended by server");
        StreamOutcome::Dropped
    }
}
