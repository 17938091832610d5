//! Outbound event forwarding
//!
//! The orchestrator pushes each increment to an [`EventForwarder`] as soon as
//! it is decoded. A forwarder whose client has gone away drops writes
//! quietly; the orchestrator polls [`EventForwarder::is_closed`] between
//! frames and races [`EventForwarder::closed`] against each upstream read.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

/// Literal that ends a stream, both upstream and towards the client.
pub const TERMINAL_MARKER: &str = "[DONE]";

/// Response headers set once when a client stream opens.
pub const STREAM_HEADERS: [(&str, &str); 4] = [
    ("content-type", "text/event-stream; charset=utf-8"),
    ("access-control-allow-origin", "*"),
    ("x-accel-buffering", "no"),
    ("cache-control", "no-cache, no-transform"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Answer,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Answer => "answer",
            EventKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Json(Value),
    Terminal,
}

impl EventPayload {
    /// Wire form of the payload.
    pub fn render(&self) -> String {
        match self {
            EventPayload::Json(value) => value.to_string(),
            EventPayload::Terminal => TERMINAL_MARKER.to_string(),
        }
    }
}

/// One push to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl ForwardEvent {
    /// Incremental content, shaped like an upstream chunk.
    pub fn delta(text: &str) -> Self {
        Self::answer(answer_payload(Some(text), None))
    }

    /// Final chunk with `finish_reason: "stop"`.
    pub fn stop() -> Self {
        Self::answer(answer_payload(None, Some("stop")))
    }

    pub fn terminal() -> Self {
        Self {
            kind: EventKind::Answer,
            payload: EventPayload::Terminal,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            payload: EventPayload::Json(json!({ "message": message.into() })),
        }
    }

    fn answer(payload: Value) -> Self {
        Self {
            kind: EventKind::Answer,
            payload: EventPayload::Json(payload),
        }
    }
}

fn answer_payload(text: Option<&str>, finish_reason: Option<&str>) -> Value {
    json!({
        "id": "",
        "object": "",
        "created": 0,
        "choices": [{
            "delta": { "role": "assistant", "content": text },
            "index": 0,
            "finish_reason": finish_reason,
        }],
    })
}

/// Outcome of a single push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped,
}

#[async_trait]
pub trait EventForwarder: Send + Sync {
    /// Push one event. Never fails; a closed channel yields `Dropped`.
    async fn send(&self, event: ForwardEvent) -> Delivery;

    fn is_closed(&self) -> bool;

    /// Resolves once the client is gone. Forwarders without a close signal
    /// never resolve.
    async fn closed(&self) {
        futures::future::pending::<()>().await;
    }
}

/// Forwarder backed by a bounded channel drained by the HTTP layer.
#[derive(Debug, Clone)]
pub struct ChannelForwarder {
    tx: mpsc::Sender<ForwardEvent>,
}

impl ChannelForwarder {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ForwardEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventForwarder for ChannelForwarder {
    async fn send(&self, event: ForwardEvent) -> Delivery {
        match self.tx.send(event).await {
            Ok(()) => Delivery::Sent,
            Err(_) => {
                debug!("client channel closed, dropping event");
                Delivery::Dropped
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// Forwarder for callers with nobody listening (non-streaming requests).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullForwarder;

#[async_trait]
impl EventForwarder for NullForwarder {
    async fn send(&self, _event: ForwardEvent) -> Delivery {
        Delivery::Dropped
    }

    fn is_closed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_payload_mirrors_upstream_chunk() {
        let event = ForwardEvent::delta("Hi");
        let EventPayload::Json(value) = event.payload else {
            panic!("expected json payload");
        };
        assert_eq!(event.kind, EventKind::Answer);
        assert_eq!(value["choices"][0]["delta"]["content"], "Hi");
        assert!(value["choices"][0]["finish_reason"].is_null());
    }

    #[test]
    fn stop_payload_has_null_content() {
        let EventPayload::Json(value) = ForwardEvent::stop().payload else {
            panic!("expected json payload");
        };
        assert!(value["choices"][0]["delta"]["content"].is_null());
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn terminal_renders_marker() {
        assert_eq!(ForwardEvent::terminal().payload.render(), "[DONE]");
    }

    #[tokio::test]
    async fn channel_forwarder_delivers_in_order() {
        let (forwarder, mut rx) = ChannelForwarder::channel(8);

        assert_eq!(forwarder.send(ForwardEvent::delta("a")).await, Delivery::Sent);
        assert_eq!(forwarder.send(ForwardEvent::delta("b")).await, Delivery::Sent);

        assert_eq!(rx.recv().await, Some(ForwardEvent::delta("a")));
        assert_eq!(rx.recv().await, Some(ForwardEvent::delta("b")));
    }

    #[tokio::test]
    async fn closed_channel_drops_silently() {
        let (forwarder, rx) = ChannelForwarder::channel(1);
        drop(rx);

        assert!(forwarder.is_closed());
        assert_eq!(forwarder.send(ForwardEvent::terminal()).await, Delivery::Dropped);
    }

    #[tokio::test]
    async fn closed_resolves_when_receiver_goes_away() {
        let (forwarder, rx) = ChannelForwarder::channel(1);

        let waiter = tokio::spawn(async move { forwarder.closed().await });
        drop(rx);

        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("closed() should resolve after the receiver is dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn null_forwarder_never_signals_close() {
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            NullForwarder.closed(),
        )
        .await;
        assert!(pending.is_err());
    }
}
