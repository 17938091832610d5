//! Runtime for executing chat completions against upstream backends.
//!
//! A [`CompletionBackend`] speaks one upstream family's wire protocol. The
//! [`CompletionOrchestrator`] fits the conversation into the model's window,
//! drives the backend, reassembles streamed frames with a
//! [`ChunkReassembler`] and pushes deltas to an [`EventForwarder`].

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use parley_context::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod forwarder;
pub mod orchestrator;
pub mod providers;
pub mod reassembler;

pub use config::{ConfigError, RuntimeConfig};
pub use forwarder::{
    ChannelForwarder, Delivery, EventForwarder, EventKind, EventPayload, ForwardEvent,
    NullForwarder, STREAM_HEADERS, TERMINAL_MARKER,
};
pub use orchestrator::{
    CompletionError, CompletionOptions, CompletionOrchestrator, CompletionOutcome,
    CompletionResult, PreparedRequest,
};
pub use providers::OpenAIBackend;
pub use reassembler::{frames, ChunkReassembler, FrameError, FrameStream, StreamFrame};

/// A single upstream request after truncation and output capping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Envelope returned by a non-streaming completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReply {
    pub content: String,
    pub total_tokens: usize,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

/// Raw upstream body chunks, split wherever the network split them.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("mock backend has no queued response")]
    MockQueueEmpty,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Bearer credential for the upstream service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// One upstream family (OpenAI-compatible, mock, ...).
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        credential: &Credential,
        req: CompletionRequest,
    ) -> Result<CompletionReply, ProviderError>;

    async fn complete_stream(
        &self,
        credential: &Credential,
        req: CompletionRequest,
    ) -> Result<ByteStream, ProviderError>;
}

/// Backend that replays queued replies and raw stream chunks.
#[derive(Debug, Default)]
pub struct MockBackend {
    complete_queue: Mutex<VecDeque<Result<CompletionReply, ProviderError>>>,
    stream_queue: Mutex<VecDeque<Result<Vec<Result<Bytes, ProviderError>>, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering `complete`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn enqueue_complete(&self, result: Result<CompletionReply, ProviderError>) {
        self.complete_queue
            .lock()
            .expect("mock complete queue poisoned")
            .push_back(result);
    }

    pub fn enqueue_stream(&self, result: Result<Vec<Result<Bytes, ProviderError>>, ProviderError>) {
        self.stream_queue
            .lock()
            .expect("mock stream queue poisoned")
            .push_back(result);
    }

    /// Queue a stream body delivered as the given raw pieces.
    pub fn enqueue_chunks<I, S>(&self, chunks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        self.enqueue_stream(Ok(chunks.into_iter().map(|c| Ok(c.into())).collect()));
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .expect("mock request log poisoned")
            .clone()
    }

    fn record(&self, req: CompletionRequest) {
        self.requests
            .lock()
            .expect("mock request log poisoned")
            .push(req);
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(
        &self,
        _credential: &Credential,
        req: CompletionRequest,
    ) -> Result<CompletionReply, ProviderError> {
        self.record(req);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.complete_queue
            .lock()
            .expect("mock complete queue poisoned")
            .pop_front()
            .unwrap_or(Err(ProviderError::MockQueueEmpty))
    }

    async fn complete_stream(
        &self,
        _credential: &Credential,
        req: CompletionRequest,
    ) -> Result<ByteStream, ProviderError> {
        self.record(req);
        let next = self
            .stream_queue
            .lock()
            .expect("mock stream queue poisoned")
            .pop_front()
            .unwrap_or(Err(ProviderError::MockQueueEmpty))?;

        Ok(Box::pin(stream::iter(next)))
    }
}
