//! Completion orchestration
//!
//! One call fits the conversation into the model's window, caps the reply
//! length, and then either waits for a complete answer or consumes the
//! upstream stream frame by frame, forwarding each delta in arrival order.
//! Streamed usage is always recomputed locally from the finished transcript.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use parley_context::{
    ContextError, ContextTruncator, Message, ModelCatalog, TokenBudget, TokenCounter,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::forwarder::{Delivery, EventForwarder, ForwardEvent};
use crate::reassembler::{frames, FrameError, StreamFrame};
use crate::{CompletionBackend, CompletionRequest, Credential, ProviderError};

/// Every option a completion call recognizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    /// Requested reply length; the runtime default applies when absent
    #[serde(default)]
    pub max_output_tokens: Option<usize>,
    /// Prompt budget; derived from the model's context size when absent
    #[serde(default)]
    pub budget: Option<usize>,
    #[serde(default)]
    pub stream: bool,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            max_output_tokens: None,
            budget: None,
            stream: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Final result of a completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub response_text: String,
    pub total_tokens: usize,
    /// Prompts actually sent followed by the assistant reply
    pub finished_transcript: Vec<Message>,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error(transparent)]
    Budget(#[from] ContextError),

    #[error("{source}")]
    MalformedFrame {
        source: FrameError,
        /// Content and accounting gathered before the bad frame
        partial: Box<CompletionOutcome>,
    },

    #[error("upstream reported an error: {payload}")]
    UpstreamProtocol { payload: Value },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type CompletionResult<T> = Result<T, CompletionError>;

/// Truncated prompts plus the request that will be sent for them.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub request: CompletionRequest,
    pub prompt_tokens: usize,
    pub stream: bool,
}

/// Drives one completion at a time per call; shareable across tasks.
pub struct CompletionOrchestrator {
    backend: Arc<dyn CompletionBackend>,
    counter: Arc<dyn TokenCounter>,
    catalog: Arc<dyn ModelCatalog>,
    truncator: ContextTruncator,
    config: RuntimeConfig,
}

impl CompletionOrchestrator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        counter: Arc<dyn TokenCounter>,
        catalog: Arc<dyn ModelCatalog>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            backend,
            truncator: ContextTruncator::new(Arc::clone(&counter)),
            counter,
            catalog,
            config,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn context_limit(&self, model: &str) -> usize {
        if let Some(spec) = self.catalog.lookup(model) {
            return spec.context_max_tokens;
        }
        warn!(
            model,
            fallback = self.config.fallback_context_tokens,
            "model missing from catalog, assuming fallback context size"
        );
        self.config.fallback_context_tokens
    }

    /// Truncate the conversation and size the reply.
    ///
    /// Fails with a budget error when the system messages alone do not fit,
    /// or when the prompt leaves no room in the context window for a reply.
    pub fn prepare(
        &self,
        options: &CompletionOptions,
        prompts: &[Message],
    ) -> CompletionResult<PreparedRequest> {
        let limit = self.context_limit(&options.model);
        let budget = options.budget.unwrap_or_else(|| {
            TokenBudget::new(limit)
                .with_reserved_output(self.config.reserved_output)
                .with_safety_margin(self.config.safety_margin)
                .available_tokens()
        });

        let truncation = self.truncator.fit(&options.model, prompts, budget);
        if truncation.dropped > 0 {
            info!(
                model = %options.model,
                dropped = truncation.dropped,
                budget,
                "dropped older messages to fit the context window"
            );
        }
        let messages = truncation.into_messages()?;

        let prompt_tokens = self.counter.count_tokens(&options.model, &messages);
        let room = limit.saturating_sub(prompt_tokens);
        if room == 0 {
            return Err(ContextError::PromptTooLong {
                model: options.model.clone(),
                prompt_tokens,
                limit,
            }
            .into());
        }

        let requested = options
            .max_output_tokens
            .unwrap_or(self.config.default_max_output);
        let max_tokens = requested.min(room).max(1);

        Ok(PreparedRequest {
            request: CompletionRequest {
                model: options.model.clone(),
                messages,
                max_tokens,
                temperature: options.temperature,
            },
            prompt_tokens,
            stream: options.stream,
        })
    }

    /// Run one completion. Streaming calls push deltas to `forwarder` as
    /// they arrive; non-streaming calls never touch it.
    pub async fn execute(
        &self,
        options: &CompletionOptions,
        credential: &Credential,
        prompts: &[Message],
        forwarder: &dyn EventForwarder,
    ) -> CompletionResult<CompletionOutcome> {
        let prepared = self.prepare(options, prompts)?;
        self.execute_prepared(prepared, credential, forwarder).await
    }

    /// Run a request that already went through [`Self::prepare`].
    ///
    /// After a client disconnect the outcome holds only the text the
    /// forwarder accepted before it closed.
    pub async fn execute_prepared(
        &self,
        prepared: PreparedRequest,
        credential: &Credential,
        forwarder: &dyn EventForwarder,
    ) -> CompletionResult<CompletionOutcome> {
        debug!(
            model = %prepared.request.model,
            backend = self.backend.name(),
            prompt_tokens = prepared.prompt_tokens,
            max_tokens = prepared.request.max_tokens,
            stream = prepared.stream,
            "executing completion"
        );

        if prepared.stream {
            self.run_streaming(prepared.request, credential, forwarder)
                .await
        } else {
            self.run_blocking(prepared.request, credential).await
        }
    }

    async fn run_blocking(
        &self,
        request: CompletionRequest,
        credential: &Credential,
    ) -> CompletionResult<CompletionOutcome> {
        let deadline = self.config.completion_timeout;
        let mut transcript = request.messages.clone();

        let reply = tokio::time::timeout(deadline, self.backend.complete(credential, request))
            .await
            .map_err(|_| ProviderError::Timeout(deadline))??;

        transcript.push(Message::assistant(reply.content.clone()));
        Ok(CompletionOutcome {
            response_text: reply.content,
            total_tokens: reply.total_tokens,
            finished_transcript: transcript,
        })
    }

    async fn run_streaming(
        &self,
        request: CompletionRequest,
        credential: &Credential,
        forwarder: &dyn EventForwarder,
    ) -> CompletionResult<CompletionOutcome> {
        let started = Instant::now();
        let model = request.model.clone();
        let mut transcript = request.messages.clone();

        let body = self.backend.complete_stream(credential, request).await?;
        let mut frames = frames(body);

        let mut reply = String::new();
        let mut upstream_error: Option<Value> = None;
        let mut malformed: Option<FrameError> = None;

        loop {
            if forwarder.is_closed() {
                info!(model = %model, "client disconnected, cancelling upstream stream");
                break;
            }

            let next = tokio::select! {
                biased;
                () = forwarder.closed() => None,
                frame = frames.next() => Some(frame),
            };
            let Some(next) = next else {
                info!(model = %model, "client disconnected while waiting on upstream");
                break;
            };
            let Some(frame) = next else {
                break;
            };

            match frame {
                Ok(StreamFrame::Delta { text }) => {
                    let delivery = forwarder.send(ForwardEvent::delta(&text)).await;
                    if delivery == Delivery::Dropped && forwarder.is_closed() {
                        info!(model = %model, "client disconnected, cancelling upstream stream");
                        break;
                    }
                    reply.push_str(&text);
                }
                Ok(StreamFrame::Done) => {
                    forwarder.send(ForwardEvent::stop()).await;
                    forwarder.send(ForwardEvent::terminal()).await;
                    break;
                }
                Ok(StreamFrame::Error { payload }) => {
                    warn!(model = %model, error = %payload, "upstream sent an error frame");
                    upstream_error = Some(payload);
                    break;
                }
                Err(FrameError::Transport(reason)) => {
                    warn!(model = %model, %reason, "upstream stream interrupted, treating as end");
                    break;
                }
                Err(err @ FrameError::MalformedFrame { .. }) => {
                    warn!(model = %model, error = %err, "giving up on malformed stream");
                    malformed = Some(err);
                    break;
                }
            }
        }
        // Dropping the frame stream releases the upstream connection.
        drop(frames);

        if let Some(payload) = upstream_error {
            return Err(CompletionError::UpstreamProtocol { payload });
        }

        transcript.push(Message::assistant(reply.clone()));
        let total_tokens = self.counter.count_tokens(&model, &transcript);
        info!(
            model = %model,
            total_tokens,
            reply_chars = reply.chars().count(),
            elapsed_ms = started.elapsed().as_millis(),
            "stream finished"
        );

        let outcome = CompletionOutcome {
            response_text: reply,
            total_tokens,
            finished_transcript: transcript,
        };

        match malformed {
            Some(source) => Err(CompletionError::MalformedFrame {
                source,
                partial: Box::new(outcome),
            }),
            None => Ok(outcome),
        }
    }
}

impl std::fmt::Debug for CompletionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionOrchestrator")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
