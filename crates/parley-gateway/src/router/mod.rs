//! HTTP routes for the Parley gateway

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use futures::StreamExt;
use parley_context::{Message, ModelSpec};
use parley_runtime::{
    ChannelForwarder, CompletionError, CompletionOptions, Credential, EventForwarder,
    ForwardEvent, NullForwarder, STREAM_HEADERS,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Events buffered between the orchestrator and a slow client
const STREAM_BUFFER: usize = 64;

/// Build the main router for the gateway
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics_handler() -> String {
    metrics::export()
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub data: Vec<ModelSpec>,
}

async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList {
        data: state.catalog.list(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionBody {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub budget: Option<usize>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionBody {
    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.model.clone(),
            temperature: self.temperature.unwrap_or_default(),
            max_output_tokens: self.max_tokens,
            budget: self.budget,
            stream: self.stream,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub model: String,
    pub content: String,
    pub total_tokens: usize,
    pub transcript: Vec<Message>,
}

async fn chat_completions(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Json(body): Json<ChatCompletionBody>,
) -> ApiResult<Response> {
    if body.model.trim().is_empty() {
        return Err(ApiError::BadRequest("model must not be empty".to_string()));
    }

    let credential = state.credential(bearer.as_ref().map(|TypedHeader(auth)| auth.token()))?;
    let options = body.options();

    if options.stream {
        stream_completion(&state, options, credential, body.messages)
    } else {
        blocking_completion(&state, options, credential, body.messages).await
    }
}

async fn blocking_completion(
    state: &AppState,
    options: CompletionOptions,
    credential: Credential,
    messages: Vec<Message>,
) -> ApiResult<Response> {
    let started = Instant::now();
    let result = state
        .orchestrator
        .execute(&options, &credential, &messages, &NullForwarder)
        .await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(outcome) => {
            metrics::observe_completion("blocking", "ok", outcome.total_tokens, elapsed);
            Ok(Json(ChatCompletionResponse {
                model: options.model,
                content: outcome.response_text,
                total_tokens: outcome.total_tokens,
                transcript: outcome.finished_transcript,
            })
            .into_response())
        }
        Err(err) => {
            metrics::observe_completion("blocking", outcome_label(&err), 0, elapsed);
            Err(err.into())
        }
    }
}

fn stream_completion(
    state: &AppState,
    options: CompletionOptions,
    credential: Credential,
    messages: Vec<Message>,
) -> ApiResult<Response> {
    // Budget failures are reported as a plain HTTP error before any event.
    let prepared = state.orchestrator.prepare(&options, &messages)?;
    let model = options.model;

    let (forwarder, rx) = ChannelForwarder::channel(STREAM_BUFFER);
    let orchestrator = Arc::clone(&state.orchestrator);

    tokio::spawn(async move {
        let started = Instant::now();
        let result = orchestrator
            .execute_prepared(prepared, &credential, &forwarder)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => {
                metrics::observe_completion("stream", "ok", outcome.total_tokens, elapsed);
                info!(model = %model, total_tokens = outcome.total_tokens, "stream completed");
            }
            Err(err) => {
                let tokens = match &err {
                    CompletionError::MalformedFrame { partial, .. } => partial.total_tokens,
                    _ => 0,
                };
                metrics::observe_completion("stream", outcome_label(&err), tokens, elapsed);
                warn!(model = %model, error = %err, "streamed completion failed");
                forwarder.send(ForwardEvent::error(err.to_string())).await;
            }
        }
    });

    let events = ReceiverStream::new(rx).map(|event| {
        let name = event.kind.as_str();
        metrics::EVENTS_FORWARDED.with_label_values(&[name]).inc();
        Ok::<_, Infallible>(Event::default().event(name).data(event.payload.render()))
    });

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    for (name, value) in STREAM_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    Ok(response)
}

fn outcome_label(err: &CompletionError) -> &'static str {
    match err {
        CompletionError::Budget(_) => "budget",
        CompletionError::MalformedFrame { .. } => "malformed",
        CompletionError::UpstreamProtocol { .. } => "upstream_error",
        CompletionError::Provider(_) => "provider_error",
    }
}
