//! OpenAI-compatible backend
//!
//! Implements [`CompletionBackend`] for the Chat Completions API. Streaming
//! returns the raw response body; framing is left to the reassembler.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::{
    ByteStream, CompletionBackend, CompletionReply, CompletionRequest, Credential, ProviderError,
};

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
const FREQUENCY_PENALTY: f32 = 0.5;
const PRESENCE_PENALTY: f32 = -0.5;

#[derive(Debug, Clone)]
pub struct OpenAIBackend {
    client: Client,
    base_url: String,
}

impl OpenAIBackend {
    pub fn new(config: &RuntimeConfig) -> Result<Self, ProviderError> {
        // No overall timeout: streams run as long as the upstream keeps
        // sending. Non-streaming deadlines are applied by the orchestrator.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            CHAT_COMPLETIONS_PATH
        )
    }

    fn payload(req: CompletionRequest, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: req.model,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            messages: req
                .messages
                .into_iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content,
                })
                .collect(),
            frequency_penalty: FREQUENCY_PENALTY,
            presence_penalty: PRESENCE_PENALTY,
            stream,
        }
    }

    async fn send(
        &self,
        credential: &Credential,
        payload: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(credential.expose())
            .json(payload)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::parse_error_response(status, response).await);
        }
        Ok(response)
    }

    async fn parse_error_response(status: StatusCode, response: reqwest::Response) -> ProviderError {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unable to read body>".to_string());

        let parsed = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .map_or_else(|| body.clone(), |err| err.error.message);

        ProviderError::HttpStatus {
            status: status.as_u16(),
            body: parsed,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAIBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        credential: &Credential,
        req: CompletionRequest,
    ) -> Result<CompletionReply, ProviderError> {
        let payload = Self::payload(req, false);
        let response = self.send(credential, &payload).await?;

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;

        let first_choice = body.choices.into_iter().next();
        let finish_reason = first_choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = first_choice
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(CompletionReply {
            content,
            total_tokens: body.usage.map_or(0, |usage| usage.total_tokens),
            model: body.model,
            finish_reason,
        })
    }

    async fn complete_stream(
        &self,
        credential: &Credential,
        req: CompletionRequest,
    ) -> Result<ByteStream, ProviderError> {
        let payload = Self::payload(req, true);
        let response = self.send(credential, &payload).await?;

        Ok(Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map_err(|err| ProviderError::Transport(err.to_string()))
        })))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage>,
    frequency_penalty: f32,
    presence_penalty: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
