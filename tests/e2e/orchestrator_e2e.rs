use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use httpmock::prelude::*;
use parley_context::{EstimateCounter, Message, StaticCatalog, TokenCounter};
use parley_runtime::{
    CompletionError, CompletionOptions, CompletionOrchestrator, Credential, Delivery,
    EventForwarder, EventPayload, ForwardEvent, NullForwarder, OpenAIBackend, ProviderError,
    RuntimeConfig,
};

#[derive(Default)]
struct CollectingForwarder {
    events: Mutex<Vec<ForwardEvent>>,
}

#[async_trait]
impl EventForwarder for CollectingForwarder {
    async fn send(&self, event: ForwardEvent) -> Delivery {
        self.events.lock().unwrap().push(event);
        Delivery::Sent
    }

    fn is_closed(&self) -> bool {
        false
    }
}

fn orchestrator(server: &MockServer) -> CompletionOrchestrator {
    let config = RuntimeConfig {
        api_base: format!("{}/v1", server.base_url()),
        ..RuntimeConfig::default()
    };
    let backend = OpenAIBackend::new(&config).expect("backend should build");
    CompletionOrchestrator::new(
        Arc::new(backend),
        Arc::new(EstimateCounter),
        Arc::new(StaticCatalog::default()),
        config,
    )
}

fn conversation() -> Vec<Message> {
    vec![
        Message::system("You are a helpful assistant."),
        Message::user("What is Rust?"),
        Message::assistant("A systems programming language."),
        Message::user("Say hello."),
    ]
}

#[tokio::test]
async fn streaming_completion_through_openai_backend() {
    let server = MockServer::start();
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer sk-e2e");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(body);
    });

    let forwarder = CollectingForwarder::default();
    let outcome = orchestrator(&server)
        .execute(
            &CompletionOptions::new("gpt-3.5-turbo").streaming(true),
            &Credential::new("sk-e2e"),
            &conversation(),
            &forwarder,
        )
        .await
        .expect("stream should complete");

    mock.assert();
    assert_eq!(outcome.response_text, "Hello, world");
    assert_eq!(outcome.finished_transcript.len(), 5);
    assert_eq!(
        outcome.total_tokens,
        EstimateCounter.count_tokens("gpt-3.5-turbo", &outcome.finished_transcript)
    );

    let events = forwarder.events.lock().unwrap().clone();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], ForwardEvent::delta("Hello"));
    assert_eq!(events[1], ForwardEvent::delta(", world"));
    assert_eq!(events[2], ForwardEvent::stop());
    assert_eq!(events[3].payload, EventPayload::Terminal);
}

#[tokio::test]
async fn blocking_completion_through_openai_backend() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200).json_body(serde_json::json!({
            "id": "chatcmpl-e2e",
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello there."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 30, "completion_tokens": 3, "total_tokens": 33}
        }));
    });

    let outcome = orchestrator(&server)
        .execute(
            &CompletionOptions::new("gpt-4").with_max_output_tokens(64),
            &Credential::new("sk-e2e"),
            &conversation(),
            &NullForwarder,
        )
        .await
        .expect("completion should succeed");

    mock.assert();
    assert_eq!(outcome.response_text, "Hello there.");
    assert_eq!(outcome.total_tokens, 33);
    assert_eq!(
        outcome.finished_transcript.last().map(|m| m.content.as_str()),
        Some("Hello there.")
    );
}

#[tokio::test]
async fn upstream_error_frame_surfaces_as_protocol_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200).body(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"server overloaded\"}}\n\n",
        ));
    });

    let forwarder = CollectingForwarder::default();
    let err = orchestrator(&server)
        .execute(
            &CompletionOptions::new("gpt-4").streaming(true),
            &Credential::new("sk-e2e"),
            &conversation(),
            &forwarder,
        )
        .await
        .unwrap_err();

    match err {
        CompletionError::UpstreamProtocol { payload } => {
            assert_eq!(payload["message"], "server overloaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(forwarder.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_credential_fails_before_streaming() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(401)
            .json_body(serde_json::json!({"error": {"message": "Incorrect API key provided"}}));
    });

    let forwarder = CollectingForwarder::default();
    let err = orchestrator(&server)
        .execute(
            &CompletionOptions::new("gpt-4").streaming(true),
            &Credential::new("wrong"),
            &conversation(),
            &forwarder,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CompletionError::Provider(ProviderError::HttpStatus { status: 401, .. })
    ));
    assert!(forwarder.events.lock().unwrap().is_empty());
}
