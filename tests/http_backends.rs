//! Backend adapters against mock HTTP servers: request shapes, response
//! extraction, SSE streaming, and status-to-error mapping.

mod common;

use std::time::Duration;

use common::*;
use prdraft::config::HttpSettings;
use prdraft::dispatch::{Backend, BackendAdapter, BackendDescriptor};
use prdraft::error::PrDraftError;
use prdraft::retry::is_retryable_error;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn collect_into(chunks: &mut Vec<String>) -> impl FnMut(&str) + Send + '_ {
    move |c: &str| chunks.push(c.to_string())
}

// ---------------------------------------------------------------------------
// Non-streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_generate_sends_bearer_and_reads_message() {
    let (base, server) = serve_once(json_response("200 OK", &openai_body("Add retries"))).await;
    let descriptor = BackendDescriptor::new(Backend::OpenAi, "sk-test")
        .with_base_url(format!("{base}/v1/chat/completions"));

    let text = assert_ok!(adapter(&descriptor).generate("write it").await);
    assert_eq!(text, "Add retries");

    let req = &server.await.unwrap()[0];
    assert!(req.request_line().starts_with("POST /v1/chat/completions"));
    assert_eq!(req.header("authorization"), Some("Bearer sk-test"));
    let body = req.json();
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["messages"][0]["content"], "write it");
    assert_eq!(body["stream"], false);
    assert_eq!(body["max_tokens"], 256);
}

#[tokio::test]
async fn claude_generate_uses_messages_api() {
    let reply = json!({
        "content": [{"type": "text", "text": "{\"title\":\"T\"}"}],
        "stop_reason": "end_turn"
    });
    let (base, server) = serve_once(json_response("200 OK", &reply.to_string())).await;
    let descriptor = BackendDescriptor::new(Backend::Claude, "ant-key")
        .with_model("claude-test")
        .with_base_url(format!("{base}/v1/messages"));

    let text = assert_ok!(adapter(&descriptor).generate("p").await);
    assert_eq!(text, "{\"title\":\"T\"}");

    let req = &server.await.unwrap()[0];
    assert_eq!(req.header("x-api-key"), Some("ant-key"));
    assert_eq!(req.header("anthropic-version"), Some("2023-06-01"));
    assert!(req.header("authorization").is_none());
    assert_eq!(req.json()["model"], "claude-test");
}

#[tokio::test]
async fn gemini_generate_targets_model_path() {
    let reply = json!({
        "candidates": [{"content": {"parts": [{"text": "Gem"}, {"text": "ini"}]}}]
    });
    let (base, server) = serve_once(json_response("200 OK", &reply.to_string())).await;
    let descriptor = BackendDescriptor::new(Backend::Gemini, "g-key")
        .with_base_url(format!("{base}/v1beta"));

    let text = assert_ok!(adapter(&descriptor).generate("p").await);
    assert_eq!(text, "Gemini");

    let req = &server.await.unwrap()[0];
    assert!(
        req.request_line()
            .starts_with("POST /v1beta/models/gemini-2.5-flash:generateContent "),
        "unexpected request line: {}",
        req.request_line()
    );
    assert_eq!(req.header("x-goog-api-key"), Some("g-key"));
    assert_eq!(req.json()["generationConfig"]["maxOutputTokens"], 256);
}

#[tokio::test]
async fn empty_completion_is_an_upstream_error() {
    let (base, _server) = serve_once(json_response("200 OK", &openai_body(""))).await;
    let descriptor = BackendDescriptor::new(Backend::OpenAi, "k")
        .with_base_url(format!("{base}/v1/chat/completions"));

    let err = assert_err!(adapter(&descriptor).generate("p").await);
    assert!(matches!(err, PrDraftError::Upstream { status: None, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn malformed_body_is_a_schema_error() {
    let (base, _server) = serve_once(json_response("200 OK", "not json")).await;
    let descriptor = BackendDescriptor::new(Backend::OpenAi, "k")
        .with_base_url(format!("{base}/v1/chat/completions"));

    let err = assert_err!(adapter(&descriptor).generate("p").await);
    assert!(matches!(err, PrDraftError::SchemaParse(_)));
}

// ---------------------------------------------------------------------------
// Status mapping
// ---------------------------------------------------------------------------

async fn generate_against_status(status: &str, body: &str) -> PrDraftError {
    let (base, _server) = serve_once(json_response(status, body)).await;
    let descriptor = BackendDescriptor::new(Backend::OpenAi, "k")
        .with_base_url(format!("{base}/v1/chat/completions"));
    assert_err!(adapter(&descriptor).generate("p").await)
}

#[tokio::test]
async fn unauthorized_names_backend_and_env_var() {
    let err = generate_against_status("401 Unauthorized", r#"{"error":"bad key"}"#).await;
    match &err {
        PrDraftError::AuthFailed { provider, message } => {
            assert_eq!(provider, "openai");
            assert!(message.contains("OpenAI"), "{message}");
            assert!(message.contains("OPENAI_API_KEY"), "{message}");
        }
        other => panic!("expected AuthFailed, got {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn forbidden_is_permission_denied() {
    let err = generate_against_status("403 Forbidden", "{}").await;
    assert!(matches!(err, PrDraftError::PermissionDenied { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn too_many_requests_is_retryable() {
    let err = generate_against_status("429 Too Many Requests", "{}").await;
    assert!(matches!(err, PrDraftError::RateLimited { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn server_error_keeps_status_and_is_retryable() {
    let err = generate_against_status("503 Service Unavailable", "overloaded").await;
    match &err {
        PrDraftError::Upstream {
            status, message, ..
        } => {
            assert_eq!(*status, Some(503));
            assert!(message.contains("overloaded"));
        }
        other => panic!("expected Upstream, got {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn bad_request_is_not_retryable() {
    let err = generate_against_status("400 Bad Request", "{}").await;
    assert!(matches!(
        err,
        PrDraftError::Upstream {
            status: Some(400),
            ..
        }
    ));
    assert!(!err.is_retryable());
}

// ---------------------------------------------------------------------------
// Transport failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_refused_is_a_retryable_request_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let descriptor = BackendDescriptor::new(Backend::OpenAi, "k")
        .with_base_url(format!("http://127.0.0.1:{port}/v1/chat/completions"));

    let err = assert_err!(adapter(&descriptor).generate("p").await);
    assert!(matches!(err, PrDraftError::Request(_)), "{err:?}");
    assert!(err.is_retryable());
    assert!(is_retryable_error(&err));
}

#[tokio::test]
async fn silent_server_times_out_and_is_retryable() {
    let (base, _server) = serve_silent(Duration::from_secs(5)).await;
    let descriptor = BackendDescriptor::new(Backend::OpenAi, "k")
        .with_base_url(format!("{base}/v1/chat/completions"));
    let settings = HttpSettings {
        timeout_secs: 1,
        ..settings()
    };

    let err = assert_err!(adapter_with(&descriptor, settings).generate("p").await);
    match &err {
        PrDraftError::Timeout(ms) => assert!(*ms >= 900, "elapsed {ms}ms"),
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert!(is_retryable_error(&err));
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_stream_delivers_deltas_in_order() {
    let events = vec![
        openai_delta("Hello "),
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".to_string(),
        openai_delta("world!"),
        "data: [DONE]\n\n".to_string(),
    ];
    let (base, server) = serve_once(sse_response(&events)).await;
    let descriptor = BackendDescriptor::new(Backend::OpenAi, "k")
        .with_base_url(format!("{base}/v1/chat/completions"));

    let mut chunks = Vec::new();
    let text = assert_ok!(
        adapter(&descriptor)
            .generate_stream("p", &mut collect_into(&mut chunks))
            .await
    );
    assert_eq!(text, "Hello world!");
    assert_eq!(chunks, vec!["Hello ", "world!"]);
    assert_eq!(server.await.unwrap()[0].json()["stream"], true);
}

#[tokio::test]
async fn claude_stream_reads_content_block_deltas() {
    let delta = |t: &str| {
        let data = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": t}
        });
        format!("event: content_block_delta\ndata: {data}\n\n")
    };
    let events = vec![
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n".to_string(),
        "event: ping\ndata: {\"type\":\"ping\"}\n\n".to_string(),
        delta("# Title"),
        delta("\n\nBody"),
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_string(),
    ];
    let (base, _server) = serve_once(sse_response(&events)).await;
    let descriptor = BackendDescriptor::new(Backend::Claude, "k")
        .with_base_url(format!("{base}/v1/messages"));

    let mut chunks = Vec::new();
    let text = assert_ok!(
        adapter(&descriptor)
            .generate_stream("p", &mut collect_into(&mut chunks))
            .await
    );
    assert_eq!(text, "# Title\n\nBody");
    assert_eq!(chunks.len(), 2);
}

#[tokio::test]
async fn claude_stream_error_event_fails() {
    let events = vec![
        "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n"
            .to_string(),
    ];
    let (base, _server) = serve_once(sse_response(&events)).await;
    let descriptor = BackendDescriptor::new(Backend::Claude, "k")
        .with_base_url(format!("{base}/v1/messages"));

    let mut sink = |_: &str| {};
    let err = assert_err!(adapter(&descriptor).generate_stream("p", &mut sink).await);
    match err {
        PrDraftError::Stream { provider, message } => {
            assert_eq!(provider, "claude");
            assert_eq!(message, "Overloaded");
        }
        other => panic!("expected Stream, got {other:?}"),
    }
}

#[tokio::test]
async fn gemini_stream_uses_sse_endpoint() {
    let chunk = |t: &str| {
        let data = json!({"candidates": [{"content": {"parts": [{"text": t}]}}]});
        format!("data: {data}\n\n")
    };
    let events = vec![chunk("one "), chunk("two")];
    let (base, server) = serve_once(sse_response(&events)).await;
    let descriptor = BackendDescriptor::new(Backend::Gemini, "k")
        .with_model("gemini-test")
        .with_base_url(format!("{base}/v1beta"));

    let mut chunks = Vec::new();
    let text = assert_ok!(
        adapter(&descriptor)
            .generate_stream("p", &mut collect_into(&mut chunks))
            .await
    );
    assert_eq!(text, "one two");
    assert_eq!(chunks, vec!["one ", "two"]);

    let req = &server.await.unwrap()[0];
    assert!(
        req.request_line()
            .starts_with("POST /v1beta/models/gemini-test:streamGenerateContent?alt=sse "),
        "unexpected request line: {}",
        req.request_line()
    );
}

#[tokio::test]
async fn copilot_stream_is_synthesized_from_one_shot_reply() {
    let (base, server) =
        serve_once(json_response("200 OK", &openai_body("Fix the flaky test"))).await;
    let descriptor = BackendDescriptor::new(Backend::Copilot, "ghp_token")
        .with_base_url(format!("{base}/inference/chat/completions"));

    let mut chunks = Vec::new();
    let text = assert_ok!(
        adapter(&descriptor)
            .generate_stream("p", &mut collect_into(&mut chunks))
            .await
    );
    assert_eq!(text, "Fix the flaky test");
    assert_eq!(chunks, vec!["Fix ", "the ", "flaky ", "test"]);

    let req = &server.await.unwrap()[0];
    assert_eq!(req.header("authorization"), Some("Bearer ghp_token"));
    let body = req.json();
    assert_eq!(body["stream"], false);
    assert_eq!(body["model"], "openai/gpt-4o");
}

#[tokio::test]
async fn stream_and_generate_agree_on_text() {
    let events = vec![openai_delta("same "), openai_delta("text"), "data: [DONE]\n\n".to_string()];
    let (stream_base, _s1) = serve_once(sse_response(&events)).await;
    let (plain_base, _s2) = serve_once(json_response("200 OK", &openai_body("same text"))).await;

    let streaming = BackendDescriptor::new(Backend::OpenAi, "k")
        .with_base_url(format!("{stream_base}/v1/chat/completions"));
    let plain = BackendDescriptor::new(Backend::OpenAi, "k")
        .with_base_url(format!("{plain_base}/v1/chat/completions"));

    let mut sink = |_: &str| {};
    let a = assert_ok!(adapter(&streaming).generate_stream("p", &mut sink).await);
    let b = assert_ok!(adapter(&plain).generate("p").await);
    assert_eq!(a, b);
}
