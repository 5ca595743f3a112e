mod common;

use serde_json::json;

use common::MockServer;
use nanieval::dispatch::providers::anthropic::AnthropicAdapter;
use nanieval::dispatch::providers::gemini::GeminiAdapter;
use nanieval::dispatch::providers::huggingface::HuggingFaceAdapter;
use nanieval::dispatch::providers::nani::NaniAdapter;
use nanieval::dispatch::providers::openai::OpenAiAdapter;
use nanieval::dispatch::{GenerationConfig, ProviderAdapter, ProviderKind, ProviderOptions};
use nanieval::error::EvalError;

fn options(base_url: &str) -> ProviderOptions {
    ProviderOptions::from([("base_url".to_string(), base_url.to_string())])
}

// ---------------------------------------------------------------------------
// Request shapes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_sends_chat_completion_with_bearer_and_merged_config() {
    let server = MockServer::json(
        200,
        json!({"choices": [{"message": {"content": "hi"}}], "usage": {"prompt_tokens": 3, "completion_tokens": 1}}),
    )
    .await;
    let adapter =
        OpenAiAdapter::new("sk-test".into(), "gpt-4o-mini".into(), &options(&server.base_url)).unwrap();

    let config = GenerationConfig::new().with("temperature", 0.1);
    let response = adapter.generate("hello", Some("be brief"), &config).await.unwrap();
    assert_eq!(response.provider, ProviderKind::OpenAi);

    let req = &server.requests()[0];
    assert_eq!(req.path, "/chat/completions");
    assert_eq!(req.header("authorization"), Some("Bearer sk-test"));
    assert_eq!(req.body["model"], "gpt-4o-mini");
    assert_eq!(req.body["messages"][0], json!({"role": "system", "content": "be brief"}));
    assert_eq!(req.body["messages"][1], json!({"role": "user", "content": "hello"}));
    // Caller value wins, default-only keys survive.
    assert_eq!(req.body["temperature"], 0.1);
    assert_eq!(req.body["max_tokens"], 4096);
}

#[tokio::test]
async fn anthropic_sends_messages_with_version_header() {
    let server = MockServer::json(
        200,
        json!({"content": [{"type": "text", "text": "ok"}], "usage": {"input_tokens": 2, "output_tokens": 1}}),
    )
    .await;
    let adapter =
        AnthropicAdapter::new("ak".into(), "claude".into(), &options(&server.base_url)).unwrap();

    adapter
        .generate("hello", Some("sys"), &GenerationConfig::new())
        .await
        .unwrap();

    let req = &server.requests()[0];
    assert_eq!(req.path, "/messages");
    assert_eq!(req.header("x-api-key"), Some("ak"));
    assert_eq!(req.header("anthropic-version"), Some("2023-06-01"));
    assert_eq!(req.body["system"], "sys");
    assert_eq!(req.body["messages"], json!([{"role": "user", "content": "hello"}]));
    assert_eq!(req.body["max_tokens"], 8096);
}

#[tokio::test]
async fn anthropic_omits_empty_system_prompt() {
    let server = MockServer::json(200, json!({"content": [{"type": "text", "text": "ok"}]})).await;
    let adapter =
        AnthropicAdapter::new("ak".into(), "claude".into(), &options(&server.base_url)).unwrap();

    adapter.generate("hello", Some(""), &GenerationConfig::new()).await.unwrap();
    assert!(server.requests()[0].body.get("system").is_none());
}

#[tokio::test]
async fn gemini_prepends_system_prompt_and_nests_generation_config() {
    let server = MockServer::json(
        200,
        json!({"candidates": [{"content": {"parts": [{"text": "ok"}]}}]}),
    )
    .await;
    let adapter =
        GeminiAdapter::new("gk".into(), "gemini-pro".into(), &options(&server.base_url)).unwrap();

    adapter
        .generate("question", Some("rules"), &GenerationConfig::new().with("top_k", 5))
        .await
        .unwrap();

    let req = &server.requests()[0];
    assert_eq!(req.path, "/models/gemini-pro:generateContent");
    assert_eq!(req.header("x-goog-api-key"), Some("gk"));
    assert_eq!(req.body["contents"][0]["parts"][0]["text"], "rules\nquestion");
    assert_eq!(req.body["generationConfig"]["top_k"], 5);
    assert_eq!(req.body["generationConfig"]["temperature"], 0.7);
}

#[tokio::test]
async fn huggingface_posts_chat_completion_to_endpoint() {
    let server = MockServer::json(200, json!({"choices": [{"message": {"content": "ok"}}]})).await;
    let adapter =
        HuggingFaceAdapter::new("hf".into(), "tgi".into(), &options(&server.base_url)).unwrap();

    adapter.generate("hello", None, &GenerationConfig::new()).await.unwrap();

    let req = &server.requests()[0];
    assert_eq!(req.path, "/chat/completions");
    assert_eq!(req.header("authorization"), Some("Bearer hf"));
    assert_eq!(req.body["messages"], json!([{"role": "user", "content": "hello"}]));
}

#[tokio::test]
async fn nani_sends_flat_envelope_without_streaming() {
    let server = MockServer::json(200, json!({"text": "ok", "total_tokens": 4})).await;
    let url = format!("{}/generate", server.base_url);
    let adapter = NaniAdapter::new("nk".into(), "nani-model".into(), &options(&url)).unwrap();

    // A caller can't turn streaming back on.
    let config = GenerationConfig::new().with("stream", true);
    adapter.generate("hello", Some("sys"), &config).await.unwrap();

    let req = &server.requests()[0];
    assert_eq!(req.path, "/generate");
    assert_eq!(req.header("x-api-key"), Some("nk"));
    assert_eq!(req.body["modelId"], "nani-model");
    assert_eq!(req.body["system"], "sys");
    assert_eq!(req.body["stream"], false);
    assert_eq!(req.body["messages"], json!([{"role": "user", "content": "hello"}]));
}

// ---------------------------------------------------------------------------
// Construction and failure mapping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_endpoint_is_fatal_whatever_its_url_contains() {
    // Grab a free port, then close it so the connection is refused.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let url = format!("http://127.0.0.1:{port}/5000/429/generate");
    let adapter = NaniAdapter::new("nk".into(), "nani-model".into(), &options(&url)).unwrap();
    let err = adapter
        .generate("hello", None, &GenerationConfig::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EvalError::Request { status: None, .. }), "{err:?}");
    assert!(!err.is_retryable(), "{err}");
    assert!(!err.to_string().contains("5000"), "{err}");
}

#[test]
fn self_hosted_adapters_require_base_url() {
    let empty = ProviderOptions::new();
    let hf = HuggingFaceAdapter::new("k".into(), "m".into(), &empty);
    assert!(matches!(hf, Err(EvalError::Configuration { .. })));

    let blank = ProviderOptions::from([("base_url".to_string(), "  ".to_string())]);
    let nani = NaniAdapter::new("k".into(), "m".into(), &blank);
    match nani {
        Err(EvalError::Configuration { provider, message }) => {
            assert_eq!(provider, "nani");
            assert!(message.contains("base_url"), "{message}");
        }
        _ => panic!("expected a configuration error"),
    }
}

#[tokio::test]
async fn error_status_surfaces_code_and_body() {
    let server = MockServer::start(vec![(429, r#"{"error":"slow down"}"#.to_string())]).await;
    let url = format!("{}/generate", server.base_url);
    let adapter = NaniAdapter::new("k".into(), "m".into(), &options(&url)).unwrap();

    let err = adapter
        .generate("hello", None, &GenerationConfig::new())
        .await
        .unwrap_err();
    match &err {
        EvalError::Request { status, message, .. } => {
            assert_eq!(*status, Some(429));
            assert!(message.contains("slow down"), "{message}");
        }
        other => panic!("expected Request, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn auth_failure_is_fatal() {
    let server =
        MockServer::start(vec![(401, r#"{"error":"invalid api key"}"#.to_string())]).await;
    let adapter =
        OpenAiAdapter::new("bad".into(), "gpt-4o-mini".into(), &options(&server.base_url)).unwrap();

    let err = adapter
        .generate("hello", None, &GenerationConfig::new())
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(err.reason(), "fatal");
}

#[tokio::test]
async fn non_json_body_is_unsupported_response() {
    let server = MockServer::start(vec![(200, "<html>oops</html>".to_string())]).await;
    let url = format!("{}/generate", server.base_url);
    let adapter = NaniAdapter::new("k".into(), "m".into(), &options(&url)).unwrap();

    let err = adapter
        .generate("hello", None, &GenerationConfig::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::UnsupportedResponse { .. }), "{err:?}");
}

// ---------------------------------------------------------------------------
// Token counting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anthropic_count_tokens_uses_endpoint() {
    let server = MockServer::json(200, json!({"input_tokens": 42})).await;
    let adapter =
        AnthropicAdapter::new("ak".into(), "claude".into(), &options(&server.base_url)).unwrap();

    assert_eq!(adapter.count_tokens("some prompt").await, 42);
    let req = &server.requests()[0];
    assert_eq!(req.path, "/messages/count_tokens");
    assert_eq!(req.body["model"], "claude");
}

#[tokio::test]
async fn count_tokens_falls_back_to_length_heuristic() {
    let server = MockServer::start(vec![(500, "{}".to_string())]).await;
    let adapter =
        AnthropicAdapter::new("ak".into(), "claude".into(), &options(&server.base_url)).unwrap();
    assert_eq!(adapter.count_tokens("abcd").await, 1);

    let gemini =
        GeminiAdapter::new("gk".into(), "gemini-pro".into(), &options(&server.base_url)).unwrap();
    assert_eq!(gemini.count_tokens("abcdefgh").await, 2);
}

#[tokio::test]
async fn gemini_count_tokens_reads_total() {
    let server = MockServer::json(200, json!({"totalTokens": 7})).await;
    let adapter =
        GeminiAdapter::new("gk".into(), "gemini-pro".into(), &options(&server.base_url)).unwrap();
    assert_eq!(adapter.count_tokens("hello world").await, 7);
    assert_eq!(server.requests()[0].path, "/models/gemini-pro:countTokens");
}

#[test]
fn default_configs_match_vendor_defaults() {
    let opts = options("http://127.0.0.1:1");
    let openai = OpenAiAdapter::new("k".into(), "m".into(), &opts).unwrap();
    assert_eq!(openai.default_config().get("temperature"), Some(&json!(0.9)));

    let gemini = GeminiAdapter::new("k".into(), "m".into(), &opts).unwrap();
    assert_eq!(gemini.default_config().get("top_k"), Some(&json!(40)));

    let nani = NaniAdapter::new("k".into(), "m".into(), &opts).unwrap();
    assert_eq!(nani.default_config().get("stream"), Some(&json!(false)));
}
