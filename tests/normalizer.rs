mod common;

use serde_json::{Value, json};

use common::StubAdapter;
use nanieval::dispatch::{ProviderKind, ProviderResponse, TokenUsage};
use nanieval::error::EvalError;
use nanieval::parsers::{self, parser_for};

fn response(provider: ProviderKind, body: Value) -> ProviderResponse {
    ProviderResponse { provider, body }
}

fn stub() -> StubAdapter {
    StubAdapter::new(vec![StubAdapter::text("unused", 0)])
}

#[tokio::test]
async fn chat_completion_shape_for_openai_and_huggingface() {
    let body = json!({
        "choices": [{"message": {"role": "assistant", "content": "hello"}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 3}
    });
    for kind in [ProviderKind::OpenAi, ProviderKind::HuggingFace] {
        let result = parsers::normalize(&response(kind, body.clone()), &stub(), 99)
            .await
            .unwrap();
        assert_eq!(result.text, "hello");
        assert_eq!(result.usage, TokenUsage { input: 12, output: 3 });
    }
}

#[tokio::test]
async fn content_blocks_are_concatenated_in_order() {
    let body = json!({
        "content": [
            {"type": "text", "text": "part one, "},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "part two"}
        ],
        "usage": {"input_tokens": 8, "output_tokens": 4}
    });
    let result = parsers::normalize(&response(ProviderKind::Anthropic, body), &stub(), 0)
        .await
        .unwrap();
    assert_eq!(result.text, "part one, part two");
    assert_eq!(result.usage.total(), 12);
}

#[tokio::test]
async fn gemini_candidates_shape() {
    let body = json!({
        "candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}],
        "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2}
    });
    let result = parsers::normalize(&response(ProviderKind::Gemini, body), &stub(), 0)
        .await
        .unwrap();
    assert_eq!(result.text, "ab");
    assert_eq!(result.usage, TokenUsage { input: 5, output: 2 });
}

#[tokio::test]
async fn flat_shape_records_total_as_output() {
    let body = json!({"text": "done", "total_tokens": 9});
    let result = parsers::normalize(&response(ProviderKind::Nani, body), &stub(), 6)
        .await
        .unwrap();
    assert_eq!(result.text, "done");
    assert_eq!(result.usage, TokenUsage { input: 6, output: 9 });
}

#[tokio::test]
async fn missing_usage_is_recounted() {
    // 16 chars -> 4 tokens with the length heuristic.
    let body = json!({"choices": [{"message": {"content": "abcdefghijklmnop"}}]});
    let result = parsers::normalize(&response(ProviderKind::OpenAi, body), &stub(), 11)
        .await
        .unwrap();
    assert_eq!(result.usage, TokenUsage { input: 11, output: 4 });
}

#[test]
fn unknown_shapes_are_rejected() {
    let cases = [
        (ProviderKind::OpenAi, json!({"choices": []})),
        (ProviderKind::OpenAi, json!({"choices": [{"message": {"content": null}}]})),
        (ProviderKind::Anthropic, json!({"content": [{"type": "image"}]})),
        (ProviderKind::Gemini, json!({"candidates": []})),
        (ProviderKind::Nani, json!({"output": "x"})),
        (ProviderKind::Nani, json!("just a string")),
    ];
    for (kind, body) in cases {
        let err = parser_for(kind).parse(kind, &body).unwrap_err();
        match err {
            EvalError::UnsupportedResponse { provider, .. } => assert_eq!(provider, kind.as_str()),
            other => panic!("{kind}: expected UnsupportedResponse, got {other:?}"),
        }
    }
}

#[test]
fn unsupported_response_is_not_retryable() {
    let err = parser_for(ProviderKind::Gemini)
        .parse(ProviderKind::Gemini, &json!({}))
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(err.reason(), "unsupported_response");
}
