use serde_json::json;

use super::DeepSeekAdapter;
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    Capability, ConversationTurn, GenerationOptions, ProviderId, TextRequest, Usage,
};
use crate::test_support::{MockResponse, MockServer, descriptor_at, test_transport};

fn adapter_for(server: &MockServer) -> DeepSeekAdapter {
    DeepSeekAdapter::with_transport(
        descriptor_at(ProviderId::Deepseek, &server.url()),
        "ds-key",
        test_transport(),
    )
    .expect("adapter builds")
}

#[tokio::test]
async fn test_generate_text_sends_chat_completion_and_reads_usage() {
    let mut server = MockServer::start(vec![MockResponse::json(
        200,
        json!({
            "choices": [{ "message": { "role": "assistant", "content": "pong" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13 }
        }),
    )]);
    let adapter = adapter_for(&server);

    let envelope = adapter
        .generate_text(&TextRequest::new(
            "system rules",
            vec![ConversationTurn::user("ping?"), ConversationTurn::assistant("yes")],
            "ping",
        ))
        .await;

    assert!(envelope.is_success());
    assert_eq!(envelope.payload().map(|p| p.text.as_str()), Some("pong"));
    assert_eq!(
        envelope.usage(),
        Some(&Usage {
            prompt_tokens: 12,
            completion_tokens: 1,
            total_tokens: 13,
        })
    );

    server.shutdown();
    let captured = server.captured();
    assert_eq!(captured[0].path, "/chat/completions");
    assert_eq!(
        captured[0].headers.get("authorization"),
        Some(&"Bearer ds-key".to_string())
    );
    let body = captured[0].json_body();
    assert_eq!(body["model"], "deepseek-chat");
    assert_eq!(body["messages"][0], json!({ "role": "system", "content": "system rules" }));
    assert_eq!(body["messages"][3], json!({ "role": "user", "content": "ping" }));
    assert_eq!(body["max_tokens"], 2000);
}

#[tokio::test]
async fn test_generate_text_with_empty_choices_succeeds_with_empty_text() {
    let mut server = MockServer::start(vec![MockResponse::json(200, json!({ "choices": [] }))]);
    let adapter = adapter_for(&server);

    let envelope = adapter
        .generate_text(&TextRequest::new("s", Vec::new(), "i"))
        .await;

    assert!(envelope.is_success());
    assert_eq!(envelope.payload().map(|p| p.text.as_str()), Some(""));
    assert_eq!(envelope.usage(), Some(&Usage::default()));
    server.shutdown();
}

#[tokio::test]
async fn test_generate_text_maps_upstream_failure_to_envelope() {
    let mut server = MockServer::start(vec![MockResponse::json(
        500,
        json!({ "error": { "message": "internal failure" } }),
    )]);
    let adapter = adapter_for(&server);

    let envelope = adapter
        .generate_text(
            &TextRequest::new("s", Vec::new(), "i")
                .with_options(GenerationOptions::default().with_model("deepseek-reasoner")),
        )
        .await;

    assert!(!envelope.is_success());
    assert_eq!(
        envelope.error(),
        Some(
            "provider status error [provider=Deepseek, model=deepseek-reasoner, status_code=500]: internal failure"
        )
    );
    server.shutdown();
}

#[tokio::test]
async fn test_is_available_requires_clean_success() {
    let mut server = MockServer::start(vec![
        MockResponse::json(200, json!({ "data": [] })),
        MockResponse::json(400, json!({})),
    ]);
    let adapter = adapter_for(&server);

    assert!(adapter.is_available().await);
    assert!(!adapter.is_available().await);

    server.shutdown();
    let captured = server.captured();
    assert_eq!(captured[0].method, "GET");
    assert_eq!(captured[0].path, "/models");
}

#[tokio::test]
async fn test_image_and_audio_are_unsupported() {
    let adapter = DeepSeekAdapter::with_transport(
        descriptor_at(ProviderId::Deepseek, "http://127.0.0.1:9"),
        "k",
        test_transport(),
    )
    .expect("adapter builds");

    let image = adapter
        .generate_image("a cat", &GenerationOptions::default())
        .await;
    assert_eq!(image.error(), Some("image generation not supported by DeepSeek"));
    assert!(adapter.list_models(Capability::Image).is_empty());
    assert!(adapter.stream_text(&TextRequest::default()).is_none());
}
