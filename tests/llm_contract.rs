//! HTTP contract tests for the `HttpLlm` adapter (spec §2, §4.4 step 5):
//! verifies the outbound request shape and that streamed SSE tokens are
//! forwarded in order.

use fae::llm::{ChatMessage, Llm};
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn streams_sse_tokens_in_order() {
    let mock_server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo.\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-model",
            "stream": true,
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(sse_body, "text/event-stream"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let llm = fae::llm::HttpLlm::new(mock_server.uri(), "test-model", None);
    let messages = [ChatMessage { role: "user", content: "hi".into() }];
    let (tx, mut rx) = mpsc::channel(8);

    llm.stream(&messages, 64, tx).await.expect("stream succeeds");

    let mut tokens = Vec::new();
    while let Some(token) = rx.recv().await {
        tokens.push(token);
    }
    assert_eq!(tokens, vec!["Hel".to_string(), "lo.".to_string()]);
}
