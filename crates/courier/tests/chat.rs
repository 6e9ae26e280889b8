use anyhow::{anyhow, Result};
use async_trait::async_trait;
use courier::catalog::{ModelCatalog, ModelDeployment};
use courier::discovery::registry::ToolProviderConfig;
use courier::discovery::{
    DiscoveryClient, ToolDescriptor, ToolExecutor, ToolRegistry, ToolTransport, TransportKind,
};
use courier::dispatcher::{ChatDispatcher, Completion, StreamPart, ToolEvent};
use courier::prompt::{normalize, RawSubmission};
use courier::providers::openai::{OpenAiProvider, OpenAiProviderConfig};
use courier::tracker::ToolCallTracker;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A provider that answers every call itself and records what it was asked
struct WeatherTransport {
    kind: TransportKind,
    calls: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl ToolTransport for WeatherTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn list_tools(&self, _url: &str) -> Result<Vec<ToolDescriptor>> {
        Ok(vec![ToolDescriptor {
            name: "forecast".to_string(),
            description: "Weather forecast for a city".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }),
        }])
    }

    async fn call_tool(&self, _url: &str, name: &str, arguments: Value) -> Result<String> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        Ok("sunny, 21C".to_string())
    }
}

struct UnsupportedTransport;

#[async_trait]
impl ToolTransport for UnsupportedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    async fn list_tools(&self, url: &str) -> Result<Vec<ToolDescriptor>> {
        Err(anyhow!("{} does not speak streamable http", url))
    }

    async fn call_tool(&self, url: &str, _name: &str, _arguments: Value) -> Result<String> {
        Err(anyhow!("{} does not speak streamable http", url))
    }
}

fn sse(chunks: &[Value]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn test_tool_round_trip_through_fallback_provider() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(event_stream(sse(&[
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "type": "function", "function": {"name": "weather__forecast", "arguments": ""}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"city\":\"Oslo\"}"}}]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(event_stream(sse(&[
            json!({"choices": [{"delta": {"content": "Sunny in Oslo."}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 40, "completion_tokens": 5, "total_tokens": 45}}),
        ])))
        .with_priority(2)
        .mount(&server)
        .await;

    let legacy = Arc::new(WeatherTransport {
        kind: TransportKind::Sse,
        calls: Mutex::new(Vec::new()),
    });
    let client = DiscoveryClient::new(Arc::new(UnsupportedTransport), legacy.clone());
    let registry = Arc::new(ToolRegistry::new(
        client,
        vec![ToolProviderConfig {
            name: "weather".to_string(),
            url: "https://weather.example.com/mcp".to_string(),
        }],
    ));
    let summary = registry.refresh().await;
    assert_eq!(summary.available, vec!["weather".to_string()]);
    assert_eq!(
        registry.transports().await.get("weather"),
        Some(&TransportKind::Sse)
    );

    let provider = OpenAiProvider::new(OpenAiProviderConfig::new(server.uri(), "test_api_key"))?;
    let catalog = ModelCatalog::new(vec![ModelDeployment::named("gpt-4o-mini")])
        .with_default_model(Some("gpt-4o-mini".to_string()));
    let dispatcher = ChatDispatcher::new(Arc::new(provider), registry.clone(), catalog);

    let prompt = normalize(RawSubmission::new(
        r#"{"message":"Weather in Oslo?","threadId":"t-1"}"#,
    ))?;
    let tracker = ToolCallTracker::new();
    let stream = dispatcher
        .dispatch(prompt, CancellationToken::new(), tracker.clone())
        .await?;

    let parts: Vec<StreamPart> = stream.parts.collect().await;
    let events: Vec<ToolEvent> = stream.events.collect().await;
    let completion = stream.completion.await?;

    assert_eq!(
        parts[0],
        StreamPart::ToolCall {
            id: "call_1".to_string(),
            name: "weather__forecast".to_string(),
            arguments: json!({"city": "Oslo"}),
        }
    );
    assert_eq!(
        parts[1],
        StreamPart::ToolResult {
            id: "call_1".to_string(),
            result: json!("sunny, 21C"),
        }
    );
    assert_eq!(parts[2], StreamPart::Text("Sunny in Oslo.".to_string()));
    match &parts[3] {
        StreamPart::Finish { reason, usage } => {
            assert_eq!(reason, "stop");
            assert_eq!(usage.total_tokens, Some(45));
        }
        other => panic!("expected finish, got {:?}", other),
    }
    assert_eq!(parts.len(), 4);

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], ToolEvent::Started { name, .. } if name == "weather__forecast"));
    assert!(matches!(&events[1], ToolEvent::Finished { is_error: false, .. }));
    assert_eq!(
        completion,
        Completion::Finished {
            reason: "stop".to_string()
        }
    );
    assert!(tracker.current().is_none());

    let calls = legacy.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![("forecast".to_string(), json!({"city": "Oslo"}))]);

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);
    let first: Value = serde_json::from_slice(&requests[0].body)?;
    assert_eq!(first["model"], "gpt-4o-mini");
    assert_eq!(first["tools"][0]["function"]["name"], "weather__forecast");
    let second: Value = serde_json::from_slice(&requests[1].body)?;
    let messages = second["messages"].as_array().cloned().unwrap_or_default();
    let tool_message = messages
        .iter()
        .find(|m| m["role"] == "tool")
        .cloned()
        .unwrap_or_default();
    assert_eq!(tool_message["tool_call_id"], "call_1");
    assert_eq!(tool_message["content"], "sunny, 21C");
    Ok(())
}

#[tokio::test]
async fn test_rejected_request_fails_dispatch() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key sk-secret"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(OpenAiProviderConfig::new(server.uri(), "bad"))?;
    let registry = Arc::new(ToolRegistry::new(
        DiscoveryClient::new(Arc::new(UnsupportedTransport), Arc::new(UnsupportedTransport)),
        Vec::new(),
    ));
    assert!(registry.tools().await.is_empty());
    let dispatcher = ChatDispatcher::new(Arc::new(provider), registry, ModelCatalog::default());

    let prompt = normalize(RawSubmission::new(r#"{"message":"hi"}"#))?;
    let err = dispatcher
        .dispatch(prompt, CancellationToken::new(), ToolCallTracker::new())
        .await
        .err()
        .ok_or_else(|| anyhow!("dispatch should fail"))?;

    assert_eq!(err.status_code(), 500);
    assert!(!err.public_message().contains("sk-secret"));
    Ok(())
}
