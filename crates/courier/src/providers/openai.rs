use anyhow::{anyhow, Result};
use async_stream::stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{CompletionRequest, Provider, ProviderStream};
use super::utils::{drain_sse_data, messages_to_openai_spec, tools_to_openai_spec, ChunkAccumulator};

pub const OPENAI_HOST: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl OpenAiProviderConfig {
    pub fn new<H: Into<String>, K: Into<String>>(host: H, api_key: K) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Streaming client for any OpenAI-compatible chat completions endpoint
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn build_payload(request: &CompletionRequest) -> Result<Value> {
        let system_message = json!({
            "role": "system",
            "content": request.system
        });

        let mut messages_array = vec![system_message];
        messages_array.extend(messages_to_openai_spec(&request.messages));

        let mut payload = json!({
            "model": request.model,
            "messages": messages_array,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        let object = payload
            .as_object_mut()
            .ok_or_else(|| anyhow!("payload is not an object"))?;
        if !request.tools.is_empty() {
            object.insert("tools".to_string(), json!(tools_to_openai_spec(&request.tools)?));
        }
        if let Some(temp) = request.temperature {
            object.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = request.max_tokens {
            object.insert("max_tokens".to_string(), json!(tokens));
        }
        if let Some(effort) = &request.reasoning_effort {
            object.insert("reasoning_effort".to_string(), json!(effort));
        }

        Ok(payload)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<ProviderStream> {
        let payload = Self::build_payload(request)?;
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                return Err(anyhow!("Server error: {}", status));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow!("Request failed: {}\nBody: {}", status, body));
            }
        }

        Ok(read_event_stream(response.bytes_stream()))
    }
}

/// Turn a raw SSE body into provider events.
///
/// Bytes are buffered until a full line is available, so a character split
/// across network chunks is decoded only once it is complete.
fn read_event_stream<S, E>(bytes: S) -> ProviderStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<anyhow::Error> + Send,
{
    let stream = stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer = BytesMut::new();
        let mut accumulator = ChunkAccumulator::new();

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let e: anyhow::Error = e.into();
                    yield Err(e);
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            for data in drain_sse_data(&mut buffer) {
                if data == "[DONE]" {
                    break 'read;
                }
                let events = serde_json::from_str::<Value>(&data)
                    .map_err(anyhow::Error::from)
                    .and_then(|value| accumulator.push(&value));
                match events {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        for event in accumulator.finish("stop") {
            yield Ok(event);
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::models::tool::Tool;
    use crate::providers::base::{ProviderEvent, Usage};
    use futures::TryStreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(chunks: &[Value]) -> String {
        let mut body = String::new();
        for chunk in chunks {
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn setup_mock_server(body: String) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&mock_server)
            .await;

        let provider =
            OpenAiProvider::new(OpenAiProviderConfig::new(mock_server.uri(), "test_api_key"))
                .unwrap();
        (mock_server, provider)
    }

    fn request(tools: Vec<Tool>) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".to_string(),
            system: "You are a helpful assistant.".to_string(),
            messages: vec![Message::user().with_text("Hello?")],
            tools,
            temperature: Some(0.7),
            max_tokens: None,
            reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn test_stream_text() -> Result<()> {
        let body = sse(&[
            json!({"choices": [{"delta": {"role": "assistant", "content": "Hello"}}]}),
            json!({"choices": [{"delta": {"content": " there"}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 12, "completion_tokens": 2, "total_tokens": 14}}),
        ]);
        let (_server, provider) = setup_mock_server(body).await;

        let events: Vec<ProviderEvent> = provider.stream(&request(vec![])).await?.try_collect().await?;

        assert_eq!(events[0], ProviderEvent::Text("Hello".into()));
        assert_eq!(events[1], ProviderEvent::Text(" there".into()));
        assert_eq!(
            events[2],
            ProviderEvent::Finish {
                reason: "stop".into(),
                usage: Usage::new(Some(12), Some(2), Some(14)),
            }
        );
        assert_eq!(events.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_tool_call() -> Result<()> {
        let body = sse(&[
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_123", "type": "function", "function": {"name": "get_weather", "arguments": ""}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"location\":\"San Francisco, CA\"}"}}]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}], "usage": {"prompt_tokens": 20, "completion_tokens": 15, "total_tokens": 35}}),
        ]);
        let (_server, provider) = setup_mock_server(body).await;

        let tool = Tool::new(
            "get_weather",
            "Gets the current weather for a location",
            json!({
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }),
        );
        let events: Vec<ProviderEvent> =
            provider.stream(&request(vec![tool])).await?.try_collect().await?;

        assert_eq!(
            events[0],
            ProviderEvent::ToolCall {
                id: "call_123".into(),
                name: "get_weather".into(),
                arguments: "{\"location\":\"San Francisco, CA\"}".into(),
            }
        );
        assert_eq!(
            events[1],
            ProviderEvent::Finish {
                reason: "tool_calls".into(),
                usage: Usage::new(Some(20), Some(15), Some(35)),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_character_split_across_chunks() -> Result<()> {
        let line = format!(
            "data: {}\n\ndata: [DONE]\n\n",
            json!({"choices": [{"delta": {"content": "café"}}]})
        );
        let bytes = line.as_bytes();
        // Split between the two bytes of 'é'
        let split = line.find('é').unwrap() + 1;
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];

        let events: Vec<ProviderEvent> = read_event_stream(futures::stream::iter(chunks))
            .try_collect()
            .await?;

        assert_eq!(events[0], ProviderEvent::Text("café".into()));
        assert!(matches!(events[1], ProviderEvent::Finish { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error_fails_before_streaming() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let provider =
            OpenAiProvider::new(OpenAiProviderConfig::new(mock_server.uri(), "k")).unwrap();
        let err = provider.stream(&request(vec![])).await.err().unwrap();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_payload_includes_reasoning_effort() -> Result<()> {
        let mut req = request(vec![]);
        req.reasoning_effort = Some("high".into());
        req.max_tokens = Some(256);
        let payload = OpenAiProvider::build_payload(&req)?;
        assert_eq!(payload["reasoning_effort"], "high");
        assert_eq!(payload["max_tokens"], 256);
        assert_eq!(payload["messages"][0]["role"], "system");
        assert!(payload.get("tools").is_none());
        Ok(())
    }
}
