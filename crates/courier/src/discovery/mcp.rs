//! MCP transports backed by the `rmcp` client.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::RunningService,
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        SseClientTransport, StreamableHttpClientTransport,
    },
    RoleClient, ServiceExt,
};
use serde_json::Value;
use std::borrow::Cow;
use std::time::Duration;

use super::transport::ToolTransport;
use super::{ToolDescriptor, TransportKind};

type McpSession = RunningService<RoleClient, ()>;

fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .context("build HTTP client")
}

fn to_descriptor(tool: rmcp::model::Tool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name.to_string(),
        description: tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        input_schema: Value::Object((*tool.input_schema).clone()),
    }
}

async fn close(session: McpSession, kind: TransportKind) {
    if let Err(e) = session.cancel().await {
        tracing::debug!(transport = %kind, "error closing MCP session: {}", e);
    }
}

async fn list_over(session: McpSession, kind: TransportKind) -> Result<Vec<ToolDescriptor>> {
    let listed = session.peer().list_all_tools().await;
    close(session, kind).await;
    let tools = listed.map_err(|e| anyhow!("list tools over {}: {}", kind, e))?;
    Ok(tools.into_iter().map(to_descriptor).collect())
}

async fn call_over(
    session: McpSession,
    kind: TransportKind,
    name: &str,
    arguments: Value,
) -> Result<String> {
    let arguments = match arguments {
        Value::Object(map) => Some(map),
        Value::Null => None,
        other => {
            close(session, kind).await;
            return Err(anyhow!("tool arguments must be a JSON object, got {}", other));
        }
    };

    let request = CallToolRequestParam {
        name: Cow::Owned(name.to_string()),
        arguments,
    };
    let result = session.call_tool(request).await;
    close(session, kind).await;

    let result = result.map_err(|e| anyhow!("call tool '{}' over {}: {}", name, kind, e))?;
    let output = serde_json::to_string(&result.content)?;
    if result.is_error.unwrap_or(false) {
        return Err(anyhow!("tool '{}' reported an error: {}", name, output));
    }
    Ok(output)
}

/// The bidirectional streaming HTTP transport
pub struct StreamableHttpTransport {
    http: reqwest::Client,
}

impl StreamableHttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http_client(connect_timeout)?,
        })
    }

    async fn connect(&self, url: &str) -> Result<McpSession> {
        let config = StreamableHttpClientTransportConfig::with_uri(url);
        let transport = StreamableHttpClientTransport::with_client(self.http.clone(), config);
        ().serve(transport)
            .await
            .map_err(|e| anyhow!("initialize streamable HTTP client for {}: {}", url, e))
    }
}

#[async_trait]
impl ToolTransport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    async fn list_tools(&self, url: &str) -> Result<Vec<ToolDescriptor>> {
        let session = self.connect(url).await?;
        list_over(session, self.kind()).await
    }

    async fn call_tool(&self, url: &str, name: &str, arguments: Value) -> Result<String> {
        let session = self.connect(url).await?;
        call_over(session, self.kind(), name, arguments).await
    }
}

/// The legacy server-sent-events transport
pub struct SseTransport {
    http: reqwest::Client,
}

impl SseTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http_client(connect_timeout)?,
        })
    }

    async fn connect(&self, url: &str) -> Result<McpSession> {
        let config = SseClientConfig {
            sse_endpoint: url.into(),
            ..Default::default()
        };
        let transport = SseClientTransport::start_with_client(self.http.clone(), config)
            .await
            .map_err(|e| anyhow!("create SSE transport for {}: {}", url, e))?;
        ().serve(transport)
            .await
            .map_err(|e| anyhow!("initialize SSE client for {}: {}", url, e))
    }
}

#[async_trait]
impl ToolTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn list_tools(&self, url: &str) -> Result<Vec<ToolDescriptor>> {
        let session = self.connect(url).await?;
        list_over(session, self.kind()).await
    }

    async fn call_tool(&self, url: &str, name: &str, arguments: Value) -> Result<String> {
        let session = self.connect(url).await?;
        call_over(session, self.kind(), name, arguments).await
    }
}
