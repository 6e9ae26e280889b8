use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Everything a provider needs to generate one streamed response
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub reasoning_effort: Option<String>,
}

/// One increment of a streamed model response
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// A fragment of generated text
    Text(String),
    /// A complete tool invocation. `arguments` is the raw serialized argument string.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// The model finished this response
    Finish { reason: String, usage: Usage },
}

pub type ProviderStream = BoxStream<'static, Result<ProviderEvent>>;

/// Base trait for streaming chat backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Open a streamed completion. Returns once the backend has accepted the request.
    async fn stream(&self, request: &CompletionRequest) -> Result<ProviderStream>;
}
