use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;

use super::{ToolDescriptor, TransportKind};

/// One wire-level way of reaching a tool provider.
///
/// Implementations open a fresh connection for every call and close it before
/// returning; no handle outlives the call that created it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Connect, list every tool the provider offers, disconnect
    async fn list_tools(&self, url: &str) -> Result<Vec<ToolDescriptor>>;

    /// Connect, invoke one tool, disconnect. Returns the serialized tool output.
    async fn call_tool(&self, url: &str, name: &str, arguments: Value) -> Result<String>;
}
