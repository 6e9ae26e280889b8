//! Tool provider discovery over the MCP protocol.
//!
//! Providers speak one of two incompatible transports: the bidirectional
//! streamable HTTP transport, or the legacy server-sent-events transport.
//! [`client::DiscoveryClient`] tries the former first and falls back to the
//! latter; [`registry::ToolRegistry`] keeps the resulting catalogs and routes
//! tool calls back to the provider that advertised them.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod client;
pub mod mcp;
pub mod registry;
pub mod transport;

pub use client::DiscoveryClient;
pub use registry::{ToolExecutor, ToolRegistry};
pub use transport::ToolTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    StreamableHttp,
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::StreamableHttp => write!(f, "streamable-http"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// A callable tool as advertised by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// The complete catalog of one provider, obtained over exactly one transport
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub transport: TransportKind,
    pub tools: Vec<ToolDescriptor>,
}

/// Which primary failures lead to a secondary attempt.
///
/// `AnyError` falls back on every failure, including transient network
/// trouble that has nothing to do with transport support. `SkipOnTimeout`
/// treats a primary attempt that runs past the connect timeout as a sign the
/// provider is unreachable and reports it without trying the secondary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    #[default]
    AnyError,
    SkipOnTimeout,
}
