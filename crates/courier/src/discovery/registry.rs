use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::DiscoveryClient;
use super::{ToolDescriptor, TransportKind};
use crate::errors::{ToolError, ToolResult};
use crate::models::tool::{Tool, ToolCall};
use crate::providers::utils::sanitize_function_name;

const SEPARATOR: &str = "__";

/// Something that can run the tool calls a model asks for
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// All tools currently offered to the model
    async fn tools(&self) -> Vec<Tool>;

    async fn execute(&self, call: ToolCall) -> ToolResult<String>;
}

/// A configured MCP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProviderConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
struct DiscoveredProvider {
    url: String,
    transport: TransportKind,
    tools: Vec<ToolDescriptor>,
}

/// Outcome of one refresh pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub available: Vec<String>,
    pub unavailable: Vec<String>,
}

/// Catalogs of every reachable tool provider, keyed by provider name.
///
/// Only discovered data is kept here. Calls go back through the
/// [`DiscoveryClient`] transports, which open a new connection each time.
pub struct ToolRegistry {
    client: DiscoveryClient,
    providers: Vec<ToolProviderConfig>,
    discovered: RwLock<BTreeMap<String, DiscoveredProvider>>,
}

impl ToolRegistry {
    pub fn new(client: DiscoveryClient, providers: Vec<ToolProviderConfig>) -> Self {
        Self {
            client,
            providers,
            discovered: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn providers(&self) -> &[ToolProviderConfig] {
        &self.providers
    }

    /// Rediscover every configured provider concurrently
    pub async fn refresh(&self) -> RefreshSummary {
        let attempts = self.providers.iter().map(|provider| async move {
            (provider, self.client.discover(&provider.url).await)
        });
        let results = join_all(attempts).await;

        let mut summary = RefreshSummary::default();
        let mut discovered = self.discovered.write().await;
        for (provider, result) in results {
            match result {
                Ok(result) => {
                    info!(
                        provider = %provider.name,
                        transport = %result.transport,
                        tools = result.tools.len(),
                        "tool provider available"
                    );
                    discovered.insert(
                        provider.name.clone(),
                        DiscoveredProvider {
                            url: provider.url.clone(),
                            transport: result.transport,
                            tools: result.tools,
                        },
                    );
                    summary.available.push(provider.name.clone());
                }
                Err(e) => {
                    warn!(provider = %provider.name, url = %provider.url, error = %e, "omitting tool provider");
                    discovered.remove(&provider.name);
                    summary.unavailable.push(provider.name.clone());
                }
            }
        }
        summary
    }

    /// The transport each available provider was reached over
    pub async fn transports(&self) -> BTreeMap<String, TransportKind> {
        self.discovered
            .read()
            .await
            .iter()
            .map(|(name, provider)| (name.clone(), provider.transport))
            .collect()
    }
}

/// The name a provider's tool is offered to the model under: prefixed with
/// the provider name and limited to the characters function names allow
fn advertised_name(provider: &str, tool: &str) -> String {
    sanitize_function_name(&format!("{}{}{}", provider, SEPARATOR, tool))
}

struct Route {
    url: String,
    transport: TransportKind,
    tool: String,
}

impl ToolRegistry {
    /// Map an advertised name back to the provider and its original tool name
    async fn route(&self, advertised: &str) -> Option<Route> {
        let discovered = self.discovered.read().await;
        discovered.iter().find_map(|(name, provider)| {
            provider
                .tools
                .iter()
                .find(|tool| advertised_name(name, &tool.name) == advertised)
                .map(|tool| Route {
                    url: provider.url.clone(),
                    transport: provider.transport,
                    tool: tool.name.clone(),
                })
        })
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn tools(&self) -> Vec<Tool> {
        let discovered = self.discovered.read().await;
        let mut seen = BTreeSet::new();
        let mut tools = Vec::new();
        for (name, provider) in discovered.iter() {
            for tool in &provider.tools {
                let advertised = advertised_name(name, &tool.name);
                if !seen.insert(advertised.clone()) {
                    warn!(provider = %name, tool = %tool.name, %advertised, "skipping tool with clashing name");
                    continue;
                }
                tools.push(Tool::new(
                    advertised,
                    &tool.description,
                    tool.input_schema.clone(),
                ));
            }
        }
        tools
    }

    async fn execute(&self, call: ToolCall) -> ToolResult<String> {
        let route = self
            .route(&call.name)
            .await
            .ok_or_else(|| ToolError::ToolNotFound(call.name.clone()))?;

        self.client
            .transport(route.transport)
            .call_tool(&route.url, &route.tool, call.arguments)
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))
    }
}
