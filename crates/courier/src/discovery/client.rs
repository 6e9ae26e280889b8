use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::mcp::{SseTransport, StreamableHttpTransport};
use super::transport::ToolTransport;
use super::{DiscoveryResult, FallbackPolicy, ToolDescriptor, TransportKind};
use crate::errors::{BrokerError, BrokerResult};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects to a tool provider and retrieves its catalog, primary transport first.
///
/// Holds no connection state: each `discover` call creates and drops its own
/// handles, so concurrent discoveries never interfere.
#[derive(Clone)]
pub struct DiscoveryClient {
    primary: Arc<dyn ToolTransport>,
    secondary: Arc<dyn ToolTransport>,
    policy: FallbackPolicy,
    timeout: Duration,
}

enum Attempt {
    Listed(Vec<ToolDescriptor>),
    Failed(anyhow::Error),
    TimedOut,
}

impl DiscoveryClient {
    pub fn new(primary: Arc<dyn ToolTransport>, secondary: Arc<dyn ToolTransport>) -> Self {
        Self {
            primary,
            secondary,
            policy: FallbackPolicy::default(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Streamable HTTP first, legacy SSE as the fallback
    pub fn mcp(connect_timeout: Duration) -> Result<Self> {
        Ok(Self::new(
            Arc::new(StreamableHttpTransport::new(connect_timeout)?),
            Arc::new(SseTransport::new(connect_timeout)?),
        )
        .with_timeout(connect_timeout))
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The transport of the given kind, for follow-up calls against a discovered provider
    pub fn transport(&self, kind: TransportKind) -> Arc<dyn ToolTransport> {
        if self.primary.kind() == kind {
            Arc::clone(&self.primary)
        } else {
            Arc::clone(&self.secondary)
        }
    }

    async fn attempt(&self, transport: &Arc<dyn ToolTransport>, url: &str) -> Attempt {
        match timeout(self.timeout, transport.list_tools(url)).await {
            Ok(Ok(tools)) => Attempt::Listed(tools),
            Ok(Err(e)) => Attempt::Failed(e),
            Err(_) => Attempt::TimedOut,
        }
    }

    /// All-or-nothing discovery against one URL
    pub async fn discover(&self, url: &str) -> BrokerResult<DiscoveryResult> {
        let primary_kind = self.primary.kind();
        let secondary_kind = self.secondary.kind();

        let primary_error = match self.attempt(&self.primary, url).await {
            Attempt::Listed(tools) => {
                info!(url, transport = %primary_kind, tools = tools.len(), "discovered tools");
                return Ok(DiscoveryResult {
                    transport: primary_kind,
                    tools,
                });
            }
            Attempt::Failed(e) => e,
            Attempt::TimedOut if self.policy == FallbackPolicy::SkipOnTimeout => {
                error!(url, transport = %primary_kind, "discovery timed out; not falling back");
                return Err(BrokerError::DiscoveryUnavailable(format!(
                    "{}: {} timed out after {:?}",
                    url, primary_kind, self.timeout
                )));
            }
            Attempt::TimedOut => anyhow!("timed out after {:?}", self.timeout),
        };

        warn!(
            url,
            transport = %primary_kind,
            error = %primary_error,
            "primary transport failed, falling back to {}",
            secondary_kind
        );

        let secondary_error = match self.attempt(&self.secondary, url).await {
            Attempt::Listed(tools) => {
                info!(
                    url,
                    transport = %secondary_kind,
                    tools = tools.len(),
                    "discovered tools after fallback"
                );
                return Ok(DiscoveryResult {
                    transport: secondary_kind,
                    tools,
                });
            }
            Attempt::Failed(e) => e,
            Attempt::TimedOut => anyhow!("timed out after {:?}", self.timeout),
        };

        error!(
            url,
            transport = %secondary_kind,
            error = %secondary_error,
            "secondary transport failed, no transports left"
        );
        Err(BrokerError::DiscoveryUnavailable(format!(
            "{}: {} failed ({}); {} failed ({})",
            url, primary_kind, primary_error, secondary_kind, secondary_error
        )))
    }
}
