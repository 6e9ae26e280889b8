use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message surfaced to callers in place of any internal fault detail.
pub const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

/// Failure kinds that may cross a public boundary of the broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Tool discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl BrokerError {
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        BrokerError::MalformedRequest(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        BrokerError::NotFound(message.into())
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        BrokerError::Unauthorized(message.into())
    }

    /// HTTP-style status code for this kind of failure
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::MalformedRequest(_) => 400,
            BrokerError::Unauthorized(_) => 401,
            BrokerError::NotFound(_) => 404,
            BrokerError::DiscoveryUnavailable(_) => 503,
            BrokerError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::MalformedRequest(_) => "malformed_request",
            BrokerError::Unauthorized(_) => "unauthorized",
            BrokerError::NotFound(_) => "not_found",
            BrokerError::DiscoveryUnavailable(_) => "discovery_unavailable",
            BrokerError::Internal(_) => "internal_fault",
        }
    }

    /// The message that may be shown to a caller. Internal faults never leak detail.
    pub fn public_message(&self) -> String {
        match self {
            BrokerError::MalformedRequest(msg) => format!("Malformed request: {}", msg),
            BrokerError::Unauthorized(msg) | BrokerError::NotFound(msg) => msg.clone(),
            BrokerError::DiscoveryUnavailable(_) => "Tool discovery unavailable".to_string(),
            BrokerError::Internal(_) => GENERIC_INTERNAL_MESSAGE.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, BrokerError::Internal(_))
    }

    /// Emit the full diagnostic for internal faults; other kinds are expected outcomes.
    pub fn log(&self) {
        match self {
            BrokerError::Internal(err) => {
                tracing::error!(error = ?err, "internal fault: {}", err);
            }
            BrokerError::DiscoveryUnavailable(msg) => {
                tracing::error!("tool discovery unavailable: {}", msg);
            }
            other => tracing::debug!("request rejected: {}", other),
        }
    }
}

impl From<anyhow::Error> for BrokerError {
    fn from(err: anyhow::Error) -> Self {
        BrokerError::Internal(err)
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors attached to individual tool requests and responses inside a conversation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

pub type ToolResult<T> = Result<T, ToolError>;
