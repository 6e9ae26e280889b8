//! The tagged result shape returned by every boundary operation.
//!
//! Success serializes as `{"status": "OK", "response": ...}`, failures as
//! `{"status": "ERROR" | "UNAUTHORIZED" | "NOT_FOUND", "errors": [...]}` so
//! callers discriminate on `status` rather than on transport-level errors.
use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, BrokerResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Envelope<T> {
    #[serde(rename = "OK")]
    Ok { response: T },
    #[serde(rename = "ERROR")]
    Error { errors: Vec<EnvelopeError> },
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized { errors: Vec<EnvelopeError> },
    #[serde(rename = "NOT_FOUND")]
    NotFound { errors: Vec<EnvelopeError> },
}

impl<T> Envelope<T> {
    pub fn ok(response: T) -> Self {
        Envelope::Ok { response }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Ok { .. })
    }

    pub fn errors(&self) -> &[EnvelopeError] {
        match self {
            Envelope::Ok { .. } => &[],
            Envelope::Error { errors }
            | Envelope::Unauthorized { errors }
            | Envelope::NotFound { errors } => errors,
        }
    }

    /// HTTP-style status this envelope should be sent with
    pub fn status_code(&self) -> u16 {
        match self {
            Envelope::Ok { .. } => 200,
            Envelope::Unauthorized { .. } => 401,
            Envelope::NotFound { .. } => 404,
            Envelope::Error { errors } => {
                let code = errors.first().and_then(|e| e.code.as_deref());
                match code {
                    Some("malformed_request") => 400,
                    Some("discovery_unavailable") => 503,
                    _ => 500,
                }
            }
        }
    }
}

impl<T> From<BrokerError> for Envelope<T> {
    fn from(err: BrokerError) -> Self {
        err.log();
        let errors = vec![EnvelopeError {
            message: err.public_message(),
            code: Some(err.code().to_string()),
        }];
        match err {
            BrokerError::Unauthorized(_) => Envelope::Unauthorized { errors },
            BrokerError::NotFound(_) => Envelope::NotFound { errors },
            _ => Envelope::Error { errors },
        }
    }
}

impl<T> From<BrokerResult<T>> for Envelope<T> {
    fn from(result: BrokerResult<T>) -> Self {
        match result {
            Ok(response) => Envelope::ok(response),
            Err(err) => err.into(),
        }
    }
}
