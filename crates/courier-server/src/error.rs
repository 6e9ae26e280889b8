use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier::envelope::Envelope;
use courier::errors::BrokerError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a dotted configuration key
pub fn to_env_var(field_path: &str) -> String {
    format!("COURIER_{}", field_path.replace('.', "__").to_uppercase())
}

/// A failed request, rendered as a plain-text body with its status
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        ApiError(err)
    }
}

fn status_of(err: &BrokerError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.0.log();
        (status_of(&self.0), self.0.public_message()).into_response()
    }
}

/// An [`Envelope`] sent as JSON with the status matching its outcome
pub struct EnvelopeResponse<T>(pub Envelope<T>);

impl<T> From<Result<T, BrokerError>> for EnvelopeResponse<T> {
    fn from(result: Result<T, BrokerError>) -> Self {
        EnvelopeResponse(Envelope::from(result))
    }
}

impl<T: Serialize> IntoResponse for EnvelopeResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}
