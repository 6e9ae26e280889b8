use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use courier::artifacts::ArtifactPayload;
use courier::errors::BrokerError;

fn into_download(payload: ArtifactPayload) -> Response {
    let disposition = payload.content_disposition();
    let content_type = HeaderValue::from_str(&payload.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let content_length = payload.content_length;

    let mut response = Body::from_stream(payload.body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    response
}

async fn file_by_id(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let caller = state.auth.authenticate(&headers).await?;
    tracing::debug!(file_id, key = %caller.key_hint, "artifact download");

    let payload = state.artifacts.resolve_by_id(&file_id).await?;
    Ok(into_download(payload))
}

async fn file_without_id(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.auth.authenticate(&headers).await?;
    Err(BrokerError::malformed("File id is required").into())
}

async fn thread_artifact(
    State(state): State<AppState>,
    Path((thread_id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let payload = state
        .artifacts
        .resolve_by_thread_and_name(&thread_id, &name)
        .await
        .map_err(|e| match e {
            BrokerError::NotFound(_) => e,
            other => {
                other.log();
                BrokerError::not_found(format!("Artifact '{}' could not be loaded", name))
            }
        })?;
    Ok(into_download(payload))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/artifacts/files/", get(file_without_id))
        .route("/artifacts/files/:file_id", get(file_by_id))
        .route("/artifacts/threads/:thread_id/:name", get(thread_artifact))
        .with_state(state)
}
