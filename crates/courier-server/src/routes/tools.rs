use crate::error::EnvelopeResponse;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use courier::discovery::{ToolExecutor, TransportKind};
use courier::envelope::Envelope;
use courier::models::tool::Tool;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolListing {
    tools: Vec<Tool>,
    transports: BTreeMap<String, TransportKind>,
}

async fn list_tools(State(state): State<AppState>) -> EnvelopeResponse<ToolListing> {
    Ok(ToolListing {
        tools: state.registry.tools().await,
        transports: state.registry.transports().await,
    })
    .into()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshAccepted {
    providers: usize,
}

async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    let providers = state.registry.providers().len();
    let registry = state.registry.clone();
    tokio::spawn(async move {
        let summary = registry.refresh().await;
        tracing::info!(
            available = summary.available.len(),
            unavailable = summary.unavailable.len(),
            "tool discovery refreshed"
        );
    });

    (
        StatusCode::ACCEPTED,
        Json(Envelope::ok(RefreshAccepted { providers })),
    )
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/refresh", post(refresh))
        .with_state(state)
}
