use crate::error::EnvelopeResponse;
use crate::state::AppState;
use axum::{extract::State, routing::get, Router};
use courier::catalog::CatalogSummary;

async fn list_models(State(state): State<AppState>) -> EnvelopeResponse<CatalogSummary> {
    Ok(state.dispatcher.catalog().summary()).into()
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/models", get(list_models))
        .with_state(state)
}
