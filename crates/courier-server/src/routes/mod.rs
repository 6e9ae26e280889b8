pub mod artifacts;
pub mod chat;
pub mod models;
pub mod tools;

use crate::state::AppState;
use axum::Router;

pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(chat::routes(state.clone()))
        .merge(artifacts::routes(state.clone()))
        .merge(models::routes(state.clone()))
        .merge(tools::routes(state))
}
