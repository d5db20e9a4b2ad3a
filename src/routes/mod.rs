//! Route modules for Sheets Sync Server

pub mod health;
pub mod sync;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full HTTP surface
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1/health", health::router())
        .nest("/api/v1/sync", sync::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
