pub mod appresult;
pub mod config;
pub mod rooms;

#[cfg(test)]
mod test_helpers;

use axum::{extract::FromRef, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use appresult::{AppError, AppResult};
use config::ConnectionConfig;
use rooms::HubHandle;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: HubHandle,
    pub connection: ConnectionConfig,
}

impl AppState {
    pub fn new(hub: HubHandle, connection: ConnectionConfig) -> Self {
        Self { hub, connection }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/ws", rooms::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // any origin may open a socket, same as the browser client expects
        .layer(CorsLayer::permissive())
}

async fn health() -> &'static str {
    "ok"
}
