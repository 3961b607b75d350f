use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ConnectionConfig, HubConfig},
    rooms::{Hub, HubHandle},
    AppState,
};

/// Router over a freshly spawned hub. The handle is returned so tests can
/// seed rooms and inspect state directly.
pub async fn test_app() -> (Router, HubHandle) {
    let (hub, _task) = Hub::spawn(&HubConfig::default(), CancellationToken::new());
    let state = AppState::new(hub.clone(), ConnectionConfig::default());
    (crate::app(state), hub)
}
