use axum::{
    debug_handler,
    extract::{ws::rejection::WebSocketUpgradeRejection, Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{config::ConnectionConfig, AppError, AppResult};

use super::{pump, HubHandle, Message, User};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JoinRoomQuery {
    #[serde(default)]
    room_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    username: String,
}

/// Holds a registration between `register` and the socket coming up. If it
/// is dropped while armed (handler cancelled, upgrade never completed) the
/// occupant is unregistered so the room does not keep a dead entry.
struct JoinGuard {
    pending: Option<(User, HubHandle)>,
}

impl JoinGuard {
    fn new(user: User, hub: HubHandle) -> Self {
        Self { pending: Some((user, hub)) }
    }

    fn disarm(&mut self) {
        self.pending = None;
    }
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        let Some((user, hub)) = self.pending.take() else {
            return;
        };
        debug!(room_id = %user.room_id, user_id = %user.id, "join abandoned, unregistering");
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if hub.unregister(user).await.is_err() {
                        debug!("hub gone before unregister");
                    }
                });
            }
            Err(_) => debug!("no runtime to unregister on"),
        }
    }
}

/// Registers before answering the upgrade so a bad room or a duplicate user
/// gets a plain HTTP error instead of a socket that never hears anything.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn join_room(
    Path(room_id): Path<String>,
    Query(query): Query<JoinRoomQuery>,
    State(hub): State<HubHandle>,
    State(config): State<ConnectionConfig>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    join(room_id, query, hub, config, ws).await
}

/// `/joinRoom` with no path segment; the room may still come as `?roomId=`.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn join_room_by_query(
    Query(query): Query<JoinRoomQuery>,
    State(hub): State<HubHandle>,
    State(config): State<ConnectionConfig>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    join(query.room_id.clone(), query, hub, config, ws).await
}

async fn join(
    room_id: String,
    JoinRoomQuery { user_id, username, .. }: JoinRoomQuery,
    hub: HubHandle,
    config: ConnectionConfig,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    for (field, value) in [("roomId", &room_id), ("userId", &user_id), ("username", &username)] {
        if value.is_empty() {
            return Err(AppError::BadRequest(format!("{field} is required")));
        }
    }

    let ws = ws?;
    let user = User::new(user_id, username, room_id);
    let outbound = hub.register(user.clone()).await?;
    let mut guard = JoinGuard::new(user.clone(), hub.clone());
    debug!(room_id = %user.room_id, user_id = %user.id, "joined");

    hub.broadcast(Message::joined(&user.room_id, &user.username))
        .await?;

    let (room_id, user_id) = (user.room_id.clone(), user.id.clone());
    let response = ws
        .on_failed_upgrade(move |err| {
            // the upgrade callback, and the guard with it, is dropped right after
            warn!(%err, %room_id, %user_id, "upgrade failed after registration");
        })
        .on_upgrade(move |socket| {
            guard.disarm();
            pump::serve(socket, user, outbound, hub, config)
        });

    Ok(response.into_response())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;
    use crate::test_helpers::test_app;

    async fn occupant_count_eventually(hub: &HubHandle, room_id: &str, expected: usize) {
        for _ in 0..100 {
            if hub.list_occupants(room_id).await.unwrap().len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{room_id} never had {expected} occupants");
    }

    #[tokio::test]
    async fn missing_identity_is_bad_request_and_registers_nobody() {
        let (app, hub) = test_app().await;
        hub.create_room("r1", "General").await.unwrap();

        for uri in [
            "/ws/joinRoom/r1?username=userA",
            "/ws/joinRoom/r1?userId=a",
            "/ws/joinRoom/r1?userId=&username=userA",
            "/ws/joinRoom/?userId=a&username=userA",
            "/ws/joinRoom?userId=a&username=userA",
        ] {
            let resp = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
        }

        assert!(hub.list_occupants("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn plain_http_request_fails_upgrade() {
        let (app, hub) = test_app().await;
        hub.create_room("r1", "General").await.unwrap();

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/ws/joinRoom/r1?userId=a&username=userA")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UPGRADE_REQUIRED);
        assert!(hub.list_occupants("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn room_id_may_come_from_the_query() {
        let (app, hub) = test_app().await;
        hub.create_room("r1", "General").await.unwrap();

        // reaches the upgrade step, so the room id was accepted
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/ws/joinRoom?roomId=r1&userId=a&username=userA")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn dropped_join_guard_unregisters() {
        let (_app, hub) = test_app().await;
        hub.create_room("r1", "General").await.unwrap();

        let user = User::new("a", "userA", "r1");
        let _rx = hub.register(user.clone()).await.unwrap();
        occupant_count_eventually(&hub, "r1", 1).await;

        drop(JoinGuard::new(user, hub.clone()));
        occupant_count_eventually(&hub, "r1", 0).await;

        // the id is free again
        let _rx = hub.register(User::new("a", "userA", "r1")).await.unwrap();
    }

    #[tokio::test]
    async fn disarmed_join_guard_keeps_the_occupant() {
        let (_app, hub) = test_app().await;
        hub.create_room("r1", "General").await.unwrap();

        let user = User::new("a", "userA", "r1");
        let _rx = hub.register(user.clone()).await.unwrap();

        let mut guard = JoinGuard::new(user, hub.clone());
        guard.disarm();
        drop(guard);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.list_occupants("r1").await.unwrap().len(), 1);
    }
}
