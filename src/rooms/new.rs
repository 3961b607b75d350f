use axum::{
    debug_handler,
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::{AppError, AppResult};

use super::{HubHandle, RoomInfo};

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRoomRequest {
    id: String,
    #[serde(default)]
    name: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn create_room(
    State(hub): State<HubHandle>,
    payload: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<RoomInfo>)> {
    let Json(CreateRoomRequest { id, name }) =
        payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    if id.is_empty() {
        return Err(AppError::BadRequest("room id must not be empty".to_owned()));
    }

    let room = hub.create_room(id, name).await?;
    info!(room_id = %room.id, "created via api");

    Ok((StatusCode::CREATED, Json(room)))
}
