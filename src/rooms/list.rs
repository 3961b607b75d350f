use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};

use crate::AppResult;

use super::{HubHandle, OccupantInfo, RoomInfo};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_rooms(State(hub): State<HubHandle>) -> AppResult<Json<Vec<RoomInfo>>> {
    Ok(Json(hub.list_rooms().await?))
}

/// Unknown rooms list as empty.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_occupants(
    Path(room_id): Path<String>,
    State(hub): State<HubHandle>,
) -> AppResult<Json<Vec<OccupantInfo>>> {
    Ok(Json(hub.list_occupants(room_id).await?))
}
