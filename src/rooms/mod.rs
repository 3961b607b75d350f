mod hub;
mod list;
mod msg;
mod new;
mod pump;
mod room;
mod ws;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub use hub::{Hub, HubError, HubHandle};
pub use msg::{Message, OccupantInfo, RoomInfo, User};
pub use pump::serve;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/createRoom", post(new::create_room))
        .route("/joinRoom", get(ws::join_room_by_query))
        .route("/joinRoom/", get(ws::join_room_by_query))
        .route("/joinRoom/{room_id}", get(ws::join_room))
        .route("/getRooms", get(list::list_rooms))
        .route("/getClients/{room_id}", get(list::list_occupants))
}
