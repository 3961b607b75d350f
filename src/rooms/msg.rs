use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One chat frame, exchanged as a single JSON object per websocket frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub content: String,
    pub room_id: String,
    pub username: String,
}

impl Message {
    pub fn new(
        content: impl Into<String>,
        room_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            room_id: room_id.into(),
            username: username.into(),
        }
    }

    pub fn joined(room_id: &str, username: &str) -> Self {
        Self::new(format!("{username} has joined the room"), room_id, username)
    }

    pub fn left(room_id: &str, username: &str) -> Self {
        Self::new(format!("{username} has left the room"), room_id, username)
    }
}

/// Identity of one live connection. Cloned freely; the outbound channel
/// lives with the hub, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub conn_id: Uuid,
    pub id: String,
    pub username: String,
    pub room_id: String,
}

impl User {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Self {
        Self {
            conn_id: Uuid::now_v7(),
            id: id.into(),
            username: username.into(),
            room_id: room_id.into(),
        }
    }

    /// Stamps `content` with this user's room and name.
    pub fn say(&self, content: impl Into<String>) -> Message {
        Message::new(content, &self.room_id, &self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupantInfo {
    pub id: String,
    #[serde(rename = "name")]
    pub username: String,
}
