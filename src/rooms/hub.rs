use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HubConfig;

use super::{
    msg::{Message, OccupantInfo, RoomInfo, User},
    room::{Occupant, Outbound, Room},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("room {0} already exists")]
    RoomExists(String),
    #[error("room {0} does not exist")]
    RoomNotFound(String),
    #[error("user {user_id} is already in room {room_id}")]
    AlreadyJoined { room_id: String, user_id: String },
    #[error("room hub is not running")]
    Closed,
}

struct Registration {
    user: User,
    outbound: Outbound,
    reply: oneshot::Sender<Result<(), HubError>>,
}

enum AdminCommand {
    CreateRoom {
        id: String,
        name: String,
        reply: oneshot::Sender<Result<RoomInfo, HubError>>,
    },
    ListRooms {
        reply: oneshot::Sender<Vec<RoomInfo>>,
    },
    ListOccupants {
        room_id: String,
        reply: oneshot::Sender<Vec<OccupantInfo>>,
    },
}

enum Event {
    Register(Registration),
    Unregister(User),
    Broadcast(Message),
    Admin(AdminCommand),
    Stop,
}

/// Owner of every room. All room state lives on the task running
/// [`Hub::run`]; everything else talks to it through a [`HubHandle`].
pub struct Hub {
    rooms: HashMap<String, Room>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<User>,
    broadcast_rx: mpsc::Receiver<Message>,
    admin_rx: mpsc::Receiver<AdminCommand>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<User>,
    broadcast_tx: mpsc::Sender<Message>,
    admin_tx: mpsc::Sender<AdminCommand>,
    outbound_capacity: usize,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(config: &HubConfig, shutdown: CancellationToken) -> (Hub, HubHandle) {
        let capacity = config.command_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (admin_tx, admin_rx) = mpsc::channel(capacity);

        let hub = Hub {
            rooms: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            admin_rx,
            shutdown: shutdown.clone(),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            admin_tx,
            outbound_capacity: config.outbound_capacity.max(1),
            shutdown,
        };
        (hub, handle)
    }

    pub fn spawn(config: &HubConfig, shutdown: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Hub::new(config, shutdown);
        (handle, tokio::spawn(hub.run()))
    }

    pub async fn run(mut self) {
        info!("room hub started");
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => Event::Stop,
                reg = self.register_rx.recv() => reg.map_or(Event::Stop, Event::Register),
                user = self.unregister_rx.recv() => user.map_or(Event::Stop, Event::Unregister),
                msg = self.broadcast_rx.recv() => msg.map_or(Event::Stop, Event::Broadcast),
                cmd = self.admin_rx.recv() => cmd.map_or(Event::Stop, Event::Admin),
            };

            match event {
                Event::Register(reg) => self.register(reg),
                Event::Unregister(user) => self.unregister(&user),
                Event::Broadcast(msg) => self.broadcast(msg),
                Event::Admin(cmd) => self.admin(cmd),
                Event::Stop => break,
            }
        }

        let occupants: usize = self.rooms.values().map(Room::len).sum();
        // dropping the rooms closes every outbound channel; writers then close their sockets
        self.rooms.clear();
        info!(occupants, "room hub stopped");
    }

    fn register(&mut self, Registration { user, outbound, reply }: Registration) {
        let result = match self.rooms.get_mut(&user.room_id) {
            None => Err(HubError::RoomNotFound(user.room_id.clone())),
            Some(room) => {
                if room.add_occupant(Occupant::new(user.clone(), outbound)) {
                    debug!(room_id = %user.room_id, user_id = %user.id, "registered");
                    Ok(())
                } else {
                    Err(HubError::AlreadyJoined {
                        room_id: user.room_id.clone(),
                        user_id: user.id.clone(),
                    })
                }
            }
        };

        if let Err(err) = &result {
            debug!(%err, "registration refused");
        }
        // the joiner is gone and nothing will ever drain this outbound channel
        if let Err(Ok(())) = reply.send(result) {
            debug!(room_id = %user.room_id, user_id = %user.id, "joiner went away, discarding");
            if let Some(room) = self.rooms.get_mut(&user.room_id) {
                room.discard_occupant(&user);
            }
        }
    }

    fn unregister(&mut self, user: &User) {
        let Some(room) = self.rooms.get_mut(&user.room_id) else {
            return;
        };
        if !room.is_occupied_by(user) {
            debug!(room_id = %user.room_id, user_id = %user.id, "unregister for absent handle ignored");
            return;
        }

        debug!(room_id = %user.room_id, user_id = %user.id, "unregistered");
        if let Some(notice) = room.remove_occupant(user) {
            self.broadcast(notice);
        }
    }

    fn broadcast(&mut self, message: Message) {
        let mut pending = VecDeque::from([message]);

        while let Some(message) = pending.pop_front() {
            let Some(room) = self.rooms.get_mut(&message.room_id) else {
                debug!(room_id = %message.room_id, "broadcast to unknown room dropped");
                continue;
            };

            let message = Arc::new(message);
            for user in room.fan_out(&message) {
                warn!(room_id = %user.room_id, user_id = %user.id, "occupant cannot keep up, dropping");
                if let Some(notice) = room.remove_occupant(&user) {
                    pending.push_back(notice);
                }
            }
        }
    }

    fn admin(&mut self, cmd: AdminCommand) {
        match cmd {
            AdminCommand::CreateRoom { id, name, reply } => {
                let result = if self.rooms.contains_key(&id) {
                    Err(HubError::RoomExists(id))
                } else {
                    let room = Room::new(id.clone(), name);
                    let info = room.info();
                    self.rooms.insert(id, room);
                    info!(room_id = %info.id, name = %info.name, "room created");
                    Ok(info)
                };
                let _ = reply.send(result);
            }
            AdminCommand::ListRooms { reply } => {
                let mut rooms: Vec<_> = self.rooms.values().map(Room::info).collect();
                rooms.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = reply.send(rooms);
            }
            AdminCommand::ListOccupants { room_id, reply } => {
                let occupants = self
                    .rooms
                    .get(&room_id)
                    .map(Room::occupant_infos)
                    .unwrap_or_default();
                let _ = reply.send(occupants);
            }
        }
    }
}

impl HubHandle {
    /// Adds `user` to its room and hands back the receiving end of its
    /// outbound channel.
    pub async fn register(&self, user: User) -> Result<mpsc::Receiver<Arc<Message>>, HubError> {
        let (outbound, rx) = mpsc::channel(self.outbound_capacity);
        let (reply, response) = oneshot::channel();
        self.register_tx
            .send(Registration { user, outbound, reply })
            .await
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)??;
        Ok(rx)
    }

    pub async fn unregister(&self, user: User) -> Result<(), HubError> {
        self.unregister_tx.send(user).await.map_err(|_| HubError::Closed)
    }

    pub async fn broadcast(&self, message: Message) -> Result<(), HubError> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| HubError::Closed)
    }

    pub async fn create_room(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<RoomInfo, HubError> {
        let (reply, response) = oneshot::channel();
        self.admin(AdminCommand::CreateRoom {
            id: id.into(),
            name: name.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| HubError::Closed)?
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomInfo>, HubError> {
        let (reply, response) = oneshot::channel();
        self.admin(AdminCommand::ListRooms { reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    pub async fn list_occupants(
        &self,
        room_id: impl Into<String>,
    ) -> Result<Vec<OccupantInfo>, HubError> {
        let (reply, response) = oneshot::channel();
        self.admin(AdminCommand::ListOccupants {
            room_id: room_id.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Stops the control loop; every room is dropped and every connection closed.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn admin(&self, cmd: AdminCommand) -> Result<(), HubError> {
        self.admin_tx.send(cmd).await.map_err(|_| HubError::Closed)
    }
}
