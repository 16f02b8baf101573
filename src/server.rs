//! The room server contract and an in-memory implementation of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

use crate::messages::{ChatMessage, PushEvent};
use crate::room::Room;
use crate::session::Rejection;

/// Lifetime of a room created without an explicit TTL.
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(10 * 60);
/// Participants admitted per room.
pub const DEFAULT_ROOM_CAPACITY: usize = 2;

pub type PushStream = mpsc::UnboundedReceiver<PushEvent>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("Room not found")]
    RoomNotFound,
    #[error("Room is full")]
    RoomFull,
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ServerError {
    /// Admission errors that end the session; `None` for transient ones.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            ServerError::RoomNotFound => Some(Rejection::RoomNotFound),
            ServerError::RoomFull => Some(Rejection::RoomFull),
            ServerError::Transport(_) => None,
        }
    }
}

/// What the session needs from the server. The room key never crosses
/// this boundary; message `text` is already sealed.
#[async_trait]
pub trait RoomServer: Send + Sync {
    async fn create_room(&self, ttl: Option<Duration>) -> Result<String, ServerError>;

    /// Admission check. `participant` is an opaque per-session token.
    async fn join(&self, room_id: &str, participant: &str) -> Result<(), ServerError>;

    /// Whole seconds until the room is destroyed.
    async fn ttl(&self, room_id: &str) -> Result<u64, ServerError>;

    /// Every message in the room, oldest first.
    async fn messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, ServerError>;

    async fn post_message(
        &self,
        room_id: &str,
        sender: &str,
        text: &str,
    ) -> Result<ChatMessage, ServerError>;

    async fn delete_room(&self, room_id: &str) -> Result<(), ServerError>;

    async fn subscribe(&self, room_id: &str) -> Result<PushStream, ServerError>;
}

type Rooms = Arc<RwLock<HashMap<String, Room>>>;

/// Keeps rooms in process memory. Rooms past their deadline are removed
/// the next time they are touched, or by [`MemoryRoomServer::expire_due`].
#[derive(Clone)]
pub struct MemoryRoomServer {
    rooms: Rooms,
    capacity: usize,
}

impl Default for MemoryRoomServer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ROOM_CAPACITY)
    }
}

impl MemoryRoomServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MemoryRoomServer {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Remove every expired room, notifying its subscribers. Returns how
    /// many were removed.
    pub async fn expire_due(&self) -> usize {
        let now = Instant::now();
        let mut rooms = self.rooms.write().await;
        let expired: Vec<String> = rooms
            .values()
            .filter(|room| room.is_expired(now))
            .map(|room| room.id.clone())
            .collect();

        for room_id in &expired {
            if let Some(room) = rooms.remove(room_id) {
                Self::destroy(room);
            }
        }
        expired.len()
    }

    fn destroy(mut room: Room) {
        info!("Room {} destroyed", room.id);
        room.broadcast(&PushEvent::RoomDestroyed {
            room_id: room.id.clone(),
        });
    }

    /// Run `f` against a live room, expiring it first if its time is up.
    async fn with_room<T>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut Room) -> Result<T, ServerError>,
    ) -> Result<T, ServerError> {
        let mut rooms = self.rooms.write().await;
        let expired = match rooms.get(room_id) {
            None => return Err(ServerError::RoomNotFound),
            Some(room) => room.is_expired(Instant::now()),
        };
        if expired {
            if let Some(room) = rooms.remove(room_id) {
                Self::destroy(room);
            }
            return Err(ServerError::RoomNotFound);
        }

        match rooms.get_mut(room_id) {
            Some(room) => f(room),
            None => Err(ServerError::RoomNotFound),
        }
    }
}

#[async_trait]
impl RoomServer for MemoryRoomServer {
    async fn create_room(&self, ttl: Option<Duration>) -> Result<String, ServerError> {
        let room = Room::new(ttl.unwrap_or(DEFAULT_ROOM_TTL), self.capacity);
        let room_id = room.id.clone();

        let mut rooms = self.rooms.write().await;
        rooms.insert(room_id.clone(), room);
        info!("Room {} created", room_id);
        Ok(room_id)
    }

    async fn join(&self, room_id: &str, participant: &str) -> Result<(), ServerError> {
        self.with_room(room_id, |room| room.add_participant(participant))
            .await
    }

    async fn ttl(&self, room_id: &str) -> Result<u64, ServerError> {
        let now = Instant::now();
        let mut rooms = self.rooms.write().await;
        let room = rooms.get(room_id).ok_or(ServerError::RoomNotFound)?;
        let (expired, remaining) = (room.is_expired(now), room.remaining_secs(now));

        // a room that expires on this read answers zero once, then is gone
        if expired {
            if let Some(room) = rooms.remove(room_id) {
                Self::destroy(room);
            }
        }
        Ok(remaining)
    }

    async fn messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, ServerError> {
        self.with_room(room_id, |room| Ok(room.messages().to_vec()))
            .await
    }

    async fn post_message(
        &self,
        room_id: &str,
        sender: &str,
        text: &str,
    ) -> Result<ChatMessage, ServerError> {
        self.with_room(room_id, |room| {
            let message = room.push_message(sender, text);
            debug!("Room {}: message {} from {}", room.id, message.id, sender);
            room.broadcast(&PushEvent::MessageArrived {
                room_id: room.id.clone(),
            });
            Ok(message)
        })
        .await
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), ServerError> {
        let removed = self.rooms.write().await.remove(room_id);
        match removed {
            Some(room) => {
                Self::destroy(room);
                Ok(())
            }
            None => Err(ServerError::RoomNotFound),
        }
    }

    async fn subscribe(&self, room_id: &str) -> Result<PushStream, ServerError> {
        self.with_room(room_id, |room| Ok(room.subscribe())).await
    }
}
