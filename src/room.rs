use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::messages::{ChatMessage, PushEvent};
use crate::server::{PushStream, ServerError};

/// Server-side record of one room in [`crate::server::MemoryRoomServer`].
#[derive(Debug)]
pub struct Room {
    pub id: String,
    expires_at: Instant,
    capacity: usize,
    participants: HashSet<String>,
    messages: Vec<ChatMessage>,
    subscribers: Vec<mpsc::UnboundedSender<PushEvent>>,
}

impl Room {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Room {
            id: Uuid::new_v4().to_string(),
            expires_at: Instant::now() + ttl,
            capacity,
            participants: HashSet::new(),
            messages: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Admit a participant. Re-joining with a known token always succeeds.
    pub fn add_participant(&mut self, token: &str) -> Result<(), ServerError> {
        if self.participants.contains(token) {
            return Ok(());
        }
        if self.participants.len() >= self.capacity {
            return Err(ServerError::RoomFull);
        }
        self.participants.insert(token.to_string());
        Ok(())
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds left, rounded up so that 0 means expired.
    pub fn remaining_secs(&self, now: Instant) -> u64 {
        let remaining = self.expires_at.saturating_duration_since(now);
        let millis = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
        millis.div_ceil(1_000)
    }

    pub fn push_message(&mut self, sender: &str, text: &str) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: epoch_millis(),
            room_id: self.id.clone(),
        };
        self.messages.push(message.clone());
        message
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn subscribe(&mut self) -> PushStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Fan an event out to every live subscriber, dropping closed ones.
    pub fn broadcast(&mut self, event: &PushEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
