use std::fmt;

use serde::{Deserialize, Serialize};

/// A message as stored by the server. `text` is an envelope, or raw text
/// when the sender never held a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushEvent {
    #[serde(rename = "message-arrived")]
    MessageArrived {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    #[serde(rename = "room-destroyed")]
    RoomDestroyed {
        #[serde(rename = "roomId")]
        room_id: String,
    },
}

impl PushEvent {
    pub fn room_id(&self) -> &str {
        match self {
            PushEvent::MessageArrived { room_id } | PushEvent::RoomDestroyed { room_id } => room_id,
        }
    }
}

/// Terminal outcomes handed back to the caller as a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Redirect {
    Destroyed,
    RoomNotFound,
    RoomFull,
    MissingKey,
    InvalidKey,
}

impl Redirect {
    pub fn query(self) -> &'static str {
        match self {
            Redirect::Destroyed => "destroyed=true",
            Redirect::RoomNotFound => "error=room-not-found",
            Redirect::RoomFull => "error=room-full",
            Redirect::MissingKey => "error=missing-key",
            Redirect::InvalidKey => "error=invalid-key",
        }
    }

    pub fn path(self) -> String {
        format!("/?{}", self.query())
    }
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query())
    }
}
