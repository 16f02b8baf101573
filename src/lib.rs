//! Ephemeral, end-to-end encrypted two-party chat rooms.
//!
//! The room key travels only in a side channel such as a link fragment.
//! The server stores and relays sealed envelopes, counts down each room's
//! lifetime and tells participants when the room is gone.

pub mod client;
pub mod config;
pub mod crypto;
pub mod grouping;
pub mod key;
pub mod messages;
pub mod names;
pub mod push;
pub mod room;
pub mod server;
pub mod session;
pub mod side_channel;
pub mod sync;

pub use client::{JoinError, MessageBody, OpenedMessage, RoomClient, RoomHandle, RoomUpdate};
pub use config::SessionConfig;
pub use crypto::{CryptoCodec, CryptoError, CryptoProvider, Envelope, Opened, OsCryptoProvider};
pub use key::{KeyError, KeyManager, RoomKey};
pub use messages::{ChatMessage, PushEvent, Redirect};
pub use server::{MemoryRoomServer, RoomServer, ServerError};
pub use session::{format_time_remaining, is_urgent, Phase, RoomSession};
pub use side_channel::{EnvKeyTransport, FileKeyTransport, KeyTransport, RoomLink};
