//! Out-of-band carriers for the room key.
//!
//! The key never travels on the channel that carries ciphertext. In a
//! browser that channel is the URL fragment, which is never sent with
//! requests; elsewhere an environment variable or a key file stands in.

use std::path::PathBuf;

use log::warn;
use thiserror::Error;
use url::Url;

use crate::key::RoomKey;

/// Environment variable read by [`EnvKeyTransport::default`].
pub const ROOM_KEY_ENV: &str = "MATCHSTICK_ROOM_KEY";

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Invalid room link: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Room link has no /room/<id> path")]
    MissingRoomId,
    #[error("Base URL cannot carry a path")]
    CannotBeABase,
}

pub trait KeyTransport: Send + Sync {
    /// Whatever this transport carries must stay off the server channel.
    /// Sessions refuse keys from transports that do not promise this.
    const MUST_NOT_BE_TRANSMITTED_TO_SERVER: bool;

    /// The raw candidate key, or `None` when the carrier is empty.
    fn read(&self) -> Option<String>;
}

/// A shareable room URL: `<base>/room/<roomId>#<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLink {
    url: Url,
    room_id: String,
}

impl RoomLink {
    pub fn share(base: &str, room_id: &str, key: &RoomKey) -> Result<Self, LinkError> {
        let mut url = Url::parse(base)?;
        url.path_segments_mut()
            .map_err(|()| LinkError::CannotBeABase)?
            .pop_if_empty()
            .push("room")
            .push(room_id);
        url.set_query(None);
        url.set_fragment(Some(&key.to_hex()));

        Ok(Self {
            url,
            room_id: room_id.to_string(),
        })
    }

    pub fn parse(link: &str) -> Result<Self, LinkError> {
        let url = Url::parse(link)?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();
        let room_id = segments
            .windows(2)
            .rev()
            .find(|pair| pair[0] == "room" && !pair[1].is_empty())
            .map(|pair| pair[1].to_string())
            .ok_or(LinkError::MissingRoomId)?;

        Ok(Self { url, room_id })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The link with the fragment stripped: the only form that may be sent
    /// to a server.
    pub fn without_fragment(&self) -> Url {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl KeyTransport for RoomLink {
    const MUST_NOT_BE_TRANSMITTED_TO_SERVER: bool = true;

    fn read(&self) -> Option<String> {
        self.url
            .fragment()
            .filter(|fragment| !fragment.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone)]
pub struct EnvKeyTransport {
    var: String,
}

impl Default for EnvKeyTransport {
    fn default() -> Self {
        Self::new(ROOM_KEY_ENV)
    }
}

impl EnvKeyTransport {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl KeyTransport for EnvKeyTransport {
    const MUST_NOT_BE_TRANSMITTED_TO_SERVER: bool = true;

    fn read(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Reads the key from a local file, trimming surrounding whitespace.
#[derive(Debug, Clone)]
pub struct FileKeyTransport {
    path: PathBuf,
}

impl FileKeyTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeyTransport for FileKeyTransport {
    const MUST_NOT_BE_TRANSMITTED_TO_SERVER: bool = true;

    fn read(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Some(contents.trim().to_string()).filter(|key| !key.is_empty()),
            Err(e) => {
                warn!("Failed to read key file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}
