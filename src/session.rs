//! Room session state machine.
//!
//! [`RoomSession`] holds no timers and performs no I/O. The runtime feeds it
//! ticks, poll results, push events and user requests, and carries out the
//! [`SessionAction`]s it returns.
//!
//! ```text
//! AcquiringKey ──► KeyMissing | KeyInvalid
//!      │
//!      ▼
//!    Active ──► Destroyed
//!      │
//!      └──────► Rejected (room not found / room full)
//! ```

use log::{debug, error, info, warn};

use crate::key::{KeyManager, RoomKey};
use crate::messages::{PushEvent, Redirect};
use crate::server::ServerError;
use crate::side_channel::KeyTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AcquiringKey,
    KeyMissing,
    KeyInvalid,
    Active,
    Destroyed,
    Rejected(Rejection),
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Phase::AcquiringKey | Phase::Active)
    }
}

/// Admission refusals reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RoomNotFound,
    RoomFull,
}

impl From<Rejection> for Redirect {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::RoomNotFound => Redirect::RoomNotFound,
            Rejection::RoomFull => Redirect::RoomFull,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Ask the server to delete the room. Fire and forget.
    DeleteRoom,
    /// Stop the countdown, polling and debounce timers.
    CancelTimers,
    Redirect(Redirect),
}

/// Identifies one issued TTL poll. Later tickets compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PollTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestroyCause {
    Expired,
    Remote,
    Requested,
}

#[derive(Debug)]
pub struct RoomSession {
    room_id: String,
    phase: Phase,
    key: Option<RoomKey>,
    ttl: Option<u64>,
    polls_issued: u64,
    poll_applied: u64,
}

impl RoomSession {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            phase: Phase::AcquiringKey,
            key: None,
            ttl: None,
            polls_issued: 0,
            poll_applied: 0,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn key(&self) -> Option<&RoomKey> {
        self.key.as_ref()
    }

    /// Seconds left as last reported by the server, counted down locally
    /// between polls. `None` until the first successful poll.
    pub fn ttl(&self) -> Option<u64> {
        self.ttl
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    /// Read the key from the side channel. Only meaningful while
    /// `AcquiringKey`; the key can never be replaced afterwards.
    pub fn acquire_key<T: KeyTransport>(&mut self, transport: &T) -> Vec<SessionAction> {
        if self.phase != Phase::AcquiringKey {
            warn!("Room {}: key already settled, ignoring side channel", self.room_id);
            return Vec::new();
        }

        let candidate = if T::MUST_NOT_BE_TRANSMITTED_TO_SERVER {
            transport.read()
        } else {
            error!("Room {}: key transport may leak to the server, refusing it", self.room_id);
            None
        };

        match candidate.as_deref().map(KeyManager::validate) {
            None => {
                info!("Room {}: no key in side channel", self.room_id);
                self.phase = Phase::KeyMissing;
                vec![SessionAction::Redirect(Redirect::MissingKey)]
            }
            Some(Err(_)) => {
                info!("Room {}: side channel key is malformed", self.room_id);
                self.phase = Phase::KeyInvalid;
                vec![SessionAction::Redirect(Redirect::InvalidKey)]
            }
            Some(Ok(key)) => {
                info!("Room {}: joined with key {}", self.room_id, key.fingerprint());
                self.key = Some(key);
                self.phase = Phase::Active;
                Vec::new()
            }
        }
    }

    pub fn on_admission_rejected(&mut self, rejection: Rejection) -> Vec<SessionAction> {
        if self.phase.is_terminal() {
            return Vec::new();
        }
        info!("Room {}: admission refused ({:?})", self.room_id, rejection);
        self.phase = Phase::Rejected(rejection);
        vec![
            SessionAction::CancelTimers,
            SessionAction::Redirect(rejection.into()),
        ]
    }

    /// One-second display countdown. Never destroys the room on its own;
    /// only the server's value is trusted for that.
    pub fn on_tick(&mut self) -> Vec<SessionAction> {
        if self.phase == Phase::Active {
            if let Some(ttl) = self.ttl.as_mut() {
                *ttl = ttl.saturating_sub(1);
            }
        }
        Vec::new()
    }

    /// Issue a ticket for a new TTL poll, or `None` if the session is no
    /// longer live.
    pub fn begin_poll(&mut self) -> Option<PollTicket> {
        if self.phase != Phase::Active {
            return None;
        }
        self.polls_issued += 1;
        Some(PollTicket(self.polls_issued))
    }

    /// Apply a poll result. Responses older than one already applied are
    /// dropped, and a failed poll leaves the local countdown running.
    pub fn on_poll_result(
        &mut self,
        ticket: PollTicket,
        result: Result<u64, ServerError>,
    ) -> Vec<SessionAction> {
        if self.phase != Phase::Active {
            return Vec::new();
        }

        match result {
            Ok(_) if ticket.0 <= self.poll_applied => {
                debug!(
                    "Room {}: dropping stale ttl response {} (applied {})",
                    self.room_id, ticket.0, self.poll_applied
                );
                Vec::new()
            }
            Ok(seconds) => {
                self.poll_applied = ticket.0;
                self.ttl = Some(seconds);
                if seconds == 0 {
                    self.destroy(DestroyCause::Expired)
                } else {
                    Vec::new()
                }
            }
            Err(e) => {
                warn!("Room {}: ttl poll failed: {}", self.room_id, e);
                Vec::new()
            }
        }
    }

    pub fn on_push_event(&mut self, event: &PushEvent) -> Vec<SessionAction> {
        match event {
            PushEvent::RoomDestroyed { room_id } if *room_id == self.room_id => {
                self.destroy(DestroyCause::Remote)
            }
            _ => Vec::new(),
        }
    }

    /// The user pressed "destroy now". The transition is optimistic: the
    /// delete request is issued but not awaited.
    pub fn on_destroy_requested(&mut self) -> Vec<SessionAction> {
        self.destroy(DestroyCause::Requested)
    }

    fn destroy(&mut self, cause: DestroyCause) -> Vec<SessionAction> {
        if self.phase != Phase::Active {
            debug!("Room {}: ignoring destroy ({:?}) in {:?}", self.room_id, cause, self.phase);
            return Vec::new();
        }

        info!("Room {}: destroyed ({:?})", self.room_id, cause);
        self.phase = Phase::Destroyed;
        self.ttl = Some(0);

        let mut actions = Vec::with_capacity(3);
        if cause == DestroyCause::Requested {
            actions.push(SessionAction::DeleteRoom);
        }
        actions.push(SessionAction::CancelTimers);
        actions.push(SessionAction::Redirect(Redirect::Destroyed));
        actions
    }
}

/// Renders a countdown as `m:ss`, or `--:--` before the first poll.
pub fn format_time_remaining(seconds: Option<u64>) -> String {
    match seconds {
        Some(seconds) => format!("{}:{:02}", seconds / 60, seconds % 60),
        None => "--:--".to_string(),
    }
}

/// Under a minute left.
pub fn is_urgent(seconds: Option<u64>) -> bool {
    matches!(seconds, Some(s) if s < 60)
}
