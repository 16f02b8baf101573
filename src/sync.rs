//! Turns push notifications into rate-limited history re-fetches.

use std::collections::HashSet;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::messages::PushEvent;

/// Re-fetches triggered by a burst of notifications wait this long after
/// the last one.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// The room is gone; the session must be destroyed now.
    Destroy,
}

/// Trailing debounce plus "new since last sync" tracking for one room.
///
/// The debounce is a single deadline that each notification pushes out, so
/// there is never more than one pending fetch. While a fetch is in flight a
/// due deadline is remembered and fired once the fetch lands.
#[derive(Debug)]
pub struct SyncCoordinator {
    window: Duration,
    deadline: Option<Instant>,
    in_flight: bool,
    refetch_pending: bool,
    seen: HashSet<String>,
}

impl Default for SyncCoordinator {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW)
    }
}

impl SyncCoordinator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            in_flight: false,
            refetch_pending: false,
            seen: HashSet::new(),
        }
    }

    pub fn on_push_event(&mut self, event: &PushEvent, now: Instant) -> Option<SyncSignal> {
        match event {
            PushEvent::MessageArrived { .. } => {
                self.deadline = Some(now + self.window);
                None
            }
            PushEvent::RoomDestroyed { .. } => {
                self.cancel();
                Some(SyncSignal::Destroy)
            }
        }
    }

    /// When the pending fetch should fire, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fetch as soon as possible, bypassing the debounce window.
    pub fn request_now(&mut self, now: Instant) {
        self.deadline = Some(now);
    }

    /// Returns `true` exactly once per elapsed deadline, when the caller
    /// should start a fetch.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                if self.in_flight {
                    debug!("fetch already in flight, queueing one more");
                    self.refetch_pending = true;
                    false
                } else {
                    self.in_flight = true;
                    true
                }
            }
            _ => false,
        }
    }

    /// Record a completed fetch and return the ids not present in the
    /// previous one. Position changes never make a message new.
    pub fn on_fetched<'a, I>(&mut self, ids: I, now: Instant) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.finish_fetch(now);

        let current: Vec<&str> = ids.into_iter().collect();
        let fresh = current
            .iter()
            .filter(|id| !self.seen.contains(**id))
            .map(|id| (*id).to_string())
            .collect();
        self.seen = current.into_iter().map(str::to_string).collect();
        fresh
    }

    /// A fetch failed; try again after `retry` unless something sooner is
    /// already scheduled.
    pub fn on_fetch_failed(&mut self, now: Instant, retry: Duration) {
        self.finish_fetch(now);
        if self.deadline.is_none() {
            self.deadline = Some(now + retry);
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
        self.refetch_pending = false;
    }

    fn finish_fetch(&mut self, now: Instant) {
        self.in_flight = false;
        if std::mem::take(&mut self.refetch_pending) && self.deadline.is_none() {
            self.deadline = Some(now);
        }
    }
}
