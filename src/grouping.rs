//! Display grouping of consecutive messages from the same sender.

use std::time::Duration;

use crate::messages::ChatMessage;

/// Messages closer together than this join the previous sender's block.
pub const GROUPING_WINDOW: Duration = Duration::from_secs(5 * 60);

pub trait Groupable {
    fn sender(&self) -> &str;
    /// Milliseconds since the Unix epoch.
    fn timestamp_ms(&self) -> i64;
}

impl Groupable for ChatMessage {
    fn sender(&self) -> &str {
        &self.sender
    }

    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouped<T> {
    pub message: T,
    pub is_first_in_group: bool,
}

pub fn group<T: Groupable>(messages: Vec<T>) -> Vec<Grouped<T>> {
    group_within(messages, GROUPING_WINDOW)
}

/// Flags each message that starts a new sender block. The input order is
/// trusted as chronological and never re-sorted.
pub fn group_within<T: Groupable>(messages: Vec<T>, window: Duration) -> Vec<Grouped<T>> {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    let mut grouped: Vec<Grouped<T>> = Vec::with_capacity(messages.len());

    for message in messages {
        let is_first_in_group = match grouped.last() {
            None => true,
            Some(prev) => {
                let gap = message
                    .timestamp_ms()
                    .saturating_sub(prev.message.timestamp_ms());
                prev.message.sender() != message.sender() || gap >= window_ms
            }
        };
        grouped.push(Grouped {
            message,
            is_first_in_group,
        });
    }

    grouped
}
