//! Property-based tests for the codec, key validation, grouping and the
//! session state machine.

use std::time::Duration;

use matchstick::grouping::{group_within, Groupable};
use matchstick::session::SessionAction;
use matchstick::side_channel::KeyTransport;
use matchstick::{
    CryptoCodec, KeyManager, Opened, Phase, PushEvent, Redirect, RoomKey, RoomSession,
};
use proptest::prelude::*;

fn key_strategy() -> impl Strategy<Value = RoomKey> {
    prop::array::uniform32(any::<u8>())
        .prop_map(|bytes| hex::encode(bytes).parse::<RoomKey>().unwrap())
}

struct Given(String);

impl KeyTransport for Given {
    const MUST_NOT_BE_TRANSMITTED_TO_SERVER: bool = true;

    fn read(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

fn active_session() -> RoomSession {
    let mut session = RoomSession::new("room");
    session.acquire_key(&Given("b2".repeat(32)));
    assert_eq!(session.phase(), Phase::Active);
    session
}

fn destroyed_redirects(actions: &[SessionAction]) -> usize {
    actions
        .iter()
        .filter(|action| **action == SessionAction::Redirect(Redirect::Destroyed))
        .count()
}

#[derive(Debug, Clone)]
struct Line {
    sender: String,
    at: i64,
}

impl Groupable for Line {
    fn sender(&self) -> &str {
        &self.sender
    }

    fn timestamp_ms(&self) -> i64 {
        self.at
    }
}

proptest! {
    #[test]
    fn sealed_text_opens_under_its_key(key in key_strategy(), text in ".*") {
        let codec = CryptoCodec::default();
        let wire = codec.outgoing(&text, Some(&key)).unwrap();
        prop_assert_eq!(codec.open(&wire, Some(&key)), Opened::Plaintext(text));
    }

    #[test]
    fn sealed_text_does_not_open_under_another_key(
        key in key_strategy(),
        other in key_strategy(),
        text in ".{0,64}",
    ) {
        prop_assume!(key != other);
        let codec = CryptoCodec::default();
        let wire = codec.outgoing(&text, Some(&key)).unwrap();
        prop_assert_eq!(codec.open(&wire, Some(&other)), Opened::DecryptionFailed);
    }

    #[test]
    fn arbitrary_text_never_panics_when_opened(key in key_strategy(), text in ".*") {
        let opened = CryptoCodec::default().open(&text, Some(&key));
        prop_assert!(matches!(opened, Opened::DecryptionFailed | Opened::Plaintext(_)));
    }

    #[test]
    fn any_64_hex_digits_is_a_valid_key(candidate in "[0-9a-fA-F]{64}") {
        let key = KeyManager::validate(&candidate).unwrap();
        prop_assert_eq!(key.to_hex(), candidate.to_ascii_lowercase());
    }

    #[test]
    fn wrong_length_keys_are_rejected(candidate in "[0-9a-f]{0,128}") {
        prop_assume!(candidate.len() != 64);
        prop_assert!(KeyManager::validate(&candidate).is_err());
    }

    #[test]
    fn grouping_starts_a_block_on_every_sender_change(
        lines in prop::collection::vec(("[ab]", 0i64..10_000), 0..40),
    ) {
        let lines: Vec<Line> = lines
            .into_iter()
            .scan(0i64, |clock, (sender, step)| {
                *clock += step;
                Some(Line { sender, at: *clock })
            })
            .collect();
        let grouped = group_within(lines.clone(), Duration::from_secs(300));

        prop_assert_eq!(grouped.len(), lines.len());
        if let Some(first) = grouped.first() {
            prop_assert!(first.is_first_in_group);
        }
        for pair in grouped.windows(2) {
            if pair[0].message.sender != pair[1].message.sender {
                prop_assert!(pair[1].is_first_in_group);
            }
        }
    }

    #[test]
    fn polls_in_any_order_destroy_at_most_once(
        order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle(),
        values in prop::collection::vec(0u64..4, 8),
    ) {
        let mut session = active_session();
        let tickets: Vec<_> = (0..8).map(|_| session.begin_poll().unwrap()).collect();

        let mut redirects = 0;
        let mut newest: Option<usize> = None;
        let mut expected_ttl = None;
        let mut expect_destroyed = false;
        for index in order {
            let actions = session.on_poll_result(tickets[index], Ok(values[index]));
            redirects += destroyed_redirects(&actions);

            if !expect_destroyed && newest.map_or(true, |last| index > last) {
                newest = Some(index);
                expected_ttl = Some(values[index]);
                expect_destroyed = values[index] == 0;
            }
        }

        prop_assert!(redirects <= 1);
        prop_assert_eq!(redirects == 1, expect_destroyed);
        prop_assert_eq!(session.ttl(), expected_ttl);
        if expect_destroyed {
            prop_assert_eq!(session.phase(), Phase::Destroyed);
            prop_assert!(session.begin_poll().is_none());
        }
    }

    #[test]
    fn destroyed_session_ignores_everything(events in prop::collection::vec(0u8..4, 0..20)) {
        let mut session = active_session();
        let first = session.on_destroy_requested();
        prop_assert_eq!(destroyed_redirects(&first), 1);

        for event in events {
            let actions = match event {
                0 => session.on_tick(),
                1 => session.on_destroy_requested(),
                2 => session.on_push_event(&PushEvent::RoomDestroyed { room_id: "room".into() }),
                _ => session.acquire_key(&Given("c3".repeat(32))),
            };
            prop_assert!(actions.is_empty());
            prop_assert_eq!(session.phase(), Phase::Destroyed);
            prop_assert_eq!(session.ttl(), Some(0));
        }
    }
}
