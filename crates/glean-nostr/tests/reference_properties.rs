//! Property tests for NIP-19 references and query keys.

use glean_nostr::{Coordinate, EventPointer, Reference, decode_npub, encode_npub};
use proptest::prelude::*;

fn hex_key() -> impl Strategy<Value = String> {
    prop::collection::vec(any::<u8>(), 32).prop_map(hex::encode)
}

fn identifier() -> impl Strategy<Value = String> {
    "[a-z0-9-]{0,24}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn naddr_decodes_to_its_query_key(
        kind in 30_000u16..40_000,
        pubkey in hex_key(),
        id in identifier(),
    ) {
        let coordinate = Coordinate::new(kind, pubkey, id);
        let naddr = coordinate.encode().unwrap();

        let reference = Reference::parse(&naddr).unwrap();
        prop_assert_eq!(reference.query_key(), coordinate.query_key());
        prop_assert_eq!(reference.tag_letter(), 'a');
    }

    #[test]
    fn query_key_parses_back(
        kind in 30_000u16..40_000,
        pubkey in hex_key(),
        id in identifier(),
    ) {
        let key = Coordinate::new(kind, pubkey, id).query_key();
        let parsed = Coordinate::from_query_key(&key).unwrap();
        prop_assert_eq!(parsed.query_key(), key);
    }

    #[test]
    fn nevent_decodes_to_the_event_id(id in hex_key()) {
        let pointer = EventPointer {
            id: id.clone(),
            author: None,
            kind: None,
            relays: vec!["wss://relay.example.com".to_string()],
        };
        let reference = Reference::parse(&pointer.encode().unwrap()).unwrap();
        prop_assert_eq!(reference, Reference::EventId(id));
    }

    #[test]
    fn npub_round_trips(pubkey in hex_key()) {
        let npub = encode_npub(&pubkey).unwrap();
        prop_assert_eq!(decode_npub(&npub).unwrap(), pubkey);
    }

    #[test]
    fn garbage_is_rejected(input in "[g-z]{1,40}") {
        prop_assert!(Reference::parse(&input).is_err());
    }
}

#[test]
fn test_truncated_naddr_is_rejected() {
    let coordinate = Coordinate::new(30023, "ab".repeat(32), "post");
    let naddr = coordinate.encode().unwrap();
    let truncated = &naddr[..naddr.len() - 6];

    let err = Reference::parse(truncated).unwrap_err();
    assert_eq!(err.input, truncated);
}

#[test]
fn test_nostr_uri_prefix_is_accepted() {
    let id = "cd".repeat(32);
    let reference = Reference::parse(&format!("nostr:{id}")).unwrap();
    assert_eq!(reference.query_key(), id);
}
