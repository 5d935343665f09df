//! Property-based test for chain validity (spec.md P3): for every root-log
//! prefix, the messages authored by one author satisfy
//! `sequence == 1, 2, 3, ...` with a matching `previous.hash` chain, under
//! each of the three wire formats.

use proptest::prelude::*;
use ssb_feed_core::codec;
use ssb_feed_core::{validate_next, AuthorKeyPair, Content, FeedAlgo, Message};

fn arb_algo() -> impl Strategy<Value = FeedAlgo> {
    prop_oneof![
        Just(FeedAlgo::LegacyEd25519),
        Just(FeedAlgo::ProtoEd25519),
        Just(FeedAlgo::CborEd25519),
    ]
}

fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,32}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chain_of_any_length_validates_sequentially(
        algo in arb_algo(),
        texts in prop::collection::vec(arb_text(), 1..12),
    ) {
        let kp = AuthorKeyPair::generate(algo);
        let mut previous = None;
        let mut previous_msg: Option<ssb_feed_core::StoredEnvelope> = None;

        for (i, text) in texts.iter().enumerate() {
            let seq = i as u64 + 1;
            let content = Content::Text(text.clone());
            let (envelope, msg_ref) =
                codec::encode(&kp, seq, previous, &content, 0, None).unwrap();

            prop_assert!(validate_next(
                previous_msg.as_ref().map(|m| m as &dyn Message),
                &envelope
            )
            .is_ok());

            prop_assert_eq!(envelope.sequence(), seq);
            prop_assert_eq!(envelope.author(), kp.feed_ref());
            previous = Some(msg_ref);
            previous_msg = Some(envelope);
        }
    }

    #[test]
    fn a_gap_in_sequence_is_rejected(
        algo in arb_algo(),
        gap in 2u64..6,
    ) {
        let kp = AuthorKeyPair::generate(algo);
        let (first, first_ref) =
            codec::encode(&kp, 1, None, &Content::Text("a".into()), 0, None).unwrap();
        let (second, _) =
            codec::encode(&kp, 1 + gap, Some(first_ref), &Content::Text("b".into()), 0, None).unwrap();

        let result = validate_next(Some(&first as &dyn Message), &second);
        prop_assert!(result.is_err());
    }
}
