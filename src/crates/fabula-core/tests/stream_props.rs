//! Property tests for record streams: seq monotonicity and section
//! partitioning.

use proptest::prelude::*;
use serde_json::Value;

use fabula_core::record::{Record, StreamRegistry};

fn record_strategy() -> impl Strategy<Value = Record> {
    ("[a-z]{3,8}", prop_oneof![Just("fragment"), Just("patch"), Just("audit")]).prop_map(
        |(label, rtype)| Record::new(rtype, Value::Null).labeled(label),
    )
}

proptest! {
    #[test]
    fn seqs_are_strictly_monotonic(records in proptest::collection::vec(record_strategy(), 0..30)) {
        let mut stream = StreamRegistry::new();
        for record in records {
            stream.add_record(record);
        }
        let seqs: Vec<u64> = stream.records().iter().map(|r| r.seq).collect();
        for pair in seqs.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
        prop_assert_eq!(stream.max_seq(), seqs.last().copied());
    }

    #[test]
    fn sections_partition_the_stream(
        blocks in proptest::collection::vec(proptest::collection::vec(record_strategy(), 1..5), 1..6)
    ) {
        let mut stream = StreamRegistry::new();
        let mut expected = Vec::new();
        for (i, block) in blocks.into_iter().enumerate() {
            let marker = format!("block-{i}");
            expected.push((marker.clone(), block.len()));
            stream.push_records(block, &marker).unwrap();
        }

        // Every record lands in exactly one section, in order.
        let mut total = 0;
        for (marker, len) in &expected {
            let section: Vec<u64> = stream
                .get_section(marker)
                .unwrap()
                .map(|r| r.seq)
                .collect();
            prop_assert_eq!(section.len(), *len);
            for pair in section.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
            total += len;
        }
        prop_assert_eq!(total, stream.len());
    }

    #[test]
    fn channel_views_are_subsequences(records in proptest::collection::vec(record_strategy(), 0..30)) {
        let mut stream = StreamRegistry::new();
        for record in records {
            stream.add_record(record);
        }
        let fragments: Vec<u64> = stream.iter_channel("fragment").map(|r| r.seq).collect();
        for pair in fragments.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
        match stream.last(Some("fragment")) {
            Some(last) => prop_assert_eq!(Some(last.seq), fragments.last().copied()),
            None => prop_assert!(fragments.is_empty()),
        }
    }
}
