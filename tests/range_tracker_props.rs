use contract_sync::storage::covered_ranges::{normalize, record_covered, uncovered_ranges};
use contract_sync::CoveredRange;
use proptest::prelude::*;

const DOMAIN: u64 = 400;

fn arb_range() -> impl Strategy<Value = CoveredRange> {
    (0..DOMAIN, 0..40u64).prop_map(|(start, len)| CoveredRange::new(start, start + len))
}

fn arb_covered() -> impl Strategy<Value = Vec<CoveredRange>> {
    prop::collection::vec(arb_range(), 0..12).prop_map(normalize)
}

fn assert_normalized(ranges: &[CoveredRange]) {
    for pair in ranges.windows(2) {
        assert!(pair[0].start <= pair[0].end);
        assert!(
            pair[1].start > pair[0].end + 1,
            "ranges {:?} and {:?} overlap or touch",
            pair[0],
            pair[1]
        );
    }
}

proptest! {
    #[test]
    fn prop_uncovered_and_covered_partition_the_request(
        covered in arb_covered(),
        start in 0..DOMAIN,
        len in 0..120u64,
    ) {
        let end = start + len;
        let gaps = uncovered_ranges(&covered, start, end);
        assert_normalized(&gaps);

        let mut hits = vec![0u8; (end - start + 1) as usize];
        for gap in &gaps {
            prop_assert!(gap.start >= start && gap.end <= end);
            for block in gap.start..=gap.end {
                hits[(block - start) as usize] += 1;
            }
        }
        for range in &covered {
            let lo = range.start.max(start);
            let hi = range.end.min(end);
            for block in lo..=hi {
                if lo <= hi {
                    hits[(block - start) as usize] += 1;
                }
            }
        }
        prop_assert!(hits.iter().all(|h| *h == 1), "hits: {:?}", hits);
    }

    #[test]
    fn prop_record_covered_is_idempotent(covered in arb_covered(), range in arb_range()) {
        let once = record_covered(&covered, range);
        let twice = record_covered(&once, range);
        prop_assert_eq!(&once, &twice);
        assert_normalized(&once);
    }

    #[test]
    fn prop_recorded_range_is_no_longer_uncovered(covered in arb_covered(), range in arb_range()) {
        let next = record_covered(&covered, range);
        prop_assert!(uncovered_ranges(&next, range.start, range.end).is_empty());
    }
}
