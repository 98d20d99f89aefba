//! Property-style invariants: round-trip serialization and
//! canonical-order preservation under arbitrary permutation of ties.

use proptest::prelude::*;

use anonlink::candidate::{CandidateList, CandidatePair};
use anonlink::serialize;

fn arb_pair() -> impl Strategy<Value = CandidatePair> {
    (0.0f64..=1.0, 0u32..4, 0u32..4, 0u32..64, 0u32..64).prop_map(|(sim, d0, d1, r0, r1)| {
        let (lo, hi) = if d0 <= d1 { (d0, d1 + 1) } else { (d1, d0 + 1) };
        CandidatePair::new(sim, lo, hi, r0, r1)
    })
}

fn arb_list(max_len: usize) -> impl Strategy<Value = CandidateList> {
    prop::collection::vec(arb_pair(), 0..max_len).prop_map(|mut pairs| {
        let mut list = CandidateList::from_pairs(pairs.drain(..));
        list.sort_and_dedup();
        list
    })
}

proptest! {
    /// `load(dump(C)) == C` for any canonical candidate list: `dump`
    /// always infers a width wide enough to hold every value it was
    /// actually given (full `f64` whenever not every similarity fits
    /// losslessly in `f32`), so the round trip is exact.
    #[test]
    fn round_trip_dump_load(list in arb_list(40)) {
        let mut buf = Vec::new();
        serialize::dump(&list, &mut buf).unwrap();
        let loaded = serialize::load(&buf[..]).unwrap();
        prop_assert_eq!(loaded, list);
    }

    /// Splitting a list into two and merging the serialized halves back
    /// together reproduces the sorted union of the two halves.
    #[test]
    fn merge_reproduces_sorted_union(
        a in arb_list(20),
        b in arb_list(20),
    ) {
        let mut buf_a = Vec::new();
        let mut buf_b = Vec::new();
        serialize::dump(&a, &mut buf_a).unwrap();
        serialize::dump(&b, &mut buf_b).unwrap();

        let mut merged_bytes = Vec::new();
        serialize::merge(vec![&buf_a[..], &buf_b[..]], &mut merged_bytes).unwrap();
        let merged = serialize::load(&merged_bytes[..]).unwrap();

        let mut expected = CandidateList::from_pairs(a.iter().chain(b.iter()));
        expected.sort_and_dedup();

        prop_assert_eq!(merged.len(), expected.len());
        for (m, e) in merged.iter().zip(expected.iter()) {
            prop_assert_eq!(m.dset_i0, e.dset_i0);
            prop_assert_eq!(m.dset_i1, e.dset_i1);
            prop_assert_eq!(m.rec_i0, e.rec_i0);
            prop_assert_eq!(m.rec_i1, e.rec_i1);
        }
    }

    /// `sort_and_dedup` produces the same canonical list regardless of
    /// the input order it started from: shuffling a canonical list's
    /// pairs and re-sorting must reproduce exactly what we started with.
    #[test]
    fn sort_and_dedup_is_order_independent(
        list in arb_list(30),
        shuffle_seed in any::<u64>(),
    ) {
        let mut pairs = list.clone().into_pairs();
        // Deterministic shuffle from the proptest-supplied seed (no
        // `rand`/`Math.random`-style ambient randomness needed here).
        let n = pairs.len();
        for i in (1..n).rev() {
            let j = (shuffle_seed.wrapping_add(i as u64).wrapping_mul(2654435761)) as usize % (i + 1);
            pairs.swap(i, j);
        }
        let mut reshuffled = CandidateList::from_pairs(pairs);
        reshuffled.sort_and_dedup();
        prop_assert_eq!(reshuffled, list);
    }
}
