//! Candidate aggregator: combine per-dataset-pair
//! similarity results across many datasets, optionally reduced by a
//! blocking oracle, into one globally-sorted, deduplicated, top-k-bounded
//! candidate stream.

use rustc_hash::FxHashMap;

use crate::blocking::{BlockId, BlockingOracle};
use crate::candidate::{CandidateList, CandidatePair, Dataset};
use crate::error::Result;

/// The contract a caller-supplied similarity kernel must honor:
/// given exactly two datasets, a threshold, and an optional top-k, return
/// a canonically-ordered, deduplicated candidate list tagging the two
/// input datasets as `0` and `1`. [`crate::similarity::dice`] and
/// [`crate::similarity::smc`] both satisfy this.
pub type SimilarityFn<'a> = dyn Fn(&[Dataset<'_>], f64, Option<usize>) -> Result<CandidateList> + Sync + 'a;

/// Iterate every unordered pair of datasets (restricted to pairs sharing a
/// block, if `blocking` is given), run `similarity_fn` on each pair's
/// sub-datasets, relabel local indices back to global ones, and merge
/// everything into one canonically-ordered, deduplicated, optionally
/// k-limited stream.
pub fn find_candidate_pairs(
    datasets: &[Dataset<'_>],
    similarity_fn: &SimilarityFn<'_>,
    threshold: f64,
    k: Option<usize>,
    blocking: Option<&BlockingOracle<'_>>,
) -> Result<CandidateList> {
    let groups = group_by_block(datasets, blocking);
    tracing::debug!(
        dataset_count = datasets.len(),
        block_count = groups.len(),
        blocked = blocking.is_some(),
        "aggregating candidates across blocks"
    );

    let mut merged = CandidateList::new();
    for members in groups.values() {
        let mut dataset_indices: Vec<u32> = members.keys().copied().collect();
        dataset_indices.sort_unstable();

        for (pos, &d0) in dataset_indices.iter().enumerate() {
            for &d1 in &dataset_indices[pos + 1..] {
                let idxs0 = &members[&d0];
                let idxs1 = &members[&d1];
                if idxs0.is_empty() || idxs1.is_empty() {
                    continue;
                }
                let sub_a: Vec<&[u8]> = idxs0.iter().map(|&i| datasets[d0 as usize][i as usize]).collect();
                let sub_b: Vec<&[u8]> = idxs1.iter().map(|&i| datasets[d1 as usize][i as usize]).collect();

                let local = similarity_fn(&[&sub_a[..], &sub_b[..]], threshold, k)?;
                for pair in local.iter() {
                    let global_i0 = idxs0[pair.rec_i0 as usize];
                    let global_i1 = idxs1[pair.rec_i1 as usize];
                    merged.push(CandidatePair::new(pair.similarity, d0, d1, global_i0, global_i1));
                }
            }
        }
    }

    merged.sort_and_dedup();

    if let Some(k) = k {
        merged = enforce_global_k(merged, k);
    }

    Ok(merged)
}

/// Group every `(dataset_index, record_index)` by block ID. With no
/// blocking oracle, synthesize a single universal block holding every
/// record of every dataset: the "no blocking" case is the degenerate
/// one-block case, not a separate code path.
fn group_by_block(
    datasets: &[Dataset<'_>],
    blocking: Option<&BlockingOracle<'_>>,
) -> FxHashMap<BlockId, FxHashMap<u32, Vec<u32>>> {
    let mut groups: FxHashMap<BlockId, FxHashMap<u32, Vec<u32>>> = FxHashMap::default();

    match blocking {
        None => {
            let mut universal: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
            for (d, dataset) in datasets.iter().enumerate() {
                universal.insert(d as u32, (0..dataset.len() as u32).collect());
            }
            groups.insert(BlockId::Int(0), universal);
        }
        Some(oracle) => {
            for (d, dataset) in datasets.iter().enumerate() {
                for (r, record) in dataset.iter().enumerate() {
                    for id in oracle(d as u32, r as u32, record) {
                        groups
                            .entry(id)
                            .or_default()
                            .entry(d as u32)
                            .or_default()
                            .push(r as u32);
                    }
                }
            }
        }
    }

    groups
}

/// Enforce a per-record-per-dataset-pair limit: iterating in
/// canonical order, accept a pair only if neither endpoint has already
/// accumulated `k` accepted pairs against the other dataset. Counts are
/// tracked in both orientations, `(d0, d1, rec_i1)` and `(d1, d0,
/// rec_i0)`, since dropping either direction changes
/// results for `k < m`.
fn enforce_global_k(list: CandidateList, k: usize) -> CandidateList {
    let mut counts: FxHashMap<(u32, u32, u32), usize> = FxHashMap::default();
    let mut out = CandidateList::with_capacity(list.len());

    for pair in list.iter() {
        let key0 = (pair.dset_i0, pair.dset_i1, pair.rec_i1);
        let key1 = (pair.dset_i1, pair.dset_i0, pair.rec_i0);
        let c0 = counts.get(&key0).copied().unwrap_or(0);
        let c1 = counts.get(&key1).copied().unwrap_or(0);
        if c0 < k && c1 < k {
            *counts.entry(key0).or_insert(0) += 1;
            *counts.entry(key1).or_insert(0) += 1;
            out.push(pair);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::dice;

    #[test]
    fn no_blocking_covers_all_pairs() {
        let a: &[u8] = &[0xFF, 0x00];
        let b: &[u8] = &[0xFF, 0x00];
        let ds_a: Dataset<'_> = &[a];
        let ds_b: Dataset<'_> = &[b];
        let result = find_candidate_pairs(&[ds_a, ds_b], &dice, 0.5, None, None).unwrap();
        assert_eq!(result.len(), 1);
        let pair = result.get(0).unwrap();
        assert_eq!((pair.dset_i0, pair.dset_i1, pair.rec_i0, pair.rec_i1), (0, 1, 0, 0));
    }

    #[test]
    fn blocking_skips_non_shared_blocks() {
        use crate::blocking::BlockId;

        let a0: &[u8] = &[0xFF, 0x00];
        let a1: &[u8] = &[0x00, 0xFF];
        let b0: &[u8] = &[0xFF, 0x00];
        let ds_a: Dataset<'_> = &[a0, a1];
        let ds_b: Dataset<'_> = &[b0];

        // dataset 0's blocks: record 0 -> block "x", record 1 -> block "y"
        // dataset 1's blocks: record 0 -> block "x"
        // so only (0,0) vs (1,0) can ever be compared.
        let oracle = move |d: u32, r: u32, _record: &[u8]| -> Vec<BlockId> {
            match (d, r) {
                (0, 0) => vec![BlockId::Bytes(b"x".to_vec())],
                (0, 1) => vec![BlockId::Bytes(b"y".to_vec())],
                (1, 0) => vec![BlockId::Bytes(b"x".to_vec())],
                _ => unreachable!(),
            }
        };

        let result = find_candidate_pairs(&[ds_a, ds_b], &dice, 0.0, None, Some(&oracle)).unwrap();
        assert_eq!(result.len(), 1);
        let pair = result.get(0).unwrap();
        assert_eq!((pair.rec_i0, pair.rec_i1), (0, 0));
    }

    #[test]
    fn global_k_limits_per_record_pairs() {
        // 1 record in A, 3 in B, all above threshold; global k=1 keeps only
        // the best match for the A record.
        let a: &[u8] = &[0b1111_1111];
        let b0: &[u8] = &[0b1111_1111];
        let b1: &[u8] = &[0b1111_1110];
        let b2: &[u8] = &[0b1111_1100];
        let ds_a: Dataset<'_> = &[a];
        let ds_b: Dataset<'_> = &[b0, b1, b2];
        let result = find_candidate_pairs(&[ds_a, ds_b], &dice, 0.0, Some(1), None).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(0).unwrap().rec_i1, 0);
    }
}
