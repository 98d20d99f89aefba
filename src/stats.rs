//! Statistics helpers.
//!
//! Every function here is restricted to two-party (bipartite) candidate
//! lists, `dset_i0` identically `0` and `dset_i1` identically `1`, and
//! rejects anything else with [`Error::UnsupportedArity`] rather than
//! silently producing a meaningless answer.

use rustc_hash::FxHashSet;

use crate::candidate::CandidateList;
use crate::error::{Error, Result};
use crate::solving::{greedy_solve, pairs_from_groups};

fn check_bipartite(candidates: &CandidateList) -> Result<()> {
    let ok = candidates.dset_i0.iter().all(|&d| d == 0) && candidates.dset_i1.iter().all(|&d| d == 1);
    if ok {
        return Ok(());
    }
    let found = candidates
        .dset_i0
        .iter()
        .chain(candidates.dset_i1.iter())
        .copied()
        .max()
        .map_or(0, |m| m as usize + 1);
    Err(Error::UnsupportedArity { expected: 2, found })
}

/// Equal-width bin edges spanning the data's min/max, the way
/// `numpy.histogram_bin_edges` does: a degenerate (all-equal or empty)
/// range is widened by half a unit either side so every bin has nonzero
/// width.
fn histogram_bin_edges(values: &[f64], bins: usize) -> Vec<f64> {
    let (mut lo, mut hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        lo = 0.0;
        hi = 1.0;
    } else if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    (0..=bins).map(|i| lo + (hi - lo) * (i as f64) / (bins as f64)).collect()
}

fn bucket_index(value: f64, lo: f64, hi: f64, bins: usize) -> usize {
    if hi <= lo {
        return 0;
    }
    let width = (hi - lo) / bins as f64;
    let idx = ((value - lo) / width).floor();
    if idx < 0.0 {
        0
    } else {
        (idx as usize).min(bins - 1)
    }
}

/// An ordinary equal-width histogram of similarity values. The last bin
/// is closed on the right, matching `numpy.histogram`.
pub fn similarities_hist(candidates: &CandidateList, bins: usize) -> Result<(Vec<u64>, Vec<f64>)> {
    if bins == 0 {
        return Err(Error::InvalidParameter { name: "bins", reason: "must be positive".to_string() });
    }
    let edges = histogram_bin_edges(&candidates.similarities, bins);
    let (lo, hi) = (edges[0], edges[bins]);
    let mut counts = vec![0u64; bins];
    for &v in &candidates.similarities {
        counts[bucket_index(v, lo, hi, bins)] += 1;
    }
    Ok((counts, edges))
}

/// Walk `candidates` (assumed sorted by decreasing similarity) alongside
/// `steps + 1` descending threshold edges in one linear pass, classifying
/// each candidate as a match (neither endpoint claimed yet, under simple
/// greedy bipartite matching) or a nonmatch (an endpoint already taken),
/// bucketed by the threshold in force when it was seen. This mirrors
/// `greedy_solve`'s single-pass behavior for the pure two-party case,
/// without paying for general multiparty group bookkeeping.
fn semiopen_hist(candidates: &CandidateList, steps: usize) -> Result<(Vec<u64>, Vec<u64>, Vec<f64>)> {
    if steps == 0 {
        return Err(Error::InvalidParameter { name: "steps", reason: "must be positive".to_string() });
    }
    let edges = histogram_bin_edges(&candidates.similarities, steps);
    let mut num_matches = vec![0u64; steps + 1];
    let mut num_nonmatches = vec![0u64; steps + 1];

    if candidates.is_empty() {
        return Ok((num_matches, num_nonmatches, edges));
    }

    let mut matched0: FxHashSet<u32> = FxHashSet::default();
    let mut matched1: FxHashSet<u32> = FxHashSet::default();

    let mut threshold_idx = edges.len() - 1;
    for pair in candidates.iter() {
        while threshold_idx > 0 && pair.similarity < edges[threshold_idx] {
            threshold_idx -= 1;
        }
        if !matched0.contains(&pair.rec_i0) && !matched1.contains(&pair.rec_i1) {
            matched0.insert(pair.rec_i0);
            matched1.insert(pair.rec_i1);
            num_matches[threshold_idx] += 1;
        } else {
            num_nonmatches[threshold_idx] += 1;
        }
    }
    Ok((num_matches, num_nonmatches, edges))
}

/// For each of `bins` equal-width similarity buckets, classify every
/// candidate as a match or a nonmatch under greedy bipartite matching.
/// The phantom top bin produced by the underlying digitization (holding
/// only candidates exactly at the maximum similarity) is folded into the
/// last real bin, matching `numpy.histogram`'s closed-right last bin.
pub fn matches_nonmatches_hist(candidates: &CandidateList, bins: usize) -> Result<(Vec<u64>, Vec<u64>, Vec<f64>)> {
    check_bipartite(candidates)?;
    let (mut num_matches, mut num_nonmatches, edges) = semiopen_hist(candidates, bins)?;
    let last = num_matches.len() - 1;
    num_matches[last - 1] += num_matches[last];
    num_matches.truncate(last);
    num_nonmatches[last - 1] += num_nonmatches[last];
    num_nonmatches.truncate(last);
    Ok((num_matches, num_nonmatches, edges))
}

/// The number of matches that survive a hypothetical similarity
/// threshold, computed cumulatively from high to low similarity in one
/// pass. Returns `(counts, thresholds)`, both length `steps + 1`: `counts[i]`
/// is the number of matches with a bucket threshold `>= thresholds[i]`.
pub fn cumul_number_matches_vs_threshold(candidates: &CandidateList, steps: usize) -> Result<(Vec<u64>, Vec<f64>)> {
    check_bipartite(candidates)?;
    let (mut cumulative, _, edges) = semiopen_hist(candidates, steps)?;
    let mut running = 0u64;
    for count in cumulative.iter_mut().rev() {
        running += *count;
        *count = running;
    }
    Ok((cumulative, edges))
}

/// The 0-based index, in `candidates`' own order, of the `n`-th candidate
/// (1-indexed `n`) whose `(rec_i0, rec_i1)` pair is absent from
/// `pairs_from_groups(greedy_solve(candidates))`. Raises
/// [`Error::TooFewNonmatches`] if fewer than `n` such candidates exist.
pub fn nonmatch_index_score(candidates: &CandidateList, n: usize) -> Result<usize> {
    check_bipartite(candidates)?;
    if n == 0 {
        return Err(Error::InvalidParameter { name: "n", reason: "must be positive".to_string() });
    }
    let groups = greedy_solve(candidates)?;
    let matched: FxHashSet<(u32, u32)> = pairs_from_groups(&groups)?.into_iter().collect();

    let mut seen = 0usize;
    for (i, pair) in candidates.iter().enumerate() {
        if !matched.contains(&(pair.rec_i0, pair.rec_i1)) {
            seen += 1;
            if seen == n {
                return Ok(i);
            }
        }
    }
    Err(Error::TooFewNonmatches { n, found: seen })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidatePair;

    fn bipartite(pairs: impl IntoIterator<Item = (f64, u32, u32)>) -> CandidateList {
        CandidateList::from_pairs(pairs.into_iter().map(|(sim, r0, r1)| CandidatePair::new(sim, 0, 1, r0, r1)))
    }

    #[test]
    fn rejects_non_bipartite_input() {
        let candidates = CandidateList::from_pairs([CandidatePair::new(1.0, 1, 2, 0, 0)]);
        assert!(matches!(matches_nonmatches_hist(&candidates, 10), Err(Error::UnsupportedArity { .. })));
        assert!(matches!(cumul_number_matches_vs_threshold(&candidates, 10), Err(Error::UnsupportedArity { .. })));
        assert!(matches!(nonmatch_index_score(&candidates, 1), Err(Error::UnsupportedArity { .. })));
    }

    #[test]
    fn similarities_hist_counts_all_values() {
        let candidates = bipartite([(0.1, 0, 0), (0.2, 0, 1), (0.9, 1, 0), (1.0, 1, 1)]);
        let (counts, edges) = similarities_hist(&candidates, 3).unwrap();
        assert_eq!(counts.iter().sum::<u64>(), 4);
        assert_eq!(edges.len(), 4);
        assert_eq!(edges[0], 0.1);
        assert_eq!(*edges.last().unwrap(), 1.0);
    }

    #[test]
    fn matches_nonmatches_hist_folds_last_bin_and_sums_to_total() {
        let candidates = bipartite([(1.0, 0, 0), (0.9, 0, 1), (0.8, 1, 0), (0.1, 2, 2)]);
        let (matches, nonmatches, edges) = matches_nonmatches_hist(&candidates, 4).unwrap();
        assert_eq!(matches.len(), 4);
        assert_eq!(nonmatches.len(), 4);
        assert_eq!(edges.len(), 5);
        let total: u64 = matches.iter().sum::<u64>() + nonmatches.iter().sum::<u64>();
        assert_eq!(total, 4);
        // rec_i0=0 and rec_i1=0 claimed by the top pair; rec_i0=0 reused by
        // the second pair makes it a nonmatch, as does rec_i1=0 in the third.
        assert_eq!(matches.iter().sum::<u64>(), 2); // (0,0) and (2,2)
    }

    #[test]
    fn cumul_number_matches_vs_threshold_is_non_increasing_with_threshold() {
        let candidates = bipartite([(1.0, 0, 0), (0.5, 1, 1), (0.1, 2, 2)]);
        let (cumulative, thresholds) = cumul_number_matches_vs_threshold(&candidates, 4).unwrap();
        assert_eq!(cumulative.len(), thresholds.len());
        // cumulative[i] counts matches at or above thresholds[i], so it can
        // only shrink (or hold steady) as the threshold rises with i.
        for window in cumulative.windows(2) {
            assert!(window[0] >= window[1]);
        }
        assert_eq!(cumulative[0], 3);
    }

    #[test]
    fn nonmatch_index_score_finds_nth_nonmatch() {
        // rec_i0 = 0 reused between the 1st and 2nd candidates: the 2nd is
        // the first nonmatch, at index 1.
        let candidates = bipartite([(1.0, 0, 0), (0.9, 0, 1), (0.5, 1, 2)]);
        assert_eq!(nonmatch_index_score(&candidates, 1).unwrap(), 1);
    }

    #[test]
    fn nonmatch_index_score_errors_when_exhausted() {
        let candidates = bipartite([(1.0, 0, 0), (0.5, 1, 1)]);
        assert!(matches!(nonmatch_index_score(&candidates, 1), Err(Error::TooFewNonmatches { .. })));
    }
}
