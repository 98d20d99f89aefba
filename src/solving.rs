//! Greedy multiparty matching solver.
//!
//! Groups are identified by a stable integer handle (an index into an
//! internal slab), not by object identity: there is no equivalent of a
//! mutable list's `id()` to key on in Rust, so the handle takes its
//! place. `assignment` maps each endpoint to its current group handle;
//! `matchable_pairs` is a sparse counter of observed cross-group
//! candidate evidence, keyed by the unordered pair of handles.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::candidate::{CandidateList, CandidatePair, RecordId};
use crate::error::{Error, Result};

/// One inferred entity: the unordered set of records grouped together.
pub type Group = Vec<RecordId>;

const STRICT_MERGE_THRESHOLD: f64 = 1.0;

/// Strict transitive-closure matching: every candidate pair is treated as
/// certain evidence, and groups merge only when *all* cross-pairs between
/// them have been observed. Equivalent to
/// `probabilistic_greedy_solve(candidates, 1.0, false)`.
pub fn greedy_solve(candidates: &CandidateList) -> Result<Vec<Group>> {
    probabilistic_greedy_solve(candidates, STRICT_MERGE_THRESHOLD, false)
}

/// Walk `candidates` in the order given (canonical order, by convention,
/// though this function does not require it) and greedily merge endpoints
/// into groups:
///
/// - both endpoints already grouped, different groups: merge the two
///   groups iff the fraction of cross-pairs seen so far is at least
///   `merge_threshold`, and (if `deduplicated`) the merge would not put
///   two records from the same dataset in one group.
/// - one endpoint already grouped: extend that group with the new
///   endpoint under the same rule (a group of size 1 vs. the new
///   endpoint always has exactly one possible cross-pair).
/// - neither endpoint grouped: start a new group of two, unless
///   `deduplicated` and both endpoints come from the same dataset.
///
/// When two groups merge, the smaller one is always folded into the
/// larger one (its handle is retired) and its pending `matchable_pairs`
/// counters are folded in too.
pub fn probabilistic_greedy_solve(
    candidates: &CandidateList,
    merge_threshold: f64,
    deduplicated: bool,
) -> Result<Vec<Group>> {
    validate_shape(candidates)?;
    if !(0.0..=1.0).contains(&merge_threshold) {
        return Err(Error::InvalidParameter {
            name: "merge_threshold",
            reason: format!("must be in [0, 1], got {merge_threshold}"),
        });
    }

    let mut solver = Solver::new(deduplicated);
    for pair in candidates.iter() {
        solver.observe(pair, merge_threshold);
    }
    let groups = solver.into_groups();
    tracing::debug!(
        candidate_count = candidates.len(),
        group_count = groups.len(),
        merge_threshold,
        deduplicated,
        "greedy solve complete"
    );
    Ok(groups)
}

/// Map a two-party strict solution back to `(rec_i0, rec_i1)` pairs,
/// rejecting any group that is not exactly one record from dataset 0 and
/// one from dataset 1.
pub fn pairs_from_groups(groups: &[Group]) -> Result<Vec<(u32, u32)>> {
    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        if group.len() != 2 {
            return Err(Error::UnsupportedArity { expected: 2, found: group.len() });
        }
        let (a, b) = (group[0], group[1]);
        let (rec_i0, rec_i1) = match (a.dataset_index, b.dataset_index) {
            (0, 1) => (a.record_index, b.record_index),
            (1, 0) => (b.record_index, a.record_index),
            _ => {
                return Err(Error::InvalidCandidateShape {
                    reason: "group is not exactly one record from dataset 0 and one from dataset 1".to_string(),
                })
            }
        };
        out.push((rec_i0, rec_i1));
    }
    Ok(out)
}

fn validate_shape(candidates: &CandidateList) -> Result<()> {
    let n = candidates.similarities.len();
    if candidates.dset_i0.len() != n
        || candidates.dset_i1.len() != n
        || candidates.rec_i0.len() != n
        || candidates.rec_i1.len() != n
    {
        return Err(Error::InvalidCandidateShape {
            reason: "parallel candidate arrays have mismatched lengths".to_string(),
        });
    }
    Ok(())
}

type Handle = usize;

struct Solver {
    deduplicated: bool,
    groups: Vec<Option<Vec<RecordId>>>,
    assignment: FxHashMap<RecordId, Handle>,
    matchable_pairs: FxHashMap<(Handle, Handle), u32>,
}

impl Solver {
    fn new(deduplicated: bool) -> Self {
        Self {
            deduplicated,
            groups: Vec::new(),
            assignment: FxHashMap::default(),
            matchable_pairs: FxHashMap::default(),
        }
    }

    fn key(a: Handle, b: Handle) -> (Handle, Handle) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn new_group(&mut self, members: Vec<RecordId>) -> Handle {
        let handle = self.groups.len();
        for m in &members {
            self.assignment.insert(*m, handle);
        }
        self.groups.push(Some(members));
        handle
    }

    fn shares_a_dataset(a: &[RecordId], b: &[RecordId]) -> bool {
        let datasets: FxHashSet<u32> = a.iter().map(|r| r.dataset_index).collect();
        b.iter().any(|r| datasets.contains(&r.dataset_index))
    }

    fn observe(&mut self, pair: CandidatePair, merge_threshold: f64) {
        let e0 = pair.endpoint0();
        let e1 = pair.endpoint1();
        let h0 = self.assignment.get(&e0).copied();
        let h1 = self.assignment.get(&e1).copied();

        match (h0, h1) {
            (Some(g0), Some(g1)) if g0 != g1 => self.try_merge(g0, g1, merge_threshold),
            (Some(_), Some(_)) => {} // already in the same group
            (Some(g), None) => self.try_extend(g, e1, merge_threshold),
            (None, Some(g)) => self.try_extend(g, e0, merge_threshold),
            (None, None) => {
                if !(self.deduplicated && e0.dataset_index == e1.dataset_index) {
                    self.new_group(vec![e0, e1]);
                }
            }
        }
    }

    fn try_merge(&mut self, g0: Handle, g1: Handle, merge_threshold: f64) {
        let key = Self::key(g0, g1);
        let overlap = self.matchable_pairs.get(&key).copied().unwrap_or(0) + 1;
        let len0 = self.groups[g0].as_ref().unwrap().len();
        let len1 = self.groups[g1].as_ref().unwrap().len();
        let total = (len0 * len1) as f64;
        let duplicates_ok = !self.deduplicated
            || !Self::shares_a_dataset(self.groups[g0].as_ref().unwrap(), self.groups[g1].as_ref().unwrap());

        if f64::from(overlap) >= merge_threshold * total && duplicates_ok {
            tracing::trace!(g0, g1, overlap, total, "merging groups");
            self.merge_groups(g0, g1);
        } else {
            self.matchable_pairs.insert(key, overlap);
        }
    }

    fn try_extend(&mut self, g: Handle, new_endpoint: RecordId, merge_threshold: f64) {
        let members = self.groups[g].as_ref().unwrap();
        let total = members.len() as f64;
        let duplicates_ok =
            !self.deduplicated || !members.iter().any(|m| m.dataset_index == new_endpoint.dataset_index);

        if 1.0 >= merge_threshold * total && duplicates_ok {
            self.groups[g].as_mut().unwrap().push(new_endpoint);
            self.assignment.insert(new_endpoint, g);
        } else {
            let new_handle = self.new_group(vec![new_endpoint]);
            self.matchable_pairs.insert(Self::key(g, new_handle), 1);
        }
    }

    /// Fold `absorbed` into `survivor` (always the larger of the two, so
    /// the total work done across all merges stays near-linear), moving
    /// its members, its `assignment` entries, and its pending
    /// `matchable_pairs` counters with it.
    fn merge_groups(&mut self, g0: Handle, g1: Handle) {
        let (survivor, absorbed) = {
            let len0 = self.groups[g0].as_ref().unwrap().len();
            let len1 = self.groups[g1].as_ref().unwrap().len();
            if len0 >= len1 {
                (g0, g1)
            } else {
                (g1, g0)
            }
        };

        let absorbed_members = self.groups[absorbed].take().unwrap();
        for m in &absorbed_members {
            self.assignment.insert(*m, survivor);
        }
        self.groups[survivor].as_mut().unwrap().extend(absorbed_members);
        self.matchable_pairs.remove(&Self::key(survivor, absorbed));

        let absorbed_edges: Vec<(Handle, u32)> = self
            .matchable_pairs
            .keys()
            .filter_map(|&(a, b)| {
                if a == absorbed {
                    Some(b)
                } else if b == absorbed {
                    Some(a)
                } else {
                    None
                }
            })
            .map(|other| (other, self.matchable_pairs[&Self::key(absorbed, other)]))
            .collect();

        for (other, count) in absorbed_edges {
            self.matchable_pairs.remove(&Self::key(absorbed, other));
            if other != survivor {
                *self.matchable_pairs.entry(Self::key(survivor, other)).or_insert(0) += count;
            }
        }
    }

    fn into_groups(self) -> Vec<Vec<RecordId>> {
        self.groups.into_iter().flatten().filter(|g| g.len() >= 2).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(d: u32, r: u32) -> RecordId {
        RecordId::new(d, r)
    }

    #[test]
    fn two_record_perfect_match_forms_one_group() {
        let candidates = CandidateList::from_pairs([CandidatePair::new(1.0, 0, 1, 0, 0)]);
        let groups = greedy_solve(&candidates).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn three_party_transitive_merge_at_strict_threshold() {
        // a-b, b-c, a-c all observed: forms one group of three at threshold 1.0.
        let candidates = CandidateList::from_pairs([
            CandidatePair::new(1.0, 0, 1, 0, 0),
            CandidatePair::new(1.0, 1, 2, 0, 0),
            CandidatePair::new(1.0, 0, 2, 0, 0),
        ]);
        let groups = greedy_solve(&candidates).unwrap();
        assert_eq!(groups.len(), 1);
        let mut members = groups[0].clone();
        members.sort();
        assert_eq!(members, vec![rid(0, 0), rid(1, 0), rid(2, 0)]);
    }

    #[test]
    fn strict_threshold_withholds_merge_without_full_overlap() {
        // a-b and b-c observed, but not a-c: under threshold 1.0 the third
        // (implicit) pair is missing, so a stays separate from {b,c}.
        let candidates = CandidateList::from_pairs([
            CandidatePair::new(1.0, 0, 1, 0, 0),
            CandidatePair::new(1.0, 1, 2, 0, 0),
        ]);
        let groups = greedy_solve(&candidates).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    /// Two singleton-pair groups {a0,b0} and {a1,b1}, with 2 of their 4
    /// possible cross-pairs observed (a0-b1, a1-b0): 2/4 = 0.5 overlap.
    fn two_groups_half_overlapping() -> CandidateList {
        CandidateList::from_pairs([
            CandidatePair::new(0.9, 0, 1, 0, 0),
            CandidatePair::new(0.9, 0, 1, 1, 1),
            CandidatePair::new(0.8, 0, 1, 0, 1),
            CandidatePair::new(0.8, 0, 1, 1, 0),
        ])
    }

    #[test]
    fn probabilistic_merge_below_threshold_stays_separate() {
        let groups = probabilistic_greedy_solve(&two_groups_half_overlapping(), 0.76, false).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn probabilistic_merge_above_threshold_combines() {
        let groups = probabilistic_greedy_solve(&two_groups_half_overlapping(), 0.5, false).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 4);
    }

    #[test]
    fn deduplicated_rejects_same_dataset_merge() {
        // a0 (dataset0, rec0) and a1 (dataset0, rec1) both pair with b0
        // (dataset1, rec0): under dedup, a1 must not join a0's group even
        // though it's the only group with room. a1 instead settles with
        // b1, its only dataset-compatible partner.
        let candidates = CandidateList::from_pairs([
            CandidatePair::new(1.0, 0, 1, 0, 0), // a0 - b0
            CandidatePair::new(1.0, 0, 1, 1, 0), // a1 - b0 (blocked: a0 already claims dataset 0)
            CandidatePair::new(1.0, 0, 1, 1, 1), // a1 - b1
        ]);
        let groups = probabilistic_greedy_solve(&candidates, 1.0, true).unwrap();
        assert_eq!(groups.len(), 2);
        let mut sized: Vec<Vec<RecordId>> = groups;
        sized.sort_by_key(|g| g.iter().map(|r| r.record_index).min().unwrap());
        assert_eq!(sized[0], vec![rid(0, 0), rid(1, 0)]);
        assert_eq!(sized[1], vec![rid(0, 1), rid(1, 1)]);
    }

    #[test]
    fn rejects_invalid_merge_threshold() {
        let candidates = CandidateList::new();
        assert!(matches!(
            probabilistic_greedy_solve(&candidates, -0.1, false),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            probabilistic_greedy_solve(&candidates, 1.5, false),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn zero_merge_threshold_merges_on_any_evidence() {
        // Any single observed cross-pair is enough to merge at threshold 0.0,
        // even between two same-dataset pairs that a stricter threshold
        // would keep apart.
        let candidates = CandidateList::from_pairs([
            CandidatePair { similarity: 0.9, dset_i0: 0, dset_i1: 0, rec_i0: 0, rec_i1: 1 },
            CandidatePair { similarity: 0.8, dset_i0: 1, dset_i1: 1, rec_i0: 0, rec_i1: 1 },
            CandidatePair::new(0.7, 0, 1, 0, 0),
            CandidatePair::new(0.6, 0, 1, 0, 1),
            CandidatePair::new(0.5, 0, 1, 1, 0),
        ]);
        let groups = probabilistic_greedy_solve(&candidates, 0.0, false).unwrap();
        assert_eq!(groups.len(), 1);
        let mut members = groups[0].clone();
        members.sort();
        assert_eq!(members, vec![rid(0, 0), rid(0, 1), rid(1, 0), rid(1, 1)]);
    }

    #[test]
    fn pairs_from_groups_round_trips_two_party() {
        let candidates = CandidateList::from_pairs([
            CandidatePair::new(1.0, 0, 1, 3, 7),
            CandidatePair::new(1.0, 0, 1, 1, 2),
        ]);
        let groups = greedy_solve(&candidates).unwrap();
        let mut pairs = pairs_from_groups(&groups).unwrap();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(1, 2), (3, 7)]);
    }

    #[test]
    fn pairs_from_groups_rejects_non_pair_groups() {
        let groups = vec![vec![rid(0, 0), rid(1, 0), rid(2, 0)]];
        assert!(matches!(pairs_from_groups(&groups), Err(Error::UnsupportedArity { .. })));
    }
}
