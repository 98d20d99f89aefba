//! The data model shared by every component: CLKs, datasets, candidate
//! pairs, and the canonical total order candidate lists are always kept
//! in.

use std::cmp::Ordering;

/// A single pre-encoded record fingerprint, as supplied by the caller.
/// All CLKs within one call share a bit length `L`, a positive multiple
/// of 8; this crate never constructs or inspects the bits beyond
/// counting them.
pub type Clk<'a> = &'a [u8];

/// An ordered, zero-indexed sequence of CLKs sharing one bit length.
pub type Dataset<'a> = &'a [Clk<'a>];

/// Uniquely identifies a record within a multi-dataset problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub dataset_index: u32,
    pub record_index: u32,
}

impl RecordId {
    #[must_use]
    pub fn new(dataset_index: u32, record_index: u32) -> Self {
        Self {
            dataset_index,
            record_index,
        }
    }
}

/// One candidate pair: a similarity score and the two records it scores.
///
/// The canonical convention is `dset_i0 < dset_i1`; use
/// [`CandidatePair::canonical`] to build one from two possibly-unordered
/// `(dataset, record)` endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePair {
    pub similarity: f64,
    pub dset_i0: u32,
    pub dset_i1: u32,
    pub rec_i0: u32,
    pub rec_i1: u32,
}

impl CandidatePair {
    /// Build a pair directly; `dset_i0` must already be `< dset_i1`.
    #[must_use]
    pub fn new(similarity: f64, dset_i0: u32, dset_i1: u32, rec_i0: u32, rec_i1: u32) -> Self {
        debug_assert!(dset_i0 < dset_i1, "candidate pairs must be canonically ordered");
        Self {
            similarity,
            dset_i0,
            dset_i1,
            rec_i0,
            rec_i1,
        }
    }

    /// Build a pair from two endpoints in either order, swapping as needed
    /// to restore the `dset_i0 < dset_i1` convention.
    #[must_use]
    pub fn canonical(similarity: f64, a: RecordId, b: RecordId) -> Self {
        debug_assert_ne!(a.dataset_index, b.dataset_index, "a candidate pair must span two datasets");
        if a.dataset_index < b.dataset_index {
            Self::new(similarity, a.dataset_index, b.dataset_index, a.record_index, b.record_index)
        } else {
            Self::new(similarity, b.dataset_index, a.dataset_index, b.record_index, a.record_index)
        }
    }

    #[must_use]
    pub fn endpoint0(&self) -> RecordId {
        RecordId::new(self.dset_i0, self.rec_i0)
    }

    #[must_use]
    pub fn endpoint1(&self) -> RecordId {
        RecordId::new(self.dset_i1, self.rec_i1)
    }
}

/// Total order over candidate pairs: decreasing similarity, then
/// increasing `(dset_i0, dset_i1, rec_i0, rec_i1)`.
#[must_use]
pub fn canonical_cmp(a: &CandidatePair, b: &CandidatePair) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.dset_i0.cmp(&b.dset_i0))
        .then_with(|| a.dset_i1.cmp(&b.dset_i1))
        .then_with(|| a.rec_i0.cmp(&b.rec_i0))
        .then_with(|| a.rec_i1.cmp(&b.rec_i1))
}

/// Five parallel arrays holding the fields of many candidate pairs, always
/// kept in [`canonical_cmp`] order with no duplicates once
/// [`CandidateList::sort_and_dedup`] has run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateList {
    pub similarities: Vec<f64>,
    pub dset_i0: Vec<u32>,
    pub dset_i1: Vec<u32>,
    pub rec_i0: Vec<u32>,
    pub rec_i1: Vec<u32>,
}

impl CandidateList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            similarities: Vec::with_capacity(n),
            dset_i0: Vec::with_capacity(n),
            dset_i1: Vec::with_capacity(n),
            rec_i0: Vec::with_capacity(n),
            rec_i1: Vec::with_capacity(n),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.similarities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.similarities.is_empty()
    }

    pub fn push(&mut self, pair: CandidatePair) {
        self.similarities.push(pair.similarity);
        self.dset_i0.push(pair.dset_i0);
        self.dset_i1.push(pair.dset_i1);
        self.rec_i0.push(pair.rec_i0);
        self.rec_i1.push(pair.rec_i1);
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<CandidatePair> {
        if i >= self.len() {
            return None;
        }
        Some(CandidatePair {
            similarity: self.similarities[i],
            dset_i0: self.dset_i0[i],
            dset_i1: self.dset_i1[i],
            rec_i0: self.rec_i0[i],
            rec_i1: self.rec_i1[i],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = CandidatePair> + '_ {
        (0..self.len()).map(move |i| self.get(i).unwrap())
    }

    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = CandidatePair>) -> Self {
        let mut list = Self::new();
        for p in pairs {
            list.push(p);
        }
        list
    }

    #[must_use]
    pub fn into_pairs(self) -> Vec<CandidatePair> {
        self.iter().collect()
    }

    /// Sort into canonical order, then drop exact duplicates.
    pub fn sort_and_dedup(&mut self) {
        let mut pairs = self.iter().collect::<Vec<_>>();
        pairs.sort_by(canonical_cmp);
        pairs.dedup_by(|a, b| {
            a.dset_i0 == b.dset_i0
                && a.dset_i1 == b.dset_i1
                && a.rec_i0 == b.rec_i0
                && a.rec_i1 == b.rec_i1
                && a.similarity == b.similarity
        });
        *self = Self::from_pairs(pairs);
    }

    /// `true` iff the list is already in canonical order.
    #[must_use]
    pub fn is_canonically_sorted(&self) -> bool {
        self.iter()
            .collect::<Vec<_>>()
            .windows(2)
            .all(|w| canonical_cmp(&w[0], &w[1]) != Ordering::Greater)
    }
}
