//! Similarity kernels: given two same-length-CLK
//! datasets, a threshold, and an optional top-k, produce a
//! [`CandidateList`](crate::candidate::CandidateList).
//!
//! [`dice`] and [`smc`] share everything except the per-pair score
//! function and the name of the metric; the shared machinery,
//! input validation, the row-parallel dispatch, and top-k-under-threshold
//! selection, lives in this module.

pub mod dice;
pub mod smc;

use std::cmp::Ordering;

use crate::candidate::Dataset;
use crate::error::{Error, Result};

pub use dice::dice;
pub use smc::smc;

/// Below this many rows in dataset A, the per-row work is done on the
/// calling thread; at or above it, rows are scored with `rayon`'s
/// `par_iter`. Coordination overhead only pays for itself once there's
/// enough row-independent work to spread across cores.
pub(crate) const ROW_PARALLELIZATION_THRESHOLD: usize = 250;

/// Validate that `datasets` has exactly two members and that every CLK in
/// both shares one bit length, itself a positive multiple of 8. Returns
/// `(A, B)` and the shared byte length.
pub(crate) fn validate_inputs<'a>(
    datasets: &[Dataset<'a>],
) -> Result<(Dataset<'a>, Dataset<'a>)> {
    if datasets.len() < 2 {
        return Err(Error::NotEnoughDatasets {
            found: datasets.len(),
        });
    }
    if datasets.len() > 2 {
        return Err(Error::TooManyDatasets {
            found: datasets.len(),
        });
    }
    let (a, b) = (datasets[0], datasets[1]);
    validate_clk_length(a, b)?;
    Ok((a, b))
}

fn validate_clk_length(a: Dataset<'_>, b: Dataset<'_>) -> Result<usize> {
    let mut byte_len: Option<usize> = None;
    for clk in a.iter().chain(b.iter()) {
        match byte_len {
            None => byte_len = Some(clk.len()),
            Some(expected) if expected != clk.len() => {
                return Err(Error::InconsistentLength {
                    expected: expected * 8,
                    found: clk.len() * 8,
                })
            }
            _ => {}
        }
    }
    let byte_len = byte_len.unwrap_or(0);
    if byte_len == 0 {
        return Err(Error::UnsupportedLength { bits: 0 });
    }
    Ok(byte_len)
}

/// For large B, flatten
/// into one contiguous buffer and popcount it in one pass via
/// [`crate::bitops::popcount_array`]; otherwise popcount each record
/// directly. Below this many records the per-record path is cheap enough
/// that flattening would just be wasted allocation.
pub(crate) const VECTORIZE_THRESHOLD: usize = 10_000;

pub(crate) fn precompute_popcounts(b: Dataset<'_>) -> Vec<u32> {
    if b.len() >= VECTORIZE_THRESHOLD {
        if let Some(first) = b.first() {
            let elem_size = first.len();
            let mut flat = Vec::with_capacity(elem_size * b.len());
            for clk in b {
                flat.extend_from_slice(clk);
            }
            if let Ok(counts) = crate::bitops::popcount_array(&flat, elem_size) {
                return counts;
            }
        }
    }
    b.iter().map(|clk| crate::bitops::popcount(clk) as u32).collect()
}

/// Keep the top `k` of `scores` that meet `threshold`, tie-breaking by
/// ascending record index, sorted descending by score.
///
/// Uses `select_nth_unstable_by` to partition in expected-linear time
/// before doing the (cheap, since it's bounded by `k`) final sort,
/// avoiding an `O(m log m)` sort of the whole row when only a handful of
/// results survive.
pub(crate) fn topk_threshold(
    scores: impl Iterator<Item = (u32, f64)>,
    k: usize,
    threshold: f64,
) -> Vec<(u32, f64)> {
    if k == 0 {
        return Vec::new();
    }
    let mut kept: Vec<(u32, f64)> = scores.filter(|&(_, s)| s >= threshold).collect();
    if kept.len() > k {
        kept.select_nth_unstable_by(k - 1, cmp_score_desc_index_asc);
        kept.truncate(k);
    }
    kept.sort_by(cmp_score_desc_index_asc);
    kept
}

fn cmp_score_desc_index_asc(a: &(u32, f64), b: &(u32, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topk_threshold_respects_k() {
        let scores = vec![(0u32, 0.5), (1, 0.9), (2, 0.7), (3, 0.95)];
        let top2 = topk_threshold(scores.into_iter(), 2, 0.0);
        assert_eq!(top2, vec![(3, 0.95), (1, 0.9)]);
    }

    #[test]
    fn topk_threshold_filters_below_threshold() {
        let scores = vec![(0u32, 0.2), (1, 0.6)];
        let kept = topk_threshold(scores.into_iter(), 10, 0.5);
        assert_eq!(kept, vec![(1, 0.6)]);
    }

    #[test]
    fn topk_threshold_ties_break_by_index() {
        let scores = vec![(2u32, 0.5), (0, 0.5), (1, 0.5)];
        let kept = topk_threshold(scores.into_iter(), 2, 0.0);
        assert_eq!(kept, vec![(0, 0.5), (1, 0.5)]);
    }

    #[test]
    fn validate_inputs_rejects_wrong_arity() {
        let a: Dataset<'_> = &[];
        assert!(validate_inputs(&[a]).is_err());
        assert!(validate_inputs(&[a, a, a]).is_err());
    }

    #[test]
    fn validate_inputs_rejects_inconsistent_length() {
        let clk16 = [0u8; 2];
        let clk32 = [0u8; 4];
        let a: Dataset<'_> = &[&clk16];
        let b: Dataset<'_> = &[&clk32];
        assert!(matches!(
            validate_inputs(&[a, b]),
            Err(Error::InconsistentLength { .. })
        ));
    }
}
