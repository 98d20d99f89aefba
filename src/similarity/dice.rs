//! Sørensen–Dice similarity kernel.

use rayon::prelude::*;

use crate::bitops::and_popcount;
use crate::candidate::{CandidateList, CandidatePair, Dataset};
use crate::error::Result;

use super::{precompute_popcounts, topk_threshold, validate_inputs, ROW_PARALLELIZATION_THRESHOLD};

/// For every record in dataset A, find the top-`k` records in dataset B
/// with Dice similarity `>= threshold`.
///
/// `Dice(A[i], B[j]) = 2 * popcount(A[i] AND B[j]) / (popcount(A[i]) +
/// popcount(B[j]))`. A row whose CLK has popcount 0 scores 0.0 against
/// every B record unless B's popcount is also 0 (handled by the same
/// zero-denominator guard, avoiding 0/0).
///
/// `k` defaults to `datasets[1].len()` (i.e. no truncation) when `None`.
pub fn dice(datasets: &[Dataset<'_>], threshold: f64, k: Option<usize>) -> Result<CandidateList> {
    let (a, b) = validate_inputs(datasets)?;
    let k = k.unwrap_or(b.len());
    let b_popcounts = precompute_popcounts(b);

    let pairs: Vec<CandidatePair> = if a.len() >= ROW_PARALLELIZATION_THRESHOLD {
        a.par_iter()
            .enumerate()
            .flat_map_iter(|(i, clk_a)| dice_row(i, clk_a, b, &b_popcounts, threshold, k))
            .collect()
    } else {
        a.iter()
            .enumerate()
            .flat_map(|(i, clk_a)| dice_row(i, clk_a, b, &b_popcounts, threshold, k))
            .collect()
    };

    let mut list = CandidateList::from_pairs(pairs);
    list.sort_and_dedup();
    Ok(list)
}

fn dice_row(
    i: usize,
    clk_a: &[u8],
    b: Dataset<'_>,
    b_popcounts: &[u32],
    threshold: f64,
    k: usize,
) -> Vec<CandidatePair> {
    let pop_a = crate::bitops::popcount(clk_a) as u32;
    let scores = b.iter().zip(b_popcounts.iter()).enumerate().map(|(j, (clk_b, &pop_b))| {
        let denom = pop_a + pop_b;
        let score = if denom == 0 {
            0.0
        } else {
            2.0 * and_popcount(clk_a, clk_b) as f64 / denom as f64
        };
        (j as u32, score)
    });
    topk_threshold(scores, k, threshold)
        .into_iter()
        .map(|(j, score)| CandidatePair::new(score, 0, 1, i as u32, j))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn perfect_match_two_records() {
        let a: &[u8] = &[0xFF, 0x00];
        let b: &[u8] = &[0xFF, 0x00];
        let ds_a: Dataset<'_> = &[a];
        let ds_b: Dataset<'_> = &[b];
        let result = dice(&[ds_a, ds_b], 0.5, None).unwrap();
        assert_eq!(result.len(), 1);
        let pair = result.get(0).unwrap();
        assert_eq!((pair.similarity, pair.dset_i0, pair.dset_i1, pair.rec_i0, pair.rec_i1), (1.0, 0, 1, 0, 0));
    }

    #[test]
    fn ties_break_by_index_in_output_order() {
        let x: &[u8] = &[0xAA, 0xAA];
        let ds_a: Dataset<'_> = &[x, x];
        let ds_b: Dataset<'_> = &[x, x];
        let result = dice(&[ds_a, ds_b], 0.5, None).unwrap();
        let pairs: Vec<_> = result.iter().map(|p| (p.rec_i0, p.rec_i1)).collect();
        assert_eq!(pairs, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn zero_popcount_row_scores_zero() {
        let zero: &[u8] = &[0x00; 4];
        let full: &[u8] = &[0xFF; 4];
        let ds_a: Dataset<'_> = &[zero];
        let ds_b: Dataset<'_> = &[full];
        let result = dice(&[ds_a, ds_b], 0.0, None).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(0).unwrap().similarity, 0.0);
    }

    #[test]
    fn top_k_truncation() {
        // Distinct similarities above threshold, want only the top 2 of 5.
        let a: &[u8] = &[0b1111_1111];
        let bs: [&[u8]; 5] = [
            &[0b1111_1111], // popcount 8, dice = 16/16 = 1.0
            &[0b1111_1110], // popcount 7, dice = 14/15
            &[0b1111_1100], // popcount 6, dice = 12/14
            &[0b1111_1000], // popcount 5, dice = 10/13
            &[0b1111_0000], // popcount 4, dice = 8/12
        ];
        let ds_a: Dataset<'_> = &[a];
        let ds_b: Dataset<'_> = &[bs[0], bs[1], bs[2], bs[3], bs[4]];
        let result = dice(&[ds_a, ds_b], 0.0, Some(2)).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(0).unwrap().rec_i1, 0);
        assert_eq!(result.get(1).unwrap().rec_i1, 1);
    }

    #[test]
    fn rejects_wrong_dataset_count() {
        let a: &[u8] = &[0xFF];
        let ds: Dataset<'_> = &[a];
        assert!(matches!(dice(&[ds], 0.5, None), Err(Error::NotEnoughDatasets { .. })));
        assert!(matches!(dice(&[ds, ds, ds], 0.5, None), Err(Error::TooManyDatasets { .. })));
    }
}
