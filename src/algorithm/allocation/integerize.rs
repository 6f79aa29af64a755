//! Integerization of continuous allocation weights

use std::cmp::Ordering;

/// Largest-remainder rounding
///
/// Every weight is rounded down, then the units still missing from
/// `round(sum of weights)` go one each to the weights with the largest
/// fractional parts (earlier samples win ties). Negative and non-finite
/// weights count as zero.
#[must_use]
pub fn largest_remainder(weights: &[f64]) -> Vec<u64> {
    let clean: Vec<f64> = weights
        .iter()
        .map(|w| if w.is_finite() { w.max(0.0) } else { 0.0 })
        .collect();
    let target = clean.iter().sum::<f64>().round() as u64;

    let mut counts: Vec<u64> = clean.iter().map(|w| w.floor() as u64).collect();
    let assigned: u64 = counts.iter().sum();
    let missing = usize::try_from(target.saturating_sub(assigned))
        .unwrap_or(usize::MAX)
        .min(counts.len());

    let mut by_remainder: Vec<usize> = (0..clean.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = clean[a] - clean[a].floor();
        let rb = clean[b] - clean[b].floor();
        rb.partial_cmp(&ra).unwrap_or(Ordering::Equal)
    });
    for &idx in by_remainder.iter().take(missing) {
        counts[idx] += 1;
    }
    counts
}
