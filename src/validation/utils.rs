//! Shared helpers for the validation subsystem (spec §4.7).

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Seed derivation for validation sub-methods: `(base + i * 9973) mod
/// 2_147_483_647` (spec §4.7).
pub fn sub_seed(base: u64, i: u64) -> u64 {
    (base + i * 9973) % 2_147_483_647
}

/// One-sided p-value with add-one smoothing, used consistently across
/// permutation/bootstrap/Monte-Carlo (spec §4.7).
pub fn one_sided_p_value(count_ge: u64, n: u64) -> f64 {
    (count_ge as f64 + 1.0) / (n as f64 + 1.0)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn population_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Sample (start, end) index pairs (end exclusive) covering at least
/// `n_obs` observations by repeatedly drawing a random start for a
/// fixed-size block.
pub fn sample_block_indices(n_obs: usize, block_size: usize, rng: &mut ChaCha8Rng) -> Vec<(usize, usize)> {
    if n_obs == 0 {
        return Vec::new();
    }
    let block_size = block_size.max(1);
    let mut blocks = Vec::new();
    let mut covered = 0usize;
    while covered < n_obs {
        let max_start = n_obs.saturating_sub(block_size).max(0) + 1;
        let start = rng.gen_range(0..max_start.max(1));
        let end = start + block_size;
        blocks.push((start, end));
        covered += block_size;
    }
    blocks
}

/// Concatenate sampled blocks of `arr`, clamping out-of-range block ends,
/// truncated to exactly `n_obs` values.
pub fn concat_blocks(arr: &[f64], blocks: &[(usize, usize)], n_obs: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(n_obs);
    for &(start, end) in blocks {
        let end = end.min(arr.len());
        if start >= end {
            continue;
        }
        out.extend_from_slice(&arr[start..end]);
        if out.len() >= n_obs {
            break;
        }
    }
    out.truncate(n_obs);
    out
}

/// Sample quantile via linear interpolation between order statistics
/// (matches `numpy.quantile`'s default `linear` method).
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let frac = pos - lower as f64;
    sorted[lower] * (1.0 - frac) + sorted[upper] * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn sub_seed_matches_formula() {
        assert_eq!(sub_seed(100, 0), 100);
        assert_eq!(sub_seed(100, 1), 100 + 9973);
        assert_eq!(sub_seed(0, 300_000), (300_000u64 * 9973) % 2_147_483_647);
    }

    #[test]
    fn one_sided_p_value_uses_add_one_smoothing() {
        assert_eq!(one_sided_p_value(0, 99), 1.0 / 100.0);
        assert_eq!(one_sided_p_value(99, 99), 100.0 / 100.0);
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&data, 0.0), 1.0);
        assert_eq!(quantile(&data, 1.0), 5.0);
        assert_eq!(quantile(&data, 0.5), 3.0);
    }

    #[test]
    fn sample_block_indices_covers_at_least_n_obs() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let blocks = sample_block_indices(20, 5, &mut rng);
        let covered: usize = blocks.iter().map(|(s, e)| e - s).sum();
        assert!(covered >= 20);
    }

    #[test]
    fn concat_blocks_truncates_to_n_obs() {
        let arr: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let blocks = vec![(0usize, 6usize), (2usize, 8usize)];
        let out = concat_blocks(&arr, &blocks, 10);
        assert_eq!(out.len(), 10);
    }
}
