//! Frequency-weighted negative sampling. One `NegativeTable` is built per
//! task (trx, view, sub, search, item-word, user-word) from that task's
//! count vector, shared read-only across worker threads; each thread keeps
//! its own scan cursor into the shared table.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub const DEFAULT_TABLE_SIZE: usize = 50_000_000;

/// A read-only table of indices, built once and shared across threads via
/// `Arc`. Frequency `sqrt(count_i)` determines how many slots index `i`
/// occupies, matching the classic word2vec negative-sampling distribution.
pub struct NegativeTable {
    table: Vec<u32>,
}

impl NegativeTable {
    /// Builds the table from a Laplace-smoothed count vector. `seed` makes
    /// the shuffle (and thus sampling order) reproducible.
    pub fn build(counts: &[i64], table_size: usize, seed: u64) -> Self {
        let sqrt_counts: Vec<f64> = counts.iter().map(|&c| (c as f64).sqrt()).collect();
        let z: f64 = sqrt_counts.iter().sum();

        let mut table = Vec::with_capacity(table_size);
        if z > 0.0 {
            for (i, &c) in sqrt_counts.iter().enumerate() {
                let n = (c * table_size as f64 / z).floor() as usize;
                table.extend(std::iter::repeat(i as u32).take(n));
            }
        }
        if table.is_empty() {
            // Degenerate all-zero-count input: fall back to a uniform table
            // so callers still get a usable (if meaningless) sampler.
            table.extend(0..counts.len().max(1) as u32);
        }

        let mut rng = SmallRng::seed_from_u64(seed);
        table.shuffle(&mut rng);

        NegativeTable { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// A per-thread cursor into a shared `NegativeTable`.
pub struct NegativeSampler {
    table: Arc<NegativeTable>,
    pos: usize,
}

impl NegativeSampler {
    pub fn new(table: Arc<NegativeTable>, thread_id: usize) -> Self {
        let len = table.len().max(1);
        NegativeSampler {
            pos: thread_id % len,
            table,
        }
    }

    /// Next negative index, guaranteed different from `positive`, scanning
    /// forward with wraparound. If every entry in the table equals
    /// `positive` this loops forever by the same contract as the upstream
    /// implementation -- callers must ensure `positive` is not the table's
    /// sole value for any vocabulary with more than one entry.
    pub fn next(&mut self, positive: usize) -> usize {
        loop {
            let candidate = self.table.table[self.pos] as usize;
            self.pos = (self.pos + 1) % self.table.table.len();
            if candidate != positive {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_returns_the_positive() {
        let table = Arc::new(NegativeTable::build(&[1, 1, 1], 1000, 7));
        let mut sampler = NegativeSampler::new(Arc::clone(&table), 0);
        for _ in 0..10_000 {
            assert_ne!(sampler.next(1), 1);
        }
    }

    #[test]
    fn empirical_frequency_matches_sqrt_weighting() {
        let counts = [1i64, 4, 9, 16];
        let table = Arc::new(NegativeTable::build(&counts, 2_000_000, 11));
        let mut sampler = NegativeSampler::new(Arc::clone(&table), 0);

        let mut hits = [0u64; 4];
        let n = 1_000_000;
        // Sample against an out-of-range positive so nothing is excluded.
        for _ in 0..n {
            hits[sampler.next(usize::MAX)] += 1;
        }

        let sqrt_counts: Vec<f64> = counts.iter().map(|&c| (c as f64).sqrt()).collect();
        let z: f64 = sqrt_counts.iter().sum();
        for i in 0..4 {
            let expected = sqrt_counts[i] / z;
            let observed = hits[i] as f64 / n as f64;
            assert!(
                (observed - expected).abs() < 0.02,
                "index {i}: expected {expected:.4}, observed {observed:.4}"
            );
        }
    }

    #[test]
    fn deterministic_given_seed() {
        let a = NegativeTable::build(&[1, 2, 3], 10_000, 3);
        let b = NegativeTable::build(&[1, 2, 3], 10_000, 3);
        assert_eq!(a.len(), b.len());
        let mut sa = NegativeSampler::new(Arc::new(a), 0);
        let mut sb = NegativeSampler::new(Arc::new(b), 0);
        for _ in 0..100 {
            assert_eq!(sa.next(usize::MAX), sb.next(usize::MAX));
        }
    }
}
