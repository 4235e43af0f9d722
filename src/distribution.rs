//! The selection structure backing `selectNow`.
//!
//! A `WeightedRandomDistribution` is built once per live-view rebuild and
//! never mutated afterwards; the selector publishes a freshly built one by
//! swapping a whole `Rc` rather than mutating an in-use distribution (see
//! `selector::Live`).

use rand::Rng;

/// Samples one `T` with probability proportional to its weight.
///
/// Zero-weight entries are dropped at construction time and can never be
/// returned by `pick`. Construction is `O(n)`; `pick` is `O(log n)` via
/// binary search over cumulative weights.
pub struct WeightedRandomDistribution<T> {
    entries: Vec<(T, u32)>,
    cumulative: Vec<u64>,
    total: u64,
}

impl<T> WeightedRandomDistribution<T> {
    /// Builds a distribution from `(item, weight)` pairs, discarding any
    /// entry whose weight is zero.
    pub fn new(entries: Vec<(T, u32)>) -> WeightedRandomDistribution<T> {
        let mut filtered = Vec::with_capacity(entries.len());
        let mut cumulative = Vec::with_capacity(entries.len());
        let mut total = 0u64;
        for (item, weight) in entries {
            if weight == 0 {
                continue;
            }
            total += u64::from(weight);
            cumulative.push(total);
            filtered.push((item, weight));
        }
        WeightedRandomDistribution {
            entries: filtered,
            cumulative,
            total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_weight(&self) -> u64 {
        self.total
    }

    /// Draws one entry using the supplied random source.
    ///
    /// Returns `None` iff the distribution is empty. The caller supplies
    /// the `Rng` so tests can pass a seeded generator for deterministic
    /// sampling; production call sites use `rand::thread_rng()`.
    pub fn pick<R: Rng>(&self, rng: &mut R) -> Option<&T> {
        if self.total == 0 {
            return None;
        }
        let x = rng.gen_range(0u64, self.total);
        let idx = upper_bound(&self.cumulative, x);
        self.entries.get(idx).map(|&(ref item, _)| item)
    }

    pub fn iter(&self) -> ::std::slice::Iter<(T, u32)> {
        self.entries.iter()
    }
}

/// Smallest index `i` such that `cumulative[i] > x`.
fn upper_bound(cumulative: &[u64], x: u64) -> usize {
    let mut lo = 0;
    let mut hi = cumulative.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cumulative[mid] <= x {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, XorShiftRng};

    fn seeded() -> XorShiftRng {
        XorShiftRng::from_seed([1, 2, 3, 4])
    }

    #[test]
    fn empty_distribution_picks_none() {
        let dist: WeightedRandomDistribution<&str> = WeightedRandomDistribution::new(vec![]);
        assert!(dist.is_empty());
        assert_eq!(dist.pick(&mut seeded()), None);
    }

    #[test]
    fn zero_weight_entries_are_never_picked() {
        let dist = WeightedRandomDistribution::new(vec![("dead", 0), ("alive", 10)]);
        assert_eq!(dist.len(), 1);
        let mut rng = seeded();
        for _ in 0..100 {
            assert_eq!(dist.pick(&mut rng), Some(&"alive"));
        }
    }

    #[test]
    fn all_zero_weight_is_empty() {
        let dist = WeightedRandomDistribution::new(vec![("a", 0), ("b", 0)]);
        assert!(dist.is_empty());
        assert_eq!(dist.pick(&mut seeded()), None);
    }

    #[test]
    fn probability_matches_weights_within_tolerance() {
        let dist = WeightedRandomDistribution::new(vec![("a", 100), ("b", 300), ("c", 600)]);
        let mut rng = seeded();
        let mut counts = [0u32; 3];
        const SAMPLES: u32 = 100_000;
        for _ in 0..SAMPLES {
            match dist.pick(&mut rng) {
                Some(&"a") => counts[0] += 1,
                Some(&"b") => counts[1] += 1,
                Some(&"c") => counts[2] += 1,
                _ => panic!("unexpected pick"),
            }
        }
        let fa = f64::from(counts[0]) / f64::from(SAMPLES);
        let fb = f64::from(counts[1]) / f64::from(SAMPLES);
        let fc = f64::from(counts[2]) / f64::from(SAMPLES);
        assert!((fa - 0.10).abs() < 0.02, "a frequency {}", fa);
        assert!((fb - 0.30).abs() < 0.02, "b frequency {}", fb);
        assert!((fc - 0.60).abs() < 0.02, "c frequency {}", fc);
    }

    #[test]
    fn single_entry_always_picked() {
        let dist = WeightedRandomDistribution::new(vec![("only", 5)]);
        let mut rng = seeded();
        for _ in 0..10 {
            assert_eq!(dist.pick(&mut rng), Some(&"only"));
        }
    }
}
