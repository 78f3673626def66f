//! MinHash sketches.
//!
//! Permutations are universal hashes `(a * h + b) mod p` over the Mersenne
//! prime `2^61 - 1`, masked to a 32-bit hash range. The base hash of a token
//! is the first four bytes of its SHA-1 digest, so sketches depend on
//! nothing platform-specific and identical inputs sketch identically on any
//! machine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha1::{Digest, Sha1};

/// Number of hash permutations per sketch.
pub const NUM_PERMUTATIONS: usize = 256;

const MERSENNE_PRIME: u64 = (1 << 61) - 1;
const MAX_HASH: u64 = u32::MAX as u64;

/// Fixed seed for the permutation parameters.
const PERMUTATION_SEED: u64 = 1;

/// Shared permutation parameters. Construct once, hash many sets.
#[derive(Debug, Clone)]
pub struct MinHasher {
    a: Vec<u64>,
    b: Vec<u64>,
    num_perm: usize,
}

impl MinHasher {
    pub fn new() -> Self {
        Self::with_permutations(NUM_PERMUTATIONS)
    }

    pub fn with_permutations(num_perm: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(PERMUTATION_SEED);
        let a = (0..num_perm)
            .map(|_| rng.random_range(1..MERSENNE_PRIME))
            .collect();
        let b = (0..num_perm)
            .map(|_| rng.random_range(0..MERSENNE_PRIME))
            .collect();

        Self { a, b, num_perm }
    }

    #[inline]
    pub fn num_permutations(&self) -> usize {
        self.num_perm
    }

    /// Sketches a set of tokens.
    pub fn sketch<I, T>(&self, tokens: I) -> MinHash
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut values = vec![u32::MAX; self.num_perm];

        for token in tokens {
            let base = base_hash(token.as_ref());
            for (value, (a, b)) in values.iter_mut().zip(self.a.iter().zip(&self.b)) {
                let permuted =
                    ((u128::from(*a) * u128::from(base) + u128::from(*b)) % u128::from(MERSENNE_PRIME)) as u64
                        & MAX_HASH;
                *value = (*value).min(permuted as u32);
            }
        }

        MinHash { values }
    }
}

impl Default for MinHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn base_hash(token: &[u8]) -> u32 {
    let digest = Sha1::digest(token);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// A sketched set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinHash {
    values: Vec<u32>,
}

impl MinHash {
    #[inline]
    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Jaccard similarity estimate against another sketch of the same
    /// permutation count.
    pub fn jaccard(&self, other: &MinHash) -> f64 {
        let equal = self
            .values
            .iter()
            .zip(&other.values)
            .filter(|(a, b)| a == b)
            .count();
        equal as f64 / self.values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sketching_is_deterministic_across_hashers() {
        let tokens = ["aa", "bb", "cc", "dd"];
        let a = MinHasher::new().sketch(tokens);
        let b = MinHasher::new().sketch(tokens);
        assert_eq!(a, b);
    }

    #[test]
    fn token_order_does_not_matter() {
        let hasher = MinHasher::new();
        let a = hasher.sketch(["aa", "bb", "cc"]);
        let b = hasher.sketch(["cc", "aa", "bb"]);
        assert_eq!(a, b);
    }

    #[test]
    fn identical_sets_have_jaccard_one() {
        let hasher = MinHasher::new();
        let a = hasher.sketch(["x", "y", "z"]);
        let b = hasher.sketch(["x", "y", "z"]);
        assert_eq!(a.jaccard(&b), 1.0);
    }

    #[test]
    fn jaccard_estimate_tracks_true_similarity() {
        let hasher = MinHasher::new();
        let left: Vec<String> = (0..100).map(|i| format!("tok{}", i)).collect();
        let right: Vec<String> = (50..150).map(|i| format!("tok{}", i)).collect();

        // True Jaccard is 50 / 150.
        let estimate = hasher.sketch(&left).jaccard(&hasher.sketch(&right));
        assert!((estimate - 1.0 / 3.0).abs() < 0.12, "estimate {}", estimate);
    }

    #[test]
    fn disjoint_sets_estimate_near_zero() {
        let hasher = MinHasher::new();
        let left: Vec<String> = (0..50).map(|i| format!("l{}", i)).collect();
        let right: Vec<String> = (0..50).map(|i| format!("r{}", i)).collect();
        assert!(hasher.sketch(&left).jaccard(&hasher.sketch(&right)) < 0.1);
    }
}
