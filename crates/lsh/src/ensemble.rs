//! LSH ensemble index.
//!
//! Answers approximate set-containment queries: which indexed sets S
//! satisfy `|S ∩ Q| / |S| >= threshold` for a query set Q. The index is
//! partitioned by indexed-set cardinality; within a partition the
//! containment threshold converts to a Jaccard threshold through the
//! partition's upper size bound, reducing the problem to classic banded
//! MinHash LSH. Every partition keeps one banding table per band width so
//! the query can pick the table whose false-positive/false-negative
//! trade-off is optimal for its converted threshold.

use ahash::{AHashMap, AHashSet};

use crate::errors::LshError;
use crate::minhash::MinHash;

/// Integration step count for the collision-probability curves.
const INTEGRATION_STEPS: usize = 200;

/// One set to index.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    pub minhash: MinHash,
    pub size: usize,
}

/// Index construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct EnsembleParams {
    /// Containment threshold θ.
    pub threshold: f64,

    /// Number of cardinality partitions.
    pub num_part: usize,

    /// `(false_positive_weight, false_negative_weight)` used when picking
    /// the banding scheme for a query.
    pub weights: (f64, f64),
}

/// The built index. Read-only after construction, shareable by reference.
#[derive(Debug)]
pub struct LshEnsemble {
    threshold: f64,
    weights: (f64, f64),
    partitions: Vec<Partition>,
}

#[derive(Debug)]
struct Partition {
    /// Largest indexed-set cardinality in this partition.
    upper: usize,
    keys: Vec<String>,
    tables: Vec<BandTable>,
}

#[derive(Debug)]
struct BandTable {
    bands: usize,
    rows: usize,
    /// One bucket map per band.
    buckets: Vec<AHashMap<u64, Vec<u32>>>,
}

impl LshEnsemble {
    /// Builds the index over all entries. An empty entry list is an index
    /// construction failure, which callers treat as fatal.
    pub fn index(mut entries: Vec<Entry>, params: &EnsembleParams) -> Result<Self, LshError> {
        if entries.is_empty() {
            return Err(LshError::EmptyIndex);
        }
        if !(params.threshold > 0.0 && params.threshold <= 1.0) {
            return Err(LshError::InvalidThreshold(params.threshold));
        }

        let num_perm = entries[0].minhash.values().len();
        if num_perm < 2 || !num_perm.is_power_of_two() {
            return Err(LshError::InvalidPermutationCount(num_perm));
        }

        // Equal-depth cardinality partitions; ties broken by key so the
        // index is reproducible.
        entries.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.key.cmp(&b.key)));

        let chunk_size = entries.len().div_ceil(params.num_part);
        let partitions = entries
            .chunks(chunk_size)
            .map(|chunk| Partition::build(chunk, num_perm))
            .collect();

        Ok(Self {
            threshold: params.threshold,
            weights: params.weights,
            partitions,
        })
    }

    /// Returns the keys of indexed sets likely contained in the query at
    /// the index threshold, sorted. `size` is the query set cardinality.
    pub fn query(&self, minhash: &MinHash, size: usize) -> Vec<String> {
        if size == 0 {
            return Vec::new();
        }

        let mut matches: AHashSet<&str> = AHashSet::new();
        for partition in &self.partitions {
            let jaccard = jaccard_threshold(self.threshold, size, partition.upper);
            let table = partition.optimal_table(jaccard, self.weights);
            for id in table.probe(minhash) {
                matches.insert(&partition.keys[id as usize]);
            }
        }

        let mut keys: Vec<String> = matches.into_iter().map(str::to_owned).collect();
        keys.sort_unstable();
        keys
    }

    #[inline]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

impl Partition {
    fn build(entries: &[Entry], num_perm: usize) -> Self {
        let upper = entries.last().map(|e| e.size).unwrap_or(0);
        let keys = entries.iter().map(|e| e.key.clone()).collect();

        // Band widths 2, 4, ..., num_perm.
        let mut tables = Vec::new();
        let mut rows = 2;
        while rows <= num_perm {
            tables.push(BandTable::build(entries, num_perm / rows, rows));
            rows *= 2;
        }

        Self { upper, keys, tables }
    }

    /// The table minimizing the weighted false-positive/false-negative
    /// area at the given Jaccard threshold.
    fn optimal_table(&self, jaccard: f64, weights: (f64, f64)) -> &BandTable {
        self.tables
            .iter()
            .min_by(|a, b| {
                let ea = a.error(jaccard, weights);
                let eb = b.error(jaccard, weights);
                ea.partial_cmp(&eb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("partition has at least one band table")
    }
}

impl BandTable {
    fn build(entries: &[Entry], bands: usize, rows: usize) -> Self {
        let mut buckets: Vec<AHashMap<u64, Vec<u32>>> = vec![AHashMap::new(); bands];

        for (id, entry) in entries.iter().enumerate() {
            for (band, bucket) in buckets.iter_mut().enumerate() {
                let slot = band_hash(&entry.minhash.values()[band * rows..(band + 1) * rows]);
                bucket.entry(slot).or_default().push(id as u32);
            }
        }

        Self { bands, rows, buckets }
    }

    fn probe(&self, minhash: &MinHash) -> impl Iterator<Item = u32> {
        let mut ids: AHashSet<u32> = AHashSet::new();
        for (band, bucket) in self.buckets.iter().enumerate() {
            let slot = band_hash(&minhash.values()[band * self.rows..(band + 1) * self.rows]);
            if let Some(members) = bucket.get(&slot) {
                ids.extend(members.iter().copied());
            }
        }
        ids.into_iter()
    }

    fn error(&self, jaccard: f64, weights: (f64, f64)) -> f64 {
        weights.0 * self.false_positive_area(jaccard) + weights.1 * self.false_negative_area(jaccard)
    }

    /// Probability mass of collisions below the threshold.
    fn false_positive_area(&self, jaccard: f64) -> f64 {
        integrate(0.0, jaccard, |s| self.collision_probability(s))
    }

    /// Probability mass of misses above the threshold.
    fn false_negative_area(&self, jaccard: f64) -> f64 {
        integrate(jaccard, 1.0, |s| 1.0 - self.collision_probability(s))
    }

    fn collision_probability(&self, similarity: f64) -> f64 {
        1.0 - (1.0 - similarity.powi(self.rows as i32)).powi(self.bands as i32)
    }
}

/// Converts the containment threshold to the Jaccard threshold valid for
/// indexed sets of cardinality `upper` against a query of cardinality
/// `query_size`.
fn jaccard_threshold(containment: f64, query_size: usize, upper: usize) -> f64 {
    let q = query_size as f64;
    let u = upper as f64;
    let denominator = u + q - containment * u;
    if denominator <= 0.0 {
        return 1.0;
    }
    (containment * u / denominator).clamp(0.0, 1.0)
}

fn integrate(from: f64, to: f64, f: impl Fn(f64) -> f64) -> f64 {
    if to <= from {
        return 0.0;
    }
    let step = (to - from) / INTEGRATION_STEPS as f64;
    (0..INTEGRATION_STEPS)
        .map(|i| f(from + (i as f64 + 0.5) * step) * step)
        .sum()
}

fn band_hash(values: &[u32]) -> u64 {
    // FNV-1a, stable across platforms.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for value in values {
        for byte in value.to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minhash::MinHasher;

    fn params() -> EnsembleParams {
        EnsembleParams {
            threshold: 0.8,
            num_part: 32,
            weights: (0.1, 0.9),
        }
    }

    fn entry(hasher: &MinHasher, key: &str, tokens: &[String]) -> Entry {
        Entry {
            key: key.to_owned(),
            minhash: hasher.sketch(tokens),
            size: tokens.len(),
        }
    }

    fn tokens(prefix: &str, range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn empty_index_is_an_error() {
        assert!(matches!(
            LshEnsemble::index(Vec::new(), &params()),
            Err(LshError::EmptyIndex)
        ));
    }

    #[test]
    fn identical_set_is_retrieved() {
        let hasher = MinHasher::new();
        let set = tokens("sig", 0..20);
        let index =
            LshEnsemble::index(vec![entry(&hasher, "lib->A", &set)], &params()).unwrap();

        let result = index.query(&hasher.sketch(&set), set.len());
        assert_eq!(result, vec!["lib->A".to_owned()]);
    }

    #[test]
    fn contained_subset_is_retrieved() {
        let hasher = MinHasher::new();
        let indexed = tokens("sig", 0..16);
        let query = tokens("sig", 0..20);
        let index =
            LshEnsemble::index(vec![entry(&hasher, "lib->A", &indexed)], &params()).unwrap();

        let result = index.query(&hasher.sketch(&query), query.len());
        assert_eq!(result, vec!["lib->A".to_owned()]);
    }

    #[test]
    fn disjoint_set_is_not_retrieved() {
        let hasher = MinHasher::new();
        let indexed = tokens("lib", 0..20);
        let query = tokens("app", 0..20);
        let index =
            LshEnsemble::index(vec![entry(&hasher, "lib->A", &indexed)], &params()).unwrap();

        assert!(index.query(&hasher.sketch(&query), query.len()).is_empty());
    }

    #[test]
    fn low_containment_set_is_not_retrieved() {
        let hasher = MinHasher::new();
        // 2 of 20 tokens shared: containment 0.1, far below 0.8.
        let indexed = tokens("shared", 0..2)
            .into_iter()
            .chain(tokens("lib", 0..18))
            .collect::<Vec<_>>();
        let query = tokens("shared", 0..2)
            .into_iter()
            .chain(tokens("app", 0..18))
            .collect::<Vec<_>>();
        let index =
            LshEnsemble::index(vec![entry(&hasher, "lib->A", &indexed)], &params()).unwrap();

        assert!(index.query(&hasher.sketch(&query), query.len()).is_empty());
    }

    #[test]
    fn queries_hit_the_right_partition_sizes() {
        let hasher = MinHasher::new();
        let entries = (0..64)
            .map(|i| entry(&hasher, &format!("lib->C{}", i), &tokens(&format!("t{}-", i), 0..(4 + i))))
            .collect::<Vec<_>>();
        let index = LshEnsemble::index(entries, &params()).unwrap();
        assert!(index.partition_count() <= 32);

        // Each indexed set is still retrievable by its own tokens.
        let probe = tokens("t7-", 0..11);
        let result = index.query(&hasher.sketch(&probe), probe.len());
        assert!(result.contains(&"lib->C7".to_owned()));
    }

    #[test]
    fn empty_query_returns_nothing() {
        let hasher = MinHasher::new();
        let index = LshEnsemble::index(
            vec![entry(&hasher, "lib->A", &tokens("sig", 0..8))],
            &params(),
        )
        .unwrap();
        assert!(index.query(&hasher.sketch(Vec::<String>::new()), 0).is_empty());
    }
}
