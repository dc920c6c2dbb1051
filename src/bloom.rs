//! Counting Bloom filter over revoked certificate serials.
//!
//! Every element maps to `k` cells by double hashing. A cell is one byte
//! holding `8 / bits_per_count` packed counters; the `i`-th hash of an
//! element uses counter slot `i` of its cell, so `k` is capped at the number
//! of slots. Counters saturate at `2^bits_per_count - 1` and the saturation
//! is only recorded in the overflow statistic.

use crate::error::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::f64::consts::LN_2;
use std::sync::{PoisonError, RwLock};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug)]
struct Counters {
    cells: Vec<u8>,
    overflows: u64,
}

#[derive(Debug)]
pub struct CountingBloomFilter {
    size: usize,
    hash_count: usize,
    hash_count_capped: bool,
    bits_per_count: u32,
    max_count: u8,
    state: RwLock<Counters>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BloomStats {
    pub size: usize,
    pub hash_count: usize,
    pub bits_per_count: u32,
    pub max_count: u8,
    pub non_zero_cells: usize,
    pub total_count: u64,
    pub max_cell_count: u32,
    pub avg_count: f64,
    pub load_factor: f64,
    pub estimated_fpr: f64,
    pub overflows: u64,
}

/// `m = ceil(-n ln p / (ln 2)^2)`
pub fn optimal_size(expected_elements: usize, false_positive_rate: f64) -> usize {
    let n = expected_elements as f64;
    (-(n * false_positive_rate.ln()) / (LN_2 * LN_2)).ceil() as usize
}

/// `k = ceil((m / n) ln 2)`
pub fn optimal_hash_count(size: usize, expected_elements: usize) -> usize {
    ((size as f64 / expected_elements as f64) * LN_2).ceil() as usize
}

impl CountingBloomFilter {
    pub fn new(expected_elements: usize, false_positive_rate: f64, bits_per_count: u32) -> Result<Self> {
        if expected_elements == 0 {
            return Err(Error::InvalidParameter("expected element count must be > 0".into()));
        }
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "false positive rate must be in (0, 1), got {}",
                false_positive_rate
            )));
        }
        if !matches!(bits_per_count, 1 | 2 | 4 | 8) {
            return Err(Error::InvalidParameter(format!(
                "bits per count must divide 8, got {}",
                bits_per_count
            )));
        }

        let size = optimal_size(expected_elements, false_positive_rate).max(1);
        let ideal = optimal_hash_count(size, expected_elements).max(1);
        let slots = (8 / bits_per_count) as usize;
        let hash_count = ideal.min(slots);
        let hash_count_capped = ideal > slots;
        if hash_count_capped {
            tracing::warn!(
                ideal,
                hash_count,
                bits_per_count,
                "hash count capped by cell capacity, false positive rate will exceed target"
            );
        }
        tracing::debug!(size, hash_count, bits_per_count, "counting bloom filter created");

        Ok(Self {
            size,
            hash_count,
            hash_count_capped,
            bits_per_count,
            max_count: ((1u16 << bits_per_count) - 1) as u8,
            state: RwLock::new(Counters {
                cells: vec![0; size],
                overflows: 0,
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn hash_count(&self) -> usize {
        self.hash_count
    }

    /// Whether the ideal hash count exceeded the counters available per cell.
    pub fn hash_count_capped(&self) -> bool {
        self.hash_count_capped
    }

    pub fn max_count(&self) -> u8 {
        self.max_count
    }

    /// Bytes of counter storage.
    pub fn memory_usage(&self) -> usize {
        self.size
    }

    fn positions(&self, data: &[u8]) -> Vec<usize> {
        let digest = Sha256::digest(data);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let m = self.size as u64;
        let h1 = u64::from_be_bytes(prefix) % m;
        let h2 = fnv1a_64(data) % m;

        (0..self.hash_count as u64)
            .map(|i| ((h1 + i * h2) % m) as usize)
            .collect()
    }

    fn counter(&self, cell: u8, slot: usize) -> u8 {
        (cell >> (slot as u32 * self.bits_per_count)) & self.max_count
    }

    fn with_counter(&self, cell: u8, slot: usize, value: u8) -> u8 {
        let shift = slot as u32 * self.bits_per_count;
        (cell & !(self.max_count << shift)) | ((value & self.max_count) << shift)
    }

    /// Increments the element's `k` counters. Returns how many of them were
    /// already saturated and stayed unchanged.
    pub fn add_element(&self, data: &[u8]) -> usize {
        let positions = self.positions(data);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let mut saturated = 0;
        for (slot, pos) in positions.into_iter().enumerate() {
            let cell = state.cells[pos];
            let counter = self.counter(cell, slot);
            if counter == self.max_count {
                saturated += 1;
            } else {
                state.cells[pos] = self.with_counter(cell, slot, counter + 1);
            }
        }
        if saturated > 0 {
            state.overflows += saturated as u64;
            tracing::debug!(saturated, overflows = state.overflows, "bloom counters saturated");
        }
        saturated
    }

    /// Decrements all `k` counters, or none of them if any is already zero.
    pub fn remove_element(&self, data: &[u8]) -> bool {
        let positions = self.positions(data);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let present = positions
            .iter()
            .enumerate()
            .all(|(slot, &pos)| self.counter(state.cells[pos], slot) != 0);
        if !present {
            return false;
        }

        for (slot, pos) in positions.into_iter().enumerate() {
            let cell = state.cells[pos];
            let counter = self.counter(cell, slot);
            state.cells[pos] = self.with_counter(cell, slot, counter - 1);
        }
        true
    }

    pub fn query_element(&self, data: &[u8]) -> bool {
        let positions = self.positions(data);
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        positions
            .iter()
            .enumerate()
            .all(|(slot, &pos)| self.counter(state.cells[pos], slot) != 0)
    }

    pub fn stats(&self) -> BloomStats {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let mut non_zero_cells = 0usize;
        let mut total_count = 0u64;
        let mut max_cell_count = 0u32;
        for &cell in state.cells.iter().filter(|&&cell| cell != 0) {
            non_zero_cells += 1;
            let cell_sum: u32 = (0..self.hash_count)
                .map(|slot| self.counter(cell, slot) as u32)
                .sum();
            total_count += cell_sum as u64;
            max_cell_count = max_cell_count.max(cell_sum);
        }

        let avg_count = if non_zero_cells > 0 {
            total_count as f64 / non_zero_cells as f64
        } else {
            0.0
        };
        let load_factor = non_zero_cells as f64 / self.size as f64;

        BloomStats {
            size: self.size,
            hash_count: self.hash_count,
            bits_per_count: self.bits_per_count,
            max_count: self.max_count,
            non_zero_cells,
            total_count,
            max_cell_count,
            avg_count,
            load_factor,
            estimated_fpr: load_factor.powi(self.hash_count as i32),
            overflows: state.overflows,
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.cells.fill(0);
        state.overflows = 0;
    }

    #[cfg(test)]
    fn snapshot(&self) -> Vec<u8> {
        self.state.read().unwrap().cells.clone()
    }
}

fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn serial(i: usize) -> String {
        format!("{:017}", i)
    }

    #[test]
    fn test_sizing() {
        assert_eq!(optimal_size(100, 0.01), 959);
        assert_eq!(optimal_hash_count(959, 100), 7);

        let filter = CountingBloomFilter::new(100, 0.01, 1).unwrap();
        assert_eq!(filter.size(), 959);
        assert_eq!(filter.hash_count(), 7);
        assert!(!filter.hash_count_capped());
        assert_eq!(filter.max_count(), 1);
        assert_eq!(filter.memory_usage(), 959);

        let filter = CountingBloomFilter::new(100, 0.01, 4).unwrap();
        assert_eq!(filter.hash_count(), 2);
        assert!(filter.hash_count_capped());
        assert_eq!(filter.max_count(), 15);

        let filter = CountingBloomFilter::new(100, 0.01, 8).unwrap();
        assert_eq!(filter.hash_count(), 1);
        assert_eq!(filter.max_count(), 255);
    }

    #[test]
    fn test_invalid_parameters() {
        assert_matches!(CountingBloomFilter::new(0, 0.01, 1), Err(Error::InvalidParameter(_)));
        assert_matches!(CountingBloomFilter::new(10, 0.0, 1), Err(Error::InvalidParameter(_)));
        assert_matches!(CountingBloomFilter::new(10, 1.0, 1), Err(Error::InvalidParameter(_)));
        assert_matches!(CountingBloomFilter::new(10, 0.01, 3), Err(Error::InvalidParameter(_)));
        assert_matches!(CountingBloomFilter::new(10, 0.01, 0), Err(Error::InvalidParameter(_)));
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn test_revocation_serials() {
        let filter = CountingBloomFilter::new(100, 0.01, 1).unwrap();
        for i in 0..10_000 {
            filter.add_element(serial(i).as_bytes());
        }
        assert!(filter.query_element(b"00000000000000020"));
        for i in (0..10_000).step_by(97) {
            assert!(filter.query_element(serial(i).as_bytes()));
        }

        // a filter sized for 100 holding 10000 elements is saturated
        let stats = filter.stats();
        assert!(stats.overflows > 0);
        assert!(stats.load_factor > 0.99);
        assert!(stats.estimated_fpr > 0.9);
    }

    #[test]
    fn test_add_query_remove() {
        let filter = CountingBloomFilter::new(1000, 0.01, 4).unwrap();
        filter.add_element(b"serial-1");
        filter.add_element(b"serial-1");
        assert!(filter.query_element(b"serial-1"));

        assert!(filter.remove_element(b"serial-1"));
        assert!(filter.query_element(b"serial-1"));
        assert!(filter.remove_element(b"serial-1"));
        assert!(!filter.query_element(b"serial-1"));
        assert!(!filter.remove_element(b"serial-1"));
    }

    #[test]
    fn test_remove_absent_leaves_counters() {
        let filter = CountingBloomFilter::new(50, 0.05, 2).unwrap();
        for i in 0..20 {
            filter.add_element(serial(i).as_bytes());
        }
        let before = filter.snapshot();
        let stats_before = filter.stats();

        for i in 1000..1200 {
            let s = serial(i);
            if !filter.query_element(s.as_bytes()) {
                assert!(!filter.remove_element(s.as_bytes()));
            }
        }
        assert_eq!(filter.snapshot(), before);
        assert_eq!(filter.stats(), stats_before);
    }

    #[test]
    fn test_saturation_counts_overflows() {
        let filter = CountingBloomFilter::new(100, 0.01, 1).unwrap();
        assert_eq!(filter.add_element(b"x"), 0);
        assert_eq!(filter.stats().overflows, 0);
        assert_eq!(filter.add_element(b"x"), filter.hash_count());
        let stats = filter.stats();
        assert_eq!(stats.overflows, filter.hash_count() as u64);
        // the saturated counters still hold the maximum, not a wrapped zero
        assert!(filter.query_element(b"x"));

        filter.reset();
        let stats = filter.stats();
        assert_eq!(stats.overflows, 0);
        assert_eq!(stats.non_zero_cells, 0);
        assert_eq!(stats.estimated_fpr, 0.0);
        assert!(!filter.query_element(b"x"));
    }

    #[test]
    fn test_stats_counts_slots() {
        let filter = CountingBloomFilter::new(1000, 0.01, 2).unwrap();
        assert_eq!(filter.hash_count(), 4);
        filter.add_element(b"one");
        let stats = filter.stats();
        assert_eq!(stats.total_count, 4);
        assert!(stats.non_zero_cells >= 1 && stats.non_zero_cells <= 4);
        assert_eq!(stats.bits_per_count, 2);
        assert_eq!(stats.max_count, 3);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["hash_count"], 4);
    }

    proptest! {
        #[test]
        fn prop_no_false_negatives(
            items in proptest::collection::hash_set("[a-z0-9]{1,24}", 1..60),
            bits in prop_oneof![Just(1u32), Just(2), Just(4), Just(8)],
        ) {
            let filter = CountingBloomFilter::new(64, 0.02, bits).unwrap();
            for item in &items {
                filter.add_element(item.as_bytes());
            }
            for item in &items {
                prop_assert!(filter.query_element(item.as_bytes()));
            }
        }
    }
}
