//! Rotating Bloom-filter membership cache.
//!
//! A [`RotatingBloom`] is an ordered ring of immutable-once-superseded Bloom
//! filter generations, newest first.  Inserts always land in generation 0;
//! a membership query is a logical OR across every live generation.  On a
//! fixed period a fresh generation is prepended and, once the ring exceeds
//! its configured depth, the oldest generation is dropped.  That rollover is
//! the only eviction mechanism: a key stays queryable for between
//! `(G-1) * period` and `G * period` after insertion.
//!
//! Each generation is a lock-free atomic bit array, so `insert` and
//! `might_contain` take no locks.  The generation list itself is replaced
//! copy-on-write through [`arc_swap::ArcSwap`]; readers racing with a
//! rotation see either the old or the new list, and an insert that lands in
//! a just-superseded generation 0 is still visible because that generation
//! survives as index 1 of the new list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_128;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sizing and rotation parameters for one [`RotatingBloom`].
#[derive(Debug, Clone)]
pub struct BloomConfig {
    /// Maximum number of live generations (`G`).
    pub generations: usize,
    /// Expected insertions per generation.
    pub capacity: usize,
    /// Target false-positive rate per generation.
    pub false_positive_rate: f64,
    /// Wall-clock period between rotations.
    pub rotation_interval: Duration,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            generations: 5,
            capacity: 1_000_000,
            false_positive_rate: 1e-6,
            rotation_interval: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Single generation
// ---------------------------------------------------------------------------

/// One Bloom filter snapshot covering a single rotation window.
///
/// Standard sizing: `m = -n * ln(p) / (ln 2)^2` bits and `k = m/n * ln 2`
/// probes, with probe indexes derived from one xxh3-128 digest via double
/// hashing.  Bits are set and tested with relaxed atomics; a racing reader
/// that misses a freshly set bit only causes a redundant re-verification
/// upstream, never an incorrect accept.
struct Generation {
    bits: Vec<AtomicU64>,
    num_bits: u64,
    num_probes: u32,
}

impl Generation {
    fn new(capacity: usize, false_positive_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * false_positive_rate.ln()) / (ln2 * ln2)).ceil();
        let words = ((m as u64).div_ceil(64)).max(1) as usize;
        let num_bits = words as u64 * 64;
        let num_probes = ((m / n) * ln2).round().max(1.0) as u32;

        let mut bits = Vec::with_capacity(words);
        bits.resize_with(words, || AtomicU64::new(0));

        Self {
            bits,
            num_bits,
            num_probes,
        }
    }

    fn insert(&self, h1: u64, h2: u64) {
        for i in 0..self.num_probes {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits;
            let word = (bit / 64) as usize;
            let mask = 1u64 << (bit % 64);
            self.bits[word].fetch_or(mask, Ordering::Relaxed);
        }
    }

    fn contains(&self, h1: u64, h2: u64) -> bool {
        for i in 0..self.num_probes {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits;
            let word = (bit / 64) as usize;
            let mask = 1u64 << (bit % 64);
            if self.bits[word].load(Ordering::Relaxed) & mask == 0 {
                return false;
            }
        }
        true
    }
}

/// Split one 128-bit digest into the two 64-bit seeds used for double
/// hashing.  The stride is forced odd so it never degenerates to probing a
/// single bit.
fn hash_pair(key: &str) -> (u64, u64) {
    let digest = xxh3_128(key.as_bytes());
    ((digest >> 64) as u64, (digest as u64) | 1)
}

// ---------------------------------------------------------------------------
// Rotating filter
// ---------------------------------------------------------------------------

/// Time-windowed probabilistic set with bounded false positives and no
/// false negatives for keys inserted into a still-live generation.
pub struct RotatingBloom {
    config: BloomConfig,
    live: ArcSwap<Vec<Arc<Generation>>>,
}

impl RotatingBloom {
    pub fn new(config: BloomConfig) -> Self {
        let first = Arc::new(Generation::new(
            config.capacity,
            config.false_positive_rate,
        ));
        Self {
            config,
            live: ArcSwap::from_pointee(vec![first]),
        }
    }

    /// Add `key` to the current writable generation.  Idempotent; safe to
    /// call concurrently with [`Self::might_contain`] and [`Self::rotate`].
    pub fn insert(&self, key: &str) {
        let (h1, h2) = hash_pair(key);
        let generations = self.live.load();
        generations[0].insert(h1, h2);
    }

    /// `true` means possibly present (false-positive rate compounds across
    /// live generations); `false` means definitely absent.
    pub fn might_contain(&self, key: &str) -> bool {
        let (h1, h2) = hash_pair(key);
        let generations = self.live.load();
        generations.iter().any(|g| g.contains(h1, h2))
    }

    /// Prepend a fresh generation and drop the oldest once the ring exceeds
    /// its configured depth.  This is the only eviction mechanism.
    ///
    /// Deterministic and callable directly, so rotation behaviour is
    /// testable without timers; [`Self::start_rotation`] merely drives this
    /// on a wall-clock period.
    pub fn rotate(&self) {
        let old = self.live.load_full();
        let mut next = Vec::with_capacity(self.config.generations);
        next.push(Arc::new(Generation::new(
            self.config.capacity,
            self.config.false_positive_rate,
        )));
        next.extend(
            old.iter()
                .take(self.config.generations.saturating_sub(1))
                .cloned(),
        );
        self.live.store(Arc::new(next));
    }

    /// Number of live generations, newest first.
    pub fn generation_count(&self) -> usize {
        self.live.load().len()
    }

    /// Spawn the periodic rotation task.  The returned handle owns the
    /// task; dropping it (or calling [`RotationHandle::stop`]) aborts
    /// rotation.
    pub fn start_rotation(self: &Arc<Self>, name: &'static str) -> RotationHandle {
        let filter = Arc::clone(self);
        let period = filter.config.rotation_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it so the initial
            // generation lives a full window.
            interval.tick().await;
            loop {
                interval.tick().await;
                filter.rotate();
                debug!(
                    cache = name,
                    generations = filter.generation_count(),
                    "rotated membership cache"
                );
            }
        });
        RotationHandle { task }
    }
}

/// Owned handle for one cache's background rotation task.
pub struct RotationHandle {
    task: tokio::task::JoinHandle<()>,
}

impl RotationHandle {
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for RotationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> BloomConfig {
        BloomConfig {
            generations: 3,
            capacity: 1_000,
            false_positive_rate: 0.001,
            rotation_interval: Duration::from_secs(60),
        }
    }

    // ── membership ───────────────────────────────────────────────────

    #[test]
    fn inserted_keys_are_found() {
        let filter = RotatingBloom::new(small_config());
        for i in 0..500 {
            filter.insert(&format!("token-{i}"));
        }
        for i in 0..500 {
            assert!(filter.might_contain(&format!("token-{i}")));
        }
    }

    #[test]
    fn absent_key_is_definitely_absent_when_empty() {
        let filter = RotatingBloom::new(small_config());
        assert!(!filter.might_contain("never-inserted"));
    }

    #[test]
    fn no_false_negatives_across_live_generations() {
        // Randomised insert/rotate interleaving: every key inserted within
        // the last G-1 rotations must still be found.
        let filter = RotatingBloom::new(small_config());
        let mut live_keys: Vec<Vec<String>> = vec![Vec::new()];

        for round in 0..10 {
            for i in 0..50 {
                let key = format!("round-{round}-key-{i}");
                filter.insert(&key);
                live_keys.last_mut().unwrap().push(key);
            }
            filter.rotate();
            live_keys.push(Vec::new());
            // Only the newest G windows survive.
            while live_keys.len() > 3 {
                live_keys.remove(0);
            }
            for key in live_keys.iter().flatten() {
                assert!(filter.might_contain(key), "lost live key {key}");
            }
        }
    }

    #[test]
    fn false_positive_rate_stays_bounded() {
        let config = BloomConfig {
            generations: 5,
            capacity: 10_000,
            false_positive_rate: 0.01,
            rotation_interval: Duration::from_secs(60),
        };
        let filter = RotatingBloom::new(config);
        // Fill every generation to capacity.
        for gen in 0..5 {
            for i in 0..10_000 {
                filter.insert(&format!("gen-{gen}-member-{i}"));
            }
            filter.rotate();
        }

        let probes = 20_000;
        let mut false_positives = 0;
        for i in 0..probes {
            if filter.might_contain(&format!("stranger-{i}")) {
                false_positives += 1;
            }
        }
        // Worst case across 5 generations is ~1-(1-p)^5 ≈ 5%; allow 2x.
        let rate = false_positives as f64 / probes as f64;
        assert!(rate < 0.10, "false-positive rate too high: {rate}");
    }

    // ── rotation / eviction ──────────────────────────────────────────

    #[test]
    fn ring_depth_is_bounded() {
        let filter = RotatingBloom::new(small_config());
        for _ in 0..10 {
            filter.rotate();
            assert!(filter.generation_count() <= 3);
        }
        assert_eq!(filter.generation_count(), 3);
    }

    #[test]
    fn key_is_evicted_after_full_rotation_cycle() {
        let filter = RotatingBloom::new(small_config());
        filter.insert("short-lived");
        assert!(filter.might_contain("short-lived"));

        // After G rotations with no re-insertion the generation that held
        // the key is gone.
        for _ in 0..3 {
            filter.rotate();
        }
        assert!(!filter.might_contain("short-lived"));
    }

    #[test]
    fn key_survives_partial_rotation() {
        let filter = RotatingBloom::new(small_config());
        filter.insert("sticky");
        for _ in 0..2 {
            filter.rotate();
            assert!(filter.might_contain("sticky"));
        }
    }

    #[test]
    fn insert_after_rotation_lands_in_fresh_generation() {
        let filter = RotatingBloom::new(small_config());
        filter.rotate();
        filter.insert("fresh");
        for _ in 0..2 {
            filter.rotate();
        }
        // Two more rotations: "fresh" sits in the last live generation.
        assert!(filter.might_contain("fresh"));
        filter.rotate();
        assert!(!filter.might_contain("fresh"));
    }

    // ── concurrency ──────────────────────────────────────────────────

    #[test]
    fn concurrent_insert_query_rotate() {
        let filter = Arc::new(RotatingBloom::new(BloomConfig {
            generations: 4,
            capacity: 50_000,
            false_positive_rate: 0.001,
            rotation_interval: Duration::from_secs(60),
        }));

        let mut handles = Vec::new();
        for t in 0..4 {
            let f = Arc::clone(&filter);
            handles.push(std::thread::spawn(move || {
                for i in 0..5_000 {
                    let key = format!("writer-{t}-{i}");
                    f.insert(&key);
                    assert!(f.might_contain(&key));
                }
            }));
        }
        let rotator = {
            let f = Arc::clone(&filter);
            std::thread::spawn(move || {
                for _ in 0..3 {
                    std::thread::yield_now();
                    f.rotate();
                }
            })
        };
        for h in handles {
            h.join().unwrap();
        }
        rotator.join().unwrap();

        // Fewer rotations than the ring depth happened, so nothing was
        // evicted: every inserted key must still be present.
        for t in 0..4 {
            for i in 0..5_000 {
                assert!(filter.might_contain(&format!("writer-{t}-{i}")));
            }
        }
    }

    // ── background task lifecycle ────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn background_rotation_advances_the_ring() {
        let filter = Arc::new(RotatingBloom::new(BloomConfig {
            generations: 3,
            capacity: 100,
            false_positive_rate: 0.01,
            rotation_interval: Duration::from_millis(100),
        }));
        let handle = filter.start_rotation("test");

        tokio::time::sleep(Duration::from_millis(250)).await;
        tokio::task::yield_now().await;
        assert!(filter.generation_count() > 1);

        handle.stop();
    }
}
