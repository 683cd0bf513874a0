//! Token Cache - bounded, TTL-aware store for introspection verdicts.
//!
//! Entries expire a fixed TTL after insertion; reads never extend it and an
//! expired entry is never returned, evicted or not. Total resident cost never
//! exceeds `max_cost`. When a new key does not fit, a handful of resident
//! entries are sampled and the least frequently used one is the eviction
//! candidate; the newcomer is only admitted if its estimated access frequency
//! is at least the candidate's (TinyLFU-style admission). A rejected `set` is
//! not an error: the next `get` simply misses.
//!
//! Access frequencies live in a small count-min sketch with 4-bit counters
//! that are periodically halved. Reads are buffered and folded into the sketch
//! in batches of `buffer_items`.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::config::CacheConfig;
use crate::ports::TimeSource;

/// Entries inspected when looking for an eviction candidate
const EVICTION_SAMPLE: usize = 5;

/// Sketch rows
const SKETCH_DEPTH: usize = 4;

/// Counter ceiling (4-bit counters)
const SKETCH_MAX: u8 = 15;

const ROW_SEEDS: [u64; SKETCH_DEPTH] = [
    0x9E37_79B9_7F4A_7C15,
    0xC2B2_AE3D_27D4_EB4F,
    0x1656_67B1_9E37_79F9,
    0x27D4_EB2F_1656_67C5,
];

/// Count-min sketch of recent access frequencies
struct FrequencySketch {
    rows: Vec<Vec<u8>>,
    width: usize,
    additions: usize,
    reset_at: usize,
}

impl FrequencySketch {
    fn new(num_counters: usize) -> Self {
        let width = num_counters.max(1);
        Self {
            rows: vec![vec![0; width]; SKETCH_DEPTH],
            width,
            additions: 0,
            reset_at: width.saturating_mul(10),
        }
    }

    fn index(&self, hash: u64, row: usize) -> usize {
        let mixed = (hash ^ ROW_SEEDS[row]).wrapping_mul(0xFF51_AFD7_ED55_8CCD);
        ((mixed >> 32) as usize) % self.width
    }

    fn increment(&mut self, hash: u64) {
        for row in 0..SKETCH_DEPTH {
            let idx = self.index(hash, row);
            let counter = &mut self.rows[row][idx];
            if *counter < SKETCH_MAX {
                *counter += 1;
            }
        }
        self.additions += 1;
        if self.additions >= self.reset_at {
            self.reset();
        }
    }

    fn estimate(&self, hash: u64) -> u8 {
        (0..SKETCH_DEPTH)
            .map(|row| self.rows[row][self.index(hash, row)])
            .min()
            .unwrap_or(0)
    }

    /// Halve every counter so old popularity fades
    fn reset(&mut self) {
        for row in &mut self.rows {
            for counter in row.iter_mut() {
                *counter >>= 1;
            }
        }
        self.additions = 0;
    }
}

struct Entry<V> {
    value: V,
    cost: u64,
    key_hash: u64,
    expires_at_ms: u64,
}

struct CacheInner<V> {
    entries: HashMap<String, Entry<V>>,
    used_cost: u64,
    sketch: FrequencySketch,
    read_buffer: Vec<u64>,
    /// Start of the next eviction sample in iteration order
    next_sample: usize,
}

impl<V> CacheInner<V> {
    fn flush_reads(&mut self) {
        for hash in self.read_buffer.drain(..) {
            self.sketch.increment(hash);
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.used_cost -= entry.cost;
        Some(entry)
    }

    fn purge_expired(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        let mut released = 0;
        self.entries.retain(|_, entry| {
            if entry.expires_at_ms <= now_ms {
                released += entry.cost;
                false
            } else {
                true
            }
        });
        self.used_cost -= released;
        before - self.entries.len()
    }

    /// Least frequently used key among a small sample.
    ///
    /// Each call samples the window after the previous one, so every resident
    /// is eventually considered.
    fn eviction_candidate(&mut self) -> Option<(String, u8)> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }
        let offset = self.next_sample % len;
        self.next_sample = offset + EVICTION_SAMPLE;

        self.entries
            .iter()
            .cycle()
            .skip(offset)
            .take(EVICTION_SAMPLE.min(len))
            .map(|(key, entry)| (key, self.sketch.estimate(entry.key_hash)))
            .min_by_key(|(_, freq)| *freq)
            .map(|(key, freq)| (key.clone(), freq))
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub admitted: AtomicU64,
    pub rejected: AtomicU64,
    pub evicted: AtomicU64,
}

/// Bounded TTL cache keyed by string
pub struct TokenCache<V> {
    inner: Mutex<CacheInner<V>>,
    ttl_ms: u64,
    max_cost: u64,
    buffer_items: usize,
    clock: Arc<dyn TimeSource>,
    stats: CacheStats,
}

impl<V: Clone> TokenCache<V> {
    /// Create a cache from its configuration
    pub fn new(config: &CacheConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                used_cost: 0,
                sketch: FrequencySketch::new(config.num_counters),
                read_buffer: Vec::with_capacity(config.buffer_items),
                next_sample: 0,
            }),
            ttl_ms: config.ttl.as_millis() as u64,
            max_cost: config.max_cost,
            buffer_items: config.buffer_items.max(1),
            clock,
            stats: CacheStats::default(),
        }
    }

    /// Look up `key`. Expired entries are dropped and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let hash = key_hash(key);
        let mut inner = self.inner.lock();

        inner.read_buffer.push(hash);
        if inner.read_buffer.len() >= self.buffer_items {
            inner.flush_reads();
        }

        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at_ms > now => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.remove(key);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert `value` under `key` with the given cost.
    ///
    /// Returns false when the entry was not admitted.
    pub fn set(&self, key: &str, value: V, cost: u64) -> bool {
        if cost > self.max_cost {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let now = self.clock.now_millis();
        let hash = key_hash(key);
        let mut inner = self.inner.lock();

        // Updates bypass admission; the key already earned its place
        let is_update = inner.remove(key).is_some();

        if inner.used_cost + cost > self.max_cost {
            inner.purge_expired(now);
        }

        if inner.used_cost + cost > self.max_cost {
            inner.flush_reads();
            let incoming = inner.sketch.estimate(hash);

            while inner.used_cost + cost > self.max_cost {
                let Some((victim, victim_freq)) = inner.eviction_candidate() else {
                    break;
                };
                if !is_update && incoming < victim_freq {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        incoming_freq = incoming,
                        victim_freq = victim_freq,
                        "Cache admission rejected"
                    );
                    return false;
                }
                inner.remove(&victim);
                self.stats.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                cost,
                key_hash: hash,
                expires_at_ms: now.saturating_add(self.ttl_ms),
            },
        );
        inner.used_cost += cost;
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        self.inner.lock().purge_expired(now)
    }

    /// Number of resident entries (expired ones included until purged)
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total cost of resident entries
    pub fn used_cost(&self) -> u64 {
        self.inner.lock().used_cost
    }

    pub fn max_cost(&self) -> u64 {
        self.max_cost
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

fn key_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Background task purging expired entries
pub async fn cleanup_task<V: Clone>(cache: Arc<TokenCache<V>>, interval: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        let removed = cache.purge_expired();
        if removed > 0 {
            debug!(removed = removed, "Purged expired cache entries");
        }
    }
}
