//! Two-tier (memory + disk) cache with tamper-evident persistence.
//!
//! The memory tier is a bounded LRU with lazy TTL expiry. Entries set
//! with `persist` are also written to a flat disk directory in two
//! forms: a fast binary record and a portable JSON record. Disk reads
//! verify an integrity digest before trusting a record; a mismatch
//! deletes the record and counts as a miss, never as a hit.
//!
//! Integrity digests are full SHA-256 for small values. Values above a
//! size threshold are hashed over a deterministic sample (head + middle
//! + tail windows plus the encoded total length) and tagged `sampled:`
//! so a verifier knows which variant to reapply. This is an accepted
//! approximation for cache integrity, not a cryptographic guarantee:
//! corruption confined to the unsampled middle region can go unseen.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::MemorySnapshot;

use super::storage::AtomicStore;

/// Values at or below this many bytes get a full digest
const SAMPLE_THRESHOLD: usize = 64 * 1024;

/// Bytes hashed from the head, middle, and tail of a sampled value
const SAMPLE_WINDOW: usize = 4096;

/// Fraction of entries purged under memory pressure
const PRESSURE_PURGE_FRACTION: f64 = 0.3;

/// Resident-memory utilization that triggers a proactive purge
const PRESSURE_THRESHOLD: f64 = 0.8;

/// Cache tuning knobs
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum in-memory entries
    pub max_entries: usize,

    /// Default TTL when `set` is called without one
    pub default_ttl: Duration,

    /// Resident-memory budget used for the pressure check
    pub memory_limit_mb: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(3600),
            memory_limit_mb: 512.0,
        }
    }
}

/// Running cache counters; monotonic except via [`SkillCache::reset_stats`]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub purges: u64,
    pub integrity_failures: u64,
}

impl CacheStats {
    /// Fraction of lookups served from cache
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// An in-memory entry; visible to `get` iff `now - created_at < ttl`
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    created_at: DateTime<Utc>,
    ttl: Duration,
    #[allow(dead_code)]
    persistent: bool,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => age >= ttl,
            Err(_) => false, // absurdly large TTL never expires
        }
    }

    fn expires_at(&self) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => self.created_at + ttl,
            Err(_) => DateTime::<Utc>::MAX_UTC,
        }
    }
}

/// Fast binary disk form; the value is carried as canonical JSON bytes
/// so both forms hash identically
#[derive(Debug, Serialize, Deserialize)]
struct BinaryRecord {
    value_json: Vec<u8>,
    created_at_ms: i64,
    ttl_secs: u64,
    integrity_hash: String,
}

/// Portable text disk form
#[derive(Debug, Serialize, Deserialize)]
struct TextRecord {
    value: serde_json::Value,
    created_at: DateTime<Utc>,
    ttl_secs: u64,
    integrity_hash: String,
}

struct Inner {
    map: LruCache<String, CacheEntry>,
    stats: CacheStats,
}

/// The shared memoization cache.
///
/// Interior mutability via a mutex so a shared runtime context can be
/// used from concurrent tasks; the mutex is never held across disk I/O.
pub struct SkillCache {
    inner: Mutex<Inner>,
    store: AtomicStore,
    disk_dir: PathBuf,
    config: CacheConfig,
}

impl SkillCache {
    /// Create a cache persisting records under `disk_dir`
    pub fn new(store: AtomicStore, disk_dir: PathBuf, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).expect("max(1) is nonzero");
        Self {
            inner: Mutex::new(Inner {
                map: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
            store,
            disk_dir,
            config,
        }
    }

    /// Look up a key, consulting memory first and then the disk tier.
    ///
    /// A memory hit promotes the entry to most-recently-used. A valid
    /// disk hit is reloaded into memory before being returned.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Utc::now();

        {
            let mut inner = self.inner.lock().expect("cache mutex poisoned");
            match inner.map.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    let value = entry.value.clone();
                    inner.stats.hits += 1;
                    return Some(value);
                }
                Some(_) => {
                    // Lazily expired; drop it and fall through to disk
                    inner.map.pop(key);
                }
                None => {}
            }
        }

        match self.recover_from_disk(key, now).await {
            Some(entry) => {
                let value = entry.value.clone();
                let mut inner = self.inner.lock().expect("cache mutex poisoned");
                inner.map.push(key.to_string(), entry);
                inner.stats.hits += 1;
                Some(value)
            }
            None => {
                let mut inner = self.inner.lock().expect("cache mutex poisoned");
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a value. Evicts the least-recently-used entry when at
    /// capacity; with `persist`, also writes both disk record forms.
    pub async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
        persist: bool,
    ) -> Result<()> {
        self.purge_if_under_pressure().await;

        let entry = CacheEntry {
            value,
            created_at: Utc::now(),
            ttl: ttl.unwrap_or(self.config.default_ttl),
            persistent: persist,
        };

        if persist {
            self.persist_entry(key, &entry).await?;
        }

        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.map.push(key.to_string(), entry);
        Ok(())
    }

    /// Whether an unexpired entry for `key` is in memory (no promotion)
    pub fn has(&self, key: &str) -> bool {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .map
            .peek(key)
            .map(|e| !e.is_expired(Utc::now()))
            .unwrap_or(false)
    }

    /// Evict `fraction` of in-memory entries, nearest expiration first
    /// (cheapest to regenerate last). Returns the number evicted.
    pub fn purge(&self, fraction: f64) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let count = ((inner.map.len() as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;

        let mut by_expiry: Vec<(String, DateTime<Utc>)> = inner
            .map
            .iter()
            .map(|(k, e)| (k.clone(), e.expires_at()))
            .collect();
        by_expiry.sort_by_key(|(_, expires)| *expires);

        let victims: Vec<String> = by_expiry.into_iter().take(count).map(|(k, _)| k).collect();
        for key in &victims {
            inner.map.pop(key);
        }

        inner.stats.purges += 1;
        victims.len()
    }

    /// Drop every in-memory entry (disk records are untouched)
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.map.clear();
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("cache mutex poisoned").stats
    }

    /// Reset all counters to zero
    pub fn reset_stats(&self) {
        self.inner.lock().expect("cache mutex poisoned").stats = CacheStats::default();
    }

    /// Number of in-memory entries
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").map.len()
    }

    /// Whether the memory tier is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn purge_if_under_pressure(&self) {
        let resident = MemorySnapshot::capture().resident_mb;
        if resident > self.config.memory_limit_mb * PRESSURE_THRESHOLD {
            let evicted = self.purge(PRESSURE_PURGE_FRACTION);
            debug!(resident_mb = resident, evicted, "Memory pressure purge");
        }
    }

    async fn persist_entry(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let value_json =
            serde_json::to_vec(&entry.value).context("Failed to serialize cache value")?;
        let integrity_hash = compute_hash(&value_json);
        let ttl_secs = entry.ttl.as_secs();

        let binary = BinaryRecord {
            value_json: value_json.clone(),
            created_at_ms: entry.created_at.timestamp_millis(),
            ttl_secs,
            integrity_hash: integrity_hash.clone(),
        };
        let text = TextRecord {
            value: entry.value.clone(),
            created_at: entry.created_at,
            ttl_secs,
            integrity_hash,
        };

        let binary_bytes =
            bincode::serialize(&binary).context("Failed to encode binary cache record")?;
        let text_bytes =
            serde_json::to_vec_pretty(&text).context("Failed to encode text cache record")?;

        // Either form alone is enough to recover; only fail when both do
        let binary_result = self.store.write(&self.binary_path(key), &binary_bytes).await;
        let text_result = self.store.write(&self.text_path(key), &text_bytes).await;

        match (&binary_result, &text_result) {
            (Err(bin_err), Err(_)) => {
                Err(anyhow::anyhow!("Failed to persist cache record: {}", bin_err))
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                warn!(key, error = %e, "One cache record form failed to persist");
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Disk recovery on a memory miss: binary record first (faster to
    /// deserialize), then the text fallback, with expiry and integrity
    /// checks on both.
    async fn recover_from_disk(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        if let Some(entry) = self.try_binary_record(key, now).await {
            return Some(entry);
        }
        self.try_text_record(key, now).await
    }

    async fn try_binary_record(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let path = self.binary_path(key);
        let bytes = tokio::fs::read(&path).await.ok()?;

        let record: BinaryRecord = match bincode::deserialize(&bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!(key, error = %e, "Unreadable binary cache record, discarding");
                self.discard_corrupt(&path).await;
                return None;
            }
        };

        let created_at = DateTime::<Utc>::from_timestamp_millis(record.created_at_ms)?;
        let ttl = Duration::from_secs(record.ttl_secs);
        if is_expired(created_at, ttl, now) {
            let _ = self.store.delete(&path).await;
            return None;
        }

        if !verify_hash(&record.value_json, &record.integrity_hash) {
            self.discard_corrupt(&path).await;
            return None;
        }

        let value = match serde_json::from_slice(&record.value_json) {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "Binary record payload is not valid JSON");
                self.discard_corrupt(&path).await;
                return None;
            }
        };

        Some(CacheEntry {
            value,
            created_at,
            ttl,
            persistent: true,
        })
    }

    async fn try_text_record(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let path = self.text_path(key);
        let bytes = tokio::fs::read(&path).await.ok()?;

        let record: TextRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!(key, error = %e, "Unreadable text cache record, discarding");
                self.discard_corrupt(&path).await;
                return None;
            }
        };

        let ttl = Duration::from_secs(record.ttl_secs);
        if is_expired(record.created_at, ttl, now) {
            let _ = self.store.delete(&path).await;
            return None;
        }

        let value_json = serde_json::to_vec(&record.value).ok()?;
        if !verify_hash(&value_json, &record.integrity_hash) {
            self.discard_corrupt(&path).await;
            return None;
        }

        Some(CacheEntry {
            value: record.value,
            created_at: record.created_at,
            ttl,
            persistent: true,
        })
    }

    /// Tampered or unreadable record: delete it and count the failure.
    /// Never surfaces as an error to the caller; the lookup is a miss.
    async fn discard_corrupt(&self, path: &Path) {
        let _ = self.store.delete(path).await;
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.stats.integrity_failures += 1;
    }

    fn binary_path(&self, key: &str) -> PathBuf {
        self.disk_dir.join(format!("{}.bin", sanitize_key(key)))
    }

    fn text_path(&self, key: &str) -> PathBuf {
        self.disk_dir.join(format!("{}.json", sanitize_key(key)))
    }
}

fn is_expired(created_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(created_at);
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => age >= ttl,
        Err(_) => false,
    }
}

/// Turn an arbitrary cache key into a safe flat file name.
///
/// A short digest suffix keeps distinct keys distinct even when their
/// sanitized forms collide.
pub fn sanitize_key(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();

    format!("{}-{}", safe, hex::encode(&digest[..8]))
}

/// Compute the integrity digest for serialized value bytes.
///
/// Full SHA-256 under the threshold; above it, a digest over head,
/// middle, and tail windows plus the encoded total length (the length
/// catches truncation).
pub fn compute_hash(bytes: &[u8]) -> String {
    if bytes.len() <= SAMPLE_THRESHOLD {
        compute_full_hash(bytes)
    } else {
        compute_sampled_hash(bytes)
    }
}

fn compute_full_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("full:{}", hex::encode(hasher.finalize()))
}

fn compute_sampled_hash(bytes: &[u8]) -> String {
    let len = bytes.len();
    let mid_start = (len / 2).saturating_sub(SAMPLE_WINDOW / 2);

    let mut hasher = Sha256::new();
    hasher.update(&bytes[..SAMPLE_WINDOW.min(len)]);
    hasher.update(&bytes[mid_start..(mid_start + SAMPLE_WINDOW).min(len)]);
    hasher.update(&bytes[len.saturating_sub(SAMPLE_WINDOW)..]);
    hasher.update((len as u64).to_le_bytes());
    format!("sampled:{}", hex::encode(hasher.finalize()))
}

/// Recompute the variant named by the stored digest's marker and compare
pub fn verify_hash(bytes: &[u8], stored: &str) -> bool {
    match stored.split_once(':') {
        Some(("full", _)) => compute_full_hash(bytes) == stored,
        Some(("sampled", _)) => compute_sampled_hash(bytes) == stored,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tier::TierGuard;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_cache(temp: &TempDir, max_entries: usize) -> SkillCache {
        let guard = TierGuard::new(
            PathBuf::from("/nonexistent/personal"),
            PathBuf::from("/nonexistent/confidential"),
        );
        let store = AtomicStore::new(Arc::new(guard));
        SkillCache::new(
            store,
            temp.path().join("cache"),
            CacheConfig {
                max_entries,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp, 10);

        cache.set("k", json!({"n": 1}), None, false).await.unwrap();
        assert_eq!(cache.get("k").await, Some(json!({"n": 1})));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp, 10);

        cache
            .set("k", json!("v"), Some(Duration::from_secs(0)), false)
            .await
            .unwrap();

        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.stats().misses, 1);
        assert!(!cache.has("k"));
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp, 2);

        cache.set("a", json!(1), None, false).await.unwrap();
        cache.set("b", json!(2), None, false).await.unwrap();

        // Touch "a" so "b" becomes least recently used
        assert!(cache.get("a").await.is_some());

        cache.set("c", json!(3), None, false).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
    }

    #[tokio::test]
    async fn test_persist_survives_memory_clear() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp, 10);

        cache
            .set("k", json!({"payload": [1, 2, 3]}), None, true)
            .await
            .unwrap();
        cache.clear();
        assert!(cache.is_empty());

        assert_eq!(cache.get("k").await, Some(json!({"payload": [1, 2, 3]})));
        // Reloaded into memory by the disk hit
        assert!(cache.has("k"));
    }

    #[tokio::test]
    async fn test_tampered_binary_record_falls_back_to_text() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp, 10);

        cache.set("k", json!("original"), None, true).await.unwrap();
        cache.clear();

        // Corrupt the binary record; the text record is intact
        let bin_path = temp
            .path()
            .join("cache")
            .join(format!("{}.bin", sanitize_key("k")));
        std::fs::write(&bin_path, b"garbage").unwrap();

        assert_eq!(cache.get("k").await, Some(json!("original")));
        assert_eq!(cache.stats().integrity_failures, 1);
        assert!(!bin_path.exists());
    }

    #[tokio::test]
    async fn test_both_records_tampered_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp, 10);

        cache.set("k", json!("original"), None, true).await.unwrap();
        cache.clear();

        let dir = temp.path().join("cache");
        std::fs::write(dir.join(format!("{}.bin", sanitize_key("k"))), b"junk").unwrap();
        std::fs::write(dir.join(format!("{}.json", sanitize_key("k"))), b"junk").unwrap();

        assert_eq!(cache.get("k").await, None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.integrity_failures, 2);
    }

    #[tokio::test]
    async fn test_purge_takes_nearest_expiry_first() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(&temp, 10);

        cache
            .set("soon", json!(1), Some(Duration::from_secs(10)), false)
            .await
            .unwrap();
        cache
            .set("later", json!(2), Some(Duration::from_secs(10_000)), false)
            .await
            .unwrap();

        let evicted = cache.purge(0.5);
        assert_eq!(evicted, 1);
        assert!(!cache.has("soon"));
        assert!(cache.has("later"));
        assert_eq!(cache.stats().purges, 1);
    }

    #[test]
    fn test_full_hash_round_trip() {
        let bytes = b"small payload";
        let hash = compute_hash(bytes);
        assert!(hash.starts_with("full:"));
        assert!(verify_hash(bytes, &hash));
        assert!(!verify_hash(b"small payloaD", &hash));
    }

    #[test]
    fn test_sampled_hash_for_large_payloads() {
        let bytes = vec![7u8; SAMPLE_THRESHOLD + 1000];
        let hash = compute_hash(&bytes);
        assert!(hash.starts_with("sampled:"));
        assert!(verify_hash(&bytes, &hash));

        // Truncation changes the encoded length, so it is caught
        assert!(!verify_hash(&bytes[..bytes.len() - 1], &hash));

        // Head corruption is caught
        let mut corrupted = bytes.clone();
        corrupted[0] = 0;
        assert!(!verify_hash(&corrupted, &hash));
    }

    #[test]
    fn test_sanitize_key_distinguishes_colliding_keys() {
        let a = sanitize_key("a/b");
        let b = sanitize_key("a:b");
        assert_ne!(a, b);
        assert!(a.starts_with("a_b-"));
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
