//! File-per-entry TTL cache.
//!
//! The cache directory is a well-known location so the widget process can
//! read the same entries. Writes are atomic (temp file + rename) so a
//! concurrent reader never observes a half-written entry. Expiry is decided
//! at load time and exposed to the caller; nothing is evicted on load — a
//! periodic [`OfflineCache::clear_expired`] sweep does that.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::key::{scope_matches_website, CacheKey};
use crate::CacheError;

/// On-disk envelope. `data` stays a raw JSON value so one envelope shape
/// serves every cached type.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    data: Value,
}

/// A loaded entry. Expiry status is part of the result on purpose: the cache
/// never silently serves fresh-looking data — staleness decisions belong to
/// the caller.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

pub struct OfflineCache {
    dir: PathBuf,
}

impl OfflineCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Persist `value` under `key` with the kind's fixed TTL. All-or-nothing:
    /// the entry is written to a temp file and renamed into place.
    pub fn save<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), CacheError> {
        let now = Utc::now();
        let envelope = Envelope {
            cached_at: now,
            expires_at: now + Duration::seconds(key.kind.ttl_secs()),
            data: serde_json::to_value(value)?,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        atomic_write(&self.entry_path(key), &bytes)
    }

    /// Load the entry for `key`. Missing and corrupt entries are both
    /// absent; corrupt files are removed so they stop costing a parse on
    /// every lookup.
    pub fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let path = self.entry_path(key);
        let bytes = fs::read(&path).ok()?;
        match decode::<T>(&bytes) {
            Some(entry) => Some(entry),
            None => {
                warn!(key = %key, "removing corrupt cache entry");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    pub fn delete(&self, key: &CacheKey) {
        let _ = fs::remove_file(self.entry_path(key));
    }

    /// Sweep entries whose `expires_at` has passed. Returns how many were
    /// removed.
    pub fn clear_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.entry_files() {
            let expired = fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<Envelope>(&bytes).ok())
                .map(|envelope| now > envelope.expires_at)
                // Unreadable entries count as expired; the sweep is where
                // they get cleaned up.
                .unwrap_or(true);
            if expired && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
        removed
    }

    pub fn clear_all(&self) {
        for path in self.entry_files() {
            let _ = fs::remove_file(path);
        }
    }

    /// Drop every entry scoped to the website, across all kinds and ranges.
    pub fn clear_for_website(&self, website_id: &str) {
        for path in self.entry_files() {
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(CacheKey::scope_of_file_name)
                .map(|scope| scope_matches_website(scope, website_id))
                .unwrap_or(false);
            if matches {
                let _ = fs::remove_file(path);
            }
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.entry_files()
            .into_iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum()
    }

    fn entry_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().and_then(|ext| ext.to_str()) == Some("json")
            })
            .collect()
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Option<CacheEntry<T>> {
    let envelope: Envelope = serde_json::from_slice(bytes).ok()?;
    let data: T = serde_json::from_value(envelope.data).ok()?;
    Some(CacheEntry {
        data,
        cached_at: envelope.cached_at,
        expires_at: envelope.expires_at,
    })
}

pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let tmp = path.with_extension(format!(
        "tmp-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0)
    ));
    fs::write(&tmp, bytes)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheKind;
    use sitepulse_core::daterange::DateRange;
    use sitepulse_core::model::{Stats, StatValue};

    fn unique_cache_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("unix time")
            .as_nanos();
        std::env::temp_dir().join(format!("sitepulse-cache-{tag}-{nanos}"))
    }

    fn sample_stats() -> Stats {
        Stats {
            visitors: StatValue::new(120, 20),
            pageviews: StatValue::new(300, 50),
            visits: StatValue::new(150, 0),
            bounces: StatValue::new(40, -10),
            total_time: StatValue::new(9000, 1000),
        }
    }

    #[test]
    fn round_trip_preserves_data_and_is_fresh() {
        let cache = OfflineCache::open(unique_cache_dir("roundtrip")).expect("open");
        let key = CacheKey::for_website(CacheKind::Stats, "acc", "w1", &DateRange::Today);
        cache.save(&key, &sample_stats()).expect("save");

        let entry: CacheEntry<Stats> = cache.load(&key).expect("entry present");
        assert_eq!(entry.data, sample_stats());
        assert!(!entry.is_expired(), "fresh immediately after save");
    }

    #[test]
    fn expired_data_is_flagged_but_still_retrievable() {
        let cache = OfflineCache::open(unique_cache_dir("expiry")).expect("open");
        let key = CacheKey::for_website(CacheKind::Stats, "acc", "w1", &DateRange::Today);
        cache.save(&key, &sample_stats()).expect("save");

        let entry: CacheEntry<Stats> = cache.load(&key).expect("entry present");
        let past_ttl = entry.expires_at + Duration::seconds(1);
        assert!(entry.is_expired_at(past_ttl));
        assert_eq!(entry.data, sample_stats(), "expired entries are not deleted on load");

        // Still on disk; eviction is the sweep's job, not load's.
        let again: Option<CacheEntry<Stats>> = cache.load(&key);
        assert!(again.is_some());
    }

    #[test]
    fn corrupt_entry_is_absent_and_removed() {
        let dir = unique_cache_dir("corrupt");
        let cache = OfflineCache::open(&dir).expect("open");
        let key = CacheKey::for_website(CacheKind::Stats, "acc", "w1", &DateRange::Today);
        fs::write(dir.join(format!("{key}.json")), b"{not json").expect("write garbage");

        let loaded: Option<CacheEntry<Stats>> = cache.load(&key);
        assert!(loaded.is_none(), "corrupt entries degrade to a miss");
        assert!(!dir.join(format!("{key}.json")).exists(), "corrupt file proactively removed");
    }

    #[test]
    fn clear_for_website_only_touches_that_scope() {
        let cache = OfflineCache::open(unique_cache_dir("scope")).expect("open");
        let w1 = CacheKey::for_website(CacheKind::Stats, "acc", "w1", &DateRange::Today);
        let w2 = CacheKey::for_website(CacheKind::Stats, "acc", "w2", &DateRange::Today);
        let account_wide = CacheKey::for_account(CacheKind::Websites, "acc");
        cache.save(&w1, &sample_stats()).expect("save w1");
        cache.save(&w2, &sample_stats()).expect("save w2");
        cache.save(&account_wide, &vec!["w1", "w2"]).expect("save list");

        cache.clear_for_website("w1");

        assert!(cache.load::<Stats>(&w1).is_none());
        assert!(cache.load::<Stats>(&w2).is_some());
        assert!(cache.load::<Vec<String>>(&account_wide).is_some());
    }

    #[test]
    fn clear_expired_removes_only_past_ttl_entries() {
        let dir = unique_cache_dir("sweep");
        let cache = OfflineCache::open(&dir).expect("open");
        let fresh = CacheKey::for_website(CacheKind::Stats, "acc", "w1", &DateRange::Today);
        cache.save(&fresh, &sample_stats()).expect("save fresh");

        // Hand-craft an already-expired entry on disk.
        let stale = CacheKey::for_website(CacheKind::Stats, "acc", "w2", &DateRange::Today);
        let envelope = Envelope {
            cached_at: Utc::now() - Duration::hours(3),
            expires_at: Utc::now() - Duration::hours(2),
            data: serde_json::to_value(sample_stats()).expect("to value"),
        };
        fs::write(
            dir.join(format!("{stale}.json")),
            serde_json::to_vec(&envelope).expect("to vec"),
        )
        .expect("write stale");

        let removed = cache.clear_expired();
        assert_eq!(removed, 1);
        assert!(cache.load::<Stats>(&fresh).is_some());
        assert!(cache.load::<Stats>(&stale).is_none());
    }

    #[test]
    fn size_bytes_reflects_stored_entries() {
        let cache = OfflineCache::open(unique_cache_dir("size")).expect("open");
        assert_eq!(cache.size_bytes(), 0);
        let key = CacheKey::for_website(CacheKind::Stats, "acc", "w1", &DateRange::Today);
        cache.save(&key, &sample_stats()).expect("save");
        assert!(cache.size_bytes() > 0);
        cache.clear_all();
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn save_overwrites_atomically_without_leftover_temp_files() {
        let dir = unique_cache_dir("atomic");
        let cache = OfflineCache::open(&dir).expect("open");
        let key = CacheKey::for_website(CacheKind::Stats, "acc", "w1", &DateRange::Today);
        cache.save(&key, &sample_stats()).expect("first save");
        cache.save(&key, &Stats::default()).expect("second save");

        let entry: CacheEntry<Stats> = cache.load(&key).expect("entry");
        assert_eq!(entry.data, Stats::default());
        let leftovers: Vec<_> = fs::read_dir(&dir)
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) != Some("json"))
            .collect();
        assert!(leftovers.is_empty(), "temp files must not accumulate");
    }
}
