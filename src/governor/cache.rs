//! Two-tier (memory + JSON document) write-through cache for registry metadata

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::ecosystem::Ecosystem;
use crate::governor::error::CacheError;

/// Format version written into every entry
const ENTRY_FORMAT_VERSION: &str = "1.0";

/// Suffix of the per-ecosystem cache documents
const DOCUMENT_SUFFIX: &str = "_cache.json";

type Document = IndexMap<String, CacheEntry>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: serde_json::Value,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_format_version")]
    pub version: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_format_version() -> String {
    ENTRY_FORMAT_VERSION.to_string()
}

fn default_source() -> String {
    "api".to_string()
}

impl CacheEntry {
    fn new(data: serde_json::Value, now: DateTime<Utc>, ttl_hours: Option<i64>) -> Self {
        Self {
            data,
            created_at: now,
            // A TTL too large to represent falls back to the max age
            expires_at: ttl_hours.and_then(|hours| {
                Duration::try_hours(hours.max(0)).and_then(|ttl| now.checked_add_signed(ttl))
            }),
            version: default_format_version(),
            source: default_source(),
        }
    }

    /// Older documents encoded a short TTL as a timestamp in the future.
    fn normalize(mut self, now: DateTime<Utc>) -> Self {
        if self.expires_at.is_none() && self.created_at > now {
            self.expires_at = Some(self.created_at);
            self.created_at = now;
        }
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => now - self.created_at > max_age,
        }
    }
}

/// Builds the cache key `sha256("ecosystem:package:version")`, with
/// `latest` standing in for a missing version.
pub fn cache_key(ecosystem: Ecosystem, package: &str, version: Option<&str>) -> String {
    let raw = format!(
        "{}:{}:{}",
        ecosystem.as_str(),
        package,
        version.unwrap_or("latest")
    );
    hex::encode(Sha256::digest(raw.as_bytes()))
}

pub struct ResultCache {
    cache_dir: PathBuf,
    max_age: Duration,
    enabled: bool,
    memory: Mutex<HashMap<(Ecosystem, String), CacheEntry>>,
}

impl ResultCache {
    pub fn new(cache_dir: &Path, max_age_days: i64, enabled: bool) -> Self {
        debug!(
            "Initializing result cache at {:?} (max age {} days, enabled: {})",
            cache_dir, max_age_days, enabled
        );
        Self {
            cache_dir: cache_dir.to_path_buf(),
            max_age: Duration::try_days(max_age_days.max(0)).unwrap_or(Duration::MAX),
            enabled,
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn lock_memory(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<(Ecosystem, String), CacheEntry>>, CacheError> {
        self.memory.lock().map_err(|_| CacheError::LockPoisoned)
    }

    fn document_path(&self, ecosystem: Ecosystem) -> PathBuf {
        self.cache_dir
            .join(format!("{}{}", ecosystem.as_str(), DOCUMENT_SUFFIX))
    }

    fn load_document(&self, ecosystem: Ecosystem) -> Result<Document, CacheError> {
        let path = self.document_path(ecosystem);
        if !path.exists() {
            return Ok(Document::new());
        }
        let content = std::fs::read_to_string(&path)?;
        let raw: IndexMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        // One bad entry must not hide the rest of the document
        Ok(raw
            .into_iter()
            .filter_map(|(key, value)| {
                serde_json::from_value::<CacheEntry>(value)
                    .inspect_err(|e| {
                        warn!("Skipping unreadable {} cache entry {}: {}", ecosystem, key, e)
                    })
                    .ok()
                    .map(|entry| (key, entry))
            })
            .collect())
    }

    fn save_document(&self, ecosystem: Ecosystem, document: &Document) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let path = self.document_path(ecosystem);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(document)?)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn lookup(
        &self,
        ecosystem: Ecosystem,
        key: String,
    ) -> Result<Option<serde_json::Value>, CacheError> {
        let now = Utc::now();
        let mut memory = self.lock_memory()?;
        let memory_key = (ecosystem, key);

        if let Some(entry) = memory.get(&memory_key) {
            if entry.is_expired(now, self.max_age) {
                memory.remove(&memory_key);
                return Ok(None);
            }
            return Ok(Some(entry.data.clone()));
        }

        let document = self.load_document(ecosystem)?;
        match document.get(&memory_key.1) {
            Some(entry) => {
                let entry = entry.clone().normalize(now);
                if entry.is_expired(now, self.max_age) {
                    return Ok(None);
                }
                let data = entry.data.clone();
                memory.insert(memory_key, entry);
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    fn store(
        &self,
        ecosystem: Ecosystem,
        key: String,
        entry: CacheEntry,
    ) -> Result<(), CacheError> {
        let mut memory = self.lock_memory()?;
        memory.insert((ecosystem, key.clone()), entry.clone());

        let mut document = self.load_document(ecosystem).unwrap_or_else(|e| {
            warn!(
                "Discarding unreadable cache document for {}: {}",
                ecosystem, e
            );
            Document::new()
        });
        document.insert(key, entry);
        self.save_document(ecosystem, &document)
    }

    /// Returns the cached payload, or `None` on a miss, an expired entry
    /// or an unreadable document.
    pub fn get(
        &self,
        ecosystem: Ecosystem,
        package: &str,
        version: Option<&str>,
    ) -> Option<serde_json::Value> {
        if !self.enabled {
            return None;
        }
        let key = cache_key(ecosystem, package, version);
        self.lookup(ecosystem, key)
            .inspect_err(|e| warn!("Cache read failed for {}/{}: {}", ecosystem, package, e))
            .unwrap_or(None)
    }

    /// Writes both tiers. With `ttl_hours` the entry expires after that many
    /// hours instead of the configured max age.
    pub fn set(
        &self,
        ecosystem: Ecosystem,
        package: &str,
        data: serde_json::Value,
        version: Option<&str>,
        ttl_hours: Option<i64>,
    ) {
        if !self.enabled {
            return;
        }
        let key = cache_key(ecosystem, package, version);
        let entry = CacheEntry::new(data, Utc::now(), ttl_hours);
        let _ = self
            .store(ecosystem, key, entry)
            .inspect_err(|e| warn!("Cache write failed for {}/{}: {}", ecosystem, package, e));
    }

    /// Packages without a usable cache entry, in input order
    pub fn batch_candidates(&self, ecosystem: Ecosystem, packages: &[String]) -> Vec<String> {
        packages
            .iter()
            .filter(|package| self.get(ecosystem, package, None).is_none())
            .cloned()
            .collect()
    }

    /// Removes memory entries and persisted documents for one ecosystem, or
    /// for all of them. Returns the number of documents deleted.
    pub fn clear(&self, ecosystem: Option<Ecosystem>) -> Result<usize, CacheError> {
        let mut memory = self.lock_memory()?;
        match ecosystem {
            Some(ecosystem) => memory.retain(|(eco, _), _| *eco != ecosystem),
            None => memory.clear(),
        }

        if !self.cache_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let matches = match ecosystem {
                Some(ecosystem) => {
                    file_name == format!("{}{}", ecosystem.as_str(), DOCUMENT_SUFFIX)
                }
                None => file_name.ends_with(DOCUMENT_SUFFIX),
            };
            if matches {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }

        info!("Cleared {} cache document(s)", removed);
        Ok(removed)
    }

    pub fn memory_entries(&self) -> usize {
        self.lock_memory().map(|m| m.len()).unwrap_or(0)
    }

    pub fn disk_documents(&self) -> usize {
        std::fs::read_dir(&self.cache_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| {
                        e.file_name()
                            .to_str()
                            .is_some_and(|n| n.ends_with(DOCUMENT_SUFFIX))
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}
