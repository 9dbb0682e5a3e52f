//! # cache.rs
//!
//! Cache codec and file store. The codec stores and restores unconditionally;
//! expiry is decided by the caller through [`CacheEntry::is_expired`].

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::catalog::{Catalog, Warning};
use crate::config::InventoryConfig;
use crate::error::CacheError;

/// Bumped whenever the stored layout changes; other versions read as invalid.
pub const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub catalog: Catalog,
    /// Warnings of the build that produced `catalog`, replayed on a hit.
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl CacheEntry {
    pub fn new(catalog: Catalog, created_at: DateTime<Utc>) -> Self {
        Self {
            version: FORMAT_VERSION,
            created_at,
            catalog,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<Warning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// True once the entry is older than `timeout`. Entries stamped in the
    /// future (clock skew) are not expired.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match now.signed_duration_since(self.created_at).to_std() {
            Ok(age) => age > timeout,
            Err(_) => false,
        }
    }
}

pub fn encode(entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(entry).map_err(|e| CacheError::Encode(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<CacheEntry, CacheError> {
    let entry: CacheEntry =
        serde_json::from_slice(bytes).map_err(|e| CacheError::Decode(e.to_string()))?;
    if entry.version != FORMAT_VERSION {
        return Err(CacheError::Decode(format!(
            "unsupported format version {} (expected {})",
            entry.version, FORMAT_VERSION
        )));
    }
    Ok(entry)
}

/// Cache key for a configuration. Any option that changes the catalog
/// changes the key.
pub fn cache_key(config: &InventoryConfig) -> String {
    let mut hasher = Sha256::new();
    for site in &config.sites {
        hasher.update(site.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(site.host.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(format!("{:?}\n", config.group_by));
    hasher.update(format!("{:?}\n", config.filters.status));
    hasher.update(format!(
        "{:?}\n",
        config.filters.name_pattern.as_ref().map(|r| r.as_str())
    ));
    hasher.update(format!("{:?}\n", config.filters.fields));
    hasher.update(format!(
        "{}\n{}\n{}\n",
        config.hostname_template, config.hostvar_prefix, config.include_stopped
    ));

    let digest: String = hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("vergeos_vms_{digest}")
}

/// One JSON file per cache key under a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Stored blob for `key`, or `None` when there is none.
    pub async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!("Read {} byte(s) from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the blob for `key`. Readers see the old or the new blob,
    /// never a partial one.
    pub async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let dir = self.dir.clone();
        let path = self.path(key);
        let bytes = bytes.to_vec();

        let written = tokio::task::spawn_blocking(move || {
            // Uniquely named per call; dropped (and removed) if persisting fails.
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok::<_, std::io::Error>((path, bytes.len()))
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!("Wrote {} byte(s) to {}", written.1, written.0.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::HostVars;
    use crate::config::SiteSpec;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn host(vars: serde_json::Value) -> HostVars {
        serde_json::from_value(vars).unwrap()
    }

    fn rich_catalog() -> Catalog {
        let mut catalog = Catalog::default();
        catalog.hosts.insert(
            "denver_bare".into(),
            host(json!({"vergeos_tags": [], "vergeos_nics": [], "vergeos_ip": null})),
        );
        catalog.hosts.insert(
            "denver_web1".into(),
            host(json!({
                "vergeos_tags": ["production", "web"],
                "vergeos_ip": "10.0.0.1",
                "vergeos_nics": [
                    {"machine": 101, "ipaddress": "10.0.0.1", "macaddress": "52:54:00:00:00:01"},
                    {"machine": 101, "ipaddress": "10.0.0.2", "macaddress": "52:54:00:00:00:02"}
                ],
                "vergeos_vm_data": {"$key": 1, "name": "web1", "nested": {"a": [1, 2.5, true]}}
            })),
        );
        catalog.groups.insert(
            "site_denver".into(),
            BTreeSet::from(["denver_bare".to_string(), "denver_web1".to_string()]),
        );
        catalog.groups.insert("tag_web".into(), BTreeSet::from(["denver_web1".to_string()]));
        catalog
    }

    #[test]
    fn round_trip_preserves_catalog() {
        for catalog in [Catalog::default(), rich_catalog()] {
            let entry = CacheEntry::new(catalog, at(1_700_000_000));
            let restored = decode(&encode(&entry).unwrap()).unwrap();
            assert_eq!(restored, entry);
        }
    }

    #[test]
    fn warnings_survive_the_round_trip() {
        let entry = CacheEntry::new(rich_catalog(), at(1_700_000_000))
            .with_warnings(vec![Warning::for_site("chicago", "Connection failed: refused")]);
        let restored = decode(&encode(&entry).unwrap()).unwrap();
        assert_eq!(restored.warnings, entry.warnings);
    }

    #[test]
    fn malformed_or_truncated_blobs_are_invalid() {
        let bytes = encode(&CacheEntry::new(rich_catalog(), at(0))).unwrap();

        assert!(matches!(decode(&bytes[..bytes.len() / 2]), Err(CacheError::Decode(_))));
        assert!(matches!(decode(b""), Err(CacheError::Decode(_))));
        assert!(matches!(decode(b"not json"), Err(CacheError::Decode(_))));
        assert!(matches!(decode(br#"{"hosts": {}}"#), Err(CacheError::Decode(_))));
    }

    #[test]
    fn encode_and_decode_failures_are_told_apart() {
        let encode_err = CacheError::Encode("key must be a string".into()).to_string();
        let decode_err = decode(b"[]").unwrap_err();
        assert!(encode_err.starts_with("cache entry could not be encoded"), "{encode_err}");
        assert!(matches!(decode_err, CacheError::Decode(_)));
        assert!(!decode_err.to_string().contains("encoded"));
    }

    #[test]
    fn other_format_versions_are_invalid() {
        let mut entry = CacheEntry::new(Catalog::default(), at(0));
        entry.version = FORMAT_VERSION + 1;
        let bytes = serde_json::to_vec(&entry).unwrap();
        assert!(matches!(decode(&bytes), Err(CacheError::Decode(_))));
    }

    #[test]
    fn expiry_compares_age_with_timeout() {
        let entry = CacheEntry::new(Catalog::default(), at(1_000));
        let timeout = Duration::from_secs(900);

        assert!(!entry.is_expired(at(1_000), timeout));
        assert!(!entry.is_expired(at(1_900), timeout));
        assert!(entry.is_expired(at(1_901), timeout));
        assert!(!entry.is_expired(at(500), timeout));
    }

    #[test]
    fn cache_key_follows_configuration() {
        let sites = vec![SiteSpec::with_api_key("denver", "denver.local", "k")];
        let config = InventoryConfig::new(sites.clone()).unwrap();
        let same = InventoryConfig::new(sites).unwrap();
        assert_eq!(cache_key(&config), cache_key(&same));
        assert!(cache_key(&config).starts_with("vergeos_vms_"));

        let mut filtered = config.clone();
        filtered.filters.status = Some("running".into());
        assert_ne!(cache_key(&config), cache_key(&filtered));

        let other = InventoryConfig::new(vec![SiteSpec::with_api_key("denver", "other.local", "k")]).unwrap();
        assert_ne!(cache_key(&config), cache_key(&other));
    }

    #[tokio::test]
    async fn file_cache_stores_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("nested"));

        assert_eq!(cache.load("key").await.unwrap(), None);

        cache.store("key", b"first").await.unwrap();
        assert_eq!(cache.load("key").await.unwrap().as_deref(), Some(&b"first"[..]));

        cache.store("key", b"second").await.unwrap();
        assert_eq!(cache.load("key").await.unwrap().as_deref(), Some(&b"second"[..]));

        let leftovers = std::fs::read_dir(cache.dir()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stores_of_one_key_leave_a_whole_blob() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let blobs: Vec<Vec<u8>> = (0..16u8).map(|i| vec![b'a' + i; 64 * 1024]).collect();

        let tasks: Vec<_> = blobs
            .iter()
            .cloned()
            .map(|blob| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.store("key", &blob).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = cache.load("key").await.unwrap().unwrap();
        assert!(blobs.contains(&stored));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
