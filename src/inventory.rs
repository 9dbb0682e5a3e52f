//! # inventory.rs
//!
//! Inventory assembly:
//!
//! - cache path: caching on and a fresh entry exists -> restore it, no network;
//! - live path: fetch every site, build the catalog, store it when caching is on
//!   and at least one site answered.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::{self, CacheEntry, FileCache};
use crate::catalog::{Catalog, CatalogBuilder, Warning};
use crate::client::{HttpConnector, SiteConnector};
use crate::config::InventoryConfig;
use crate::coordinator::{fetch_all_sites, CoordinatorSettings};
use crate::fetch::SiteOutcome;

/// What the consumer gets, whichever path produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryReport {
    pub catalog: Catalog,
    pub warnings: Vec<Warning>,
    /// When the catalog was built from live data.
    pub generated_at: DateTime<Utc>,
}

pub struct Inventory<C = HttpConnector> {
    config: InventoryConfig,
    connector: Arc<C>,
    cache: Option<(FileCache, String)>,
}

impl Inventory<HttpConnector> {
    pub fn new(config: InventoryConfig) -> Self {
        Self::with_connector(config, HttpConnector)
    }
}

impl<C: SiteConnector> Inventory<C> {
    pub fn with_connector(config: InventoryConfig, connector: C) -> Self {
        let cache = config.cache.enabled.then(|| {
            (
                FileCache::new(config.cache.connection.clone()),
                cache::cache_key(&config),
            )
        });
        Self {
            config,
            connector: Arc::new(connector),
            cache,
        }
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// Catalog from a fresh cache entry if there is one, otherwise live.
    pub async fn get_catalog(&self) -> InventoryReport {
        if let Some(report) = self.read_cache().await {
            return report;
        }
        self.refresh().await
    }

    /// Live catalog, ignoring any cache entry. The cache is still updated.
    pub async fn refresh(&self) -> InventoryReport {
        info!("Fetching VMs from {} site(s)", self.config.sites.len());
        let outcomes = fetch_all_sites(
            Arc::clone(&self.connector),
            &self.config.sites,
            CoordinatorSettings::from(&self.config),
        )
        .await;

        let report = CatalogBuilder::new(&self.config).build(&outcomes);
        let mut warnings = report.warnings;
        if report.catalog.is_empty() {
            warn!("No hosts gathered from {} site(s)", self.config.sites.len());
        }

        let generated_at = Utc::now();
        // An outage of every site is never cached; the next call retries live.
        if outcomes.iter().any(SiteOutcome::is_success) {
            if let Some(warning) = self.write_cache(&report.catalog, &warnings, generated_at).await {
                warnings.push(warning);
            }
        } else {
            debug!("No site answered, cache left untouched");
        }

        InventoryReport {
            catalog: report.catalog,
            warnings,
            generated_at,
        }
    }

    async fn read_cache(&self) -> Option<InventoryReport> {
        let (store, key) = self.cache.as_ref()?;

        let bytes = match store.load(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("Cache miss: {}", key);
                return None;
            }
            Err(e) => {
                warn!("Cache read failed, fetching live: {}", e);
                return None;
            }
        };

        let entry = match cache::decode(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring cache entry {}: {}", key, e);
                return None;
            }
        };

        if entry.is_expired(Utc::now(), self.config.cache.timeout) {
            debug!("Cache entry {} expired (created {})", key, entry.created_at);
            return None;
        }

        info!("Loading inventory from cache: {}", key);
        for warning in &entry.warnings {
            warn!("{} (cached {})", warning, entry.created_at);
        }
        Some(InventoryReport {
            catalog: entry.catalog,
            warnings: entry.warnings,
            generated_at: entry.created_at,
        })
    }

    /// Store the catalog; a failure is returned as a warning.
    async fn write_cache(
        &self,
        catalog: &Catalog,
        warnings: &[Warning],
        created_at: DateTime<Utc>,
    ) -> Option<Warning> {
        let (store, key) = self.cache.as_ref()?;
        let entry = CacheEntry::new(catalog.clone(), created_at).with_warnings(warnings.to_vec());

        let result = match cache::encode(&entry) {
            Ok(bytes) => store.store(key, &bytes).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!("Cache updated: {}", key);
                None
            }
            Err(e) => {
                warn!("Cache write failed: {}", e);
                Some(Warning {
                    site: None,
                    message: format!("cache write failed: {e}"),
                })
            }
        }
    }
}

/// Catalog for `config` against live VergeOS sites, using the cache when enabled.
pub async fn get_catalog(config: &InventoryConfig) -> InventoryReport {
    Inventory::new(config.clone()).get_catalog().await
}

/// Like [`get_catalog`] but never reads the cache.
pub async fn refresh(config: &InventoryConfig) -> InventoryReport {
    Inventory::new(config.clone()).refresh().await
}
