//! # coordinator.rs
//!
//! Fans the per-site fetcher out over every configured site on a bounded
//! worker pool. One task per site; a semaphore caps how many fetch at once.
//! Every site yields exactly one outcome, in no particular order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::SiteConnector;
use crate::config::{InventoryConfig, SiteSpec};
use crate::error::SiteError;
use crate::fetch::{fetch_with, SiteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub max_workers: usize,
    /// Bound on one site's fetch, counted once it holds a worker slot.
    pub site_timeout: Duration,
}

impl From<&InventoryConfig> for CoordinatorSettings {
    fn from(config: &InventoryConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            site_timeout: config.site_timeout,
        }
    }
}

pub async fn fetch_all_sites<C: SiteConnector>(
    connector: Arc<C>,
    sites: &[SiteSpec],
    settings: CoordinatorSettings,
) -> Vec<SiteOutcome> {
    debug!(
        "Fetching {} site(s) with up to {} worker(s)",
        sites.len(),
        settings.max_workers
    );
    let pool = Arc::new(Semaphore::new(settings.max_workers.max(1)));

    let tasks: Vec<(String, JoinHandle<SiteOutcome>)> = sites
        .iter()
        .cloned()
        .map(|site| {
            let name = site.name.clone();
            let task = tokio::spawn(run_site(
                Arc::clone(&connector),
                Arc::clone(&pool),
                site,
                settings.site_timeout,
            ));
            (name, task)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(tasks.len());
    for (site, task) in tasks {
        let outcome = task.await.unwrap_or_else(|e| {
            debug!("Site '{}' task failed: {}", site, e);
            SiteOutcome::Failure {
                site,
                reason: format!("task failed: {e}"),
            }
        });
        outcomes.push(outcome);
    }
    outcomes
}

async fn run_site<C: SiteConnector>(
    connector: Arc<C>,
    pool: Arc<Semaphore>,
    site: SiteSpec,
    site_timeout: Duration,
) -> SiteOutcome {
    let _permit = match pool.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return SiteOutcome::Failure {
                site: site.name,
                reason: "worker pool closed".to_string(),
            }
        }
    };

    match tokio::time::timeout(site_timeout, fetch_with(connector.as_ref(), &site)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!("Site '{}' timed out after {:?}", site.name, site_timeout);
            SiteOutcome::Failure {
                site: site.name,
                reason: SiteError::Timeout(site_timeout).to_string(),
            }
        }
    }
}
