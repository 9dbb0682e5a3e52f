//! # vosinv
//!
//! Multi-site VergeOS VM inventory. Queries every configured site
//! concurrently, joins VMs with their tags and NICs, and builds one host
//! catalog grouped by site, status, tags, tenant, OS family, cluster and node.
//!
//! ```no_run
//! # async fn run() -> Result<(), vosinv::error::ConfigError> {
//! let config = vosinv::InventoryConfig::load("inventory.vergeos_vms.yml".as_ref()).await?;
//! let report = vosinv::get_catalog(&config).await;
//! for warning in &report.warnings {
//!     eprintln!("{warning}");
//! }
//! println!("{} host(s)", report.catalog.hosts.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod client;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod inventory;
pub mod models;
pub mod vlog;

pub use catalog::{Catalog, HostVars, Warning};
pub use config::{InventoryConfig, SiteSpec};
pub use fetch::SiteOutcome;
pub use inventory::{get_catalog, refresh, Inventory, InventoryReport};
