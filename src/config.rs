//! # config.rs
//!
//! Inventory configuration: the YAML file model, its defaults, and the
//! validation that turns it into immutable [`SiteSpec`]s.
//!
//! ```yaml
//! sites:
//!   - name: denver
//!     host: denver.vergeos.local
//!     api_key: "..."
//!     insecure: true
//!   - name: chicago
//!     host: chicago.vergeos.local
//!     username: admin
//!     password: "..."
//! group_by: [site, tags, status]
//! filters:
//!   status: running
//!   name_pattern: ".*web.*"
//! cache: true
//! cache_connection: ~/.cache/vosinv
//! cache_timeout: 900
//! max_workers: 20
//! site_timeout: 120
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::catalog::sanitize_hostname;
use crate::error::ConfigError;

pub const DEFAULT_MAX_WORKERS: u64 = 10;
pub const DEFAULT_SITE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CACHE_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_HOSTNAME_TEMPLATE: &str = "{site}_{name}";
pub const DEFAULT_HOSTVAR_PREFIX: &str = "vergeos_";

/// How a site authenticates. Exactly one mode per site.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password { username: String, password: String },
    ApiKey(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credential::ApiKey(_) => f.debug_tuple("ApiKey").field(&"<redacted>").finish(),
        }
    }
}

/// One validated site. Read-only to the rest of the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSpec {
    pub name: String,
    pub host: String,
    pub credential: Credential,
    pub insecure: bool,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl SiteSpec {
    pub fn with_api_key(name: &str, host: &str, api_key: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            credential: Credential::ApiKey(api_key.to_string()),
            insecure: false,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_password(name: &str, host: &str, username: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            credential: Credential::Password {
                username: username.to_string(),
                password: password.to_string(),
            },
            insecure: false,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupDimension {
    Site,
    Status,
    Tags,
    Tenant,
    OsFamily,
    Cluster,
    Node,
}

impl GroupDimension {
    pub const ALL: [GroupDimension; 7] = [
        GroupDimension::Site,
        GroupDimension::Status,
        GroupDimension::Tags,
        GroupDimension::Tenant,
        GroupDimension::OsFamily,
        GroupDimension::Cluster,
        GroupDimension::Node,
    ];
}

/// VM filters. A VM must pass every configured filter to be kept.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub status: Option<String>,
    pub name_pattern: Option<Regex>,
    /// Exact matches against same-named fields of the raw VM payload.
    pub fields: BTreeMap<String, Value>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.name_pattern.is_none() && self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Directory holding cache blobs.
    pub connection: PathBuf,
    pub timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            connection: default_cache_dir(),
            timeout: Duration::from_secs(DEFAULT_CACHE_TIMEOUT_SECS),
        }
    }
}

/// Validated inventory configuration.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub sites: Vec<SiteSpec>,
    pub group_by: Vec<GroupDimension>,
    pub filters: Filters,
    pub cache: CacheSettings,
    pub max_workers: usize,
    pub site_timeout: Duration,
    pub hostname_template: String,
    pub hostvar_prefix: String,
    pub include_stopped: bool,
}

impl InventoryConfig {
    /// Configuration with every option at its default.
    pub fn new(sites: Vec<SiteSpec>) -> Result<Self, ConfigError> {
        if sites.is_empty() {
            return Err(ConfigError::NoSites);
        }
        let mut seen = HashSet::new();
        let mut prefixes: HashMap<String, &str> = HashMap::new();
        for site in &sites {
            if !seen.insert(site.name.as_str()) {
                return Err(ConfigError::DuplicateSite(site.name.clone()));
            }
            // Host names are sanitized, so distinct site names may still clash.
            let prefix = sanitize_hostname(&site.name);
            if let Some(first) = prefixes.get(&prefix) {
                return Err(ConfigError::CollidingSite {
                    first: first.to_string(),
                    second: site.name.clone(),
                    prefix,
                });
            }
            prefixes.insert(prefix, site.name.as_str());
        }
        Ok(Self {
            sites,
            group_by: GroupDimension::ALL.to_vec(),
            filters: Filters::default(),
            cache: CacheSettings::default(),
            max_workers: DEFAULT_MAX_WORKERS as usize,
            site_timeout: Duration::from_secs(DEFAULT_SITE_TIMEOUT_SECS),
            hostname_template: DEFAULT_HOSTNAME_TEMPLATE.to_string(),
            hostvar_prefix: DEFAULT_HOSTVAR_PREFIX.to_string(),
            include_stopped: true,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading inventory config from {}", path.display());
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(text)?;
        file.validate()
    }
}

// ============================================================================
// File model
// ============================================================================

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    sites: Vec<SiteFile>,
    group_by: Option<Vec<GroupDimension>>,
    #[serde(default)]
    filters: Option<FiltersFile>,
    #[serde(default)]
    cache: bool,
    cache_connection: Option<String>,
    cache_timeout: Option<u64>,
    max_workers: Option<u64>,
    site_timeout: Option<u64>,
    hostname_template: Option<String>,
    hostvar_prefix: Option<String>,
    include_stopped: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SiteFile {
    name: Option<String>,
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
    #[serde(default)]
    insecure: bool,
    timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FiltersFile {
    status: Option<String>,
    name_pattern: Option<String>,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl ConfigFile {
    fn validate(self) -> Result<InventoryConfig, ConfigError> {
        let sites = self
            .sites
            .into_iter()
            .enumerate()
            .map(|(i, site)| site.validate(i))
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = InventoryConfig::new(sites)?;

        if let Some(mut group_by) = self.group_by {
            group_by.sort();
            group_by.dedup();
            config.group_by = group_by;
        }
        if let Some(filters) = self.filters {
            config.filters = filters.validate()?;
        }

        config.cache.enabled = self.cache;
        if let Some(dir) = self.cache_connection {
            config.cache.connection = expand_home(&dir);
        }
        if let Some(secs) = self.cache_timeout {
            config.cache.timeout = Duration::from_secs(secs);
        }

        if let Some(n) = self.max_workers {
            config.max_workers = positive("max_workers", n)? as usize;
        }
        if let Some(secs) = self.site_timeout {
            config.site_timeout = Duration::from_secs(positive("site_timeout", secs)?);
        }
        if let Some(template) = self.hostname_template {
            config.hostname_template = template;
        }
        if let Some(prefix) = self.hostvar_prefix {
            config.hostvar_prefix = prefix;
        }
        if let Some(include) = self.include_stopped {
            config.include_stopped = include;
        }
        Ok(config)
    }
}

impl SiteFile {
    fn validate(self, index: usize) -> Result<SiteSpec, ConfigError> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(ConfigError::MissingName(index))?;
        let host = self
            .host
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingHost(name.clone()))?;

        let api_key = self.api_key.filter(|k| !k.is_empty());
        let has_login = self.username.is_some() || self.password.is_some();

        let credential = match (api_key, self.username, self.password) {
            (Some(_), _, _) if has_login => {
                return Err(ConfigError::ConflictingCredential(name));
            }
            (Some(key), _, _) => Credential::ApiKey(key),
            (None, Some(username), Some(password)) if !username.is_empty() => {
                Credential::Password { username, password }
            }
            _ => return Err(ConfigError::MissingCredential(name)),
        };

        let timeout = positive("timeout", self.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))?;

        Ok(SiteSpec {
            name,
            host,
            credential,
            insecure: self.insecure,
            timeout: Duration::from_secs(timeout),
        })
    }
}

impl FiltersFile {
    fn validate(self) -> Result<Filters, ConfigError> {
        let name_pattern = match self.name_pattern {
            Some(pattern) => Some(Regex::new(&pattern)?),
            None => None,
        };
        Ok(Filters {
            status: self.status,
            name_pattern,
            fields: self.fields,
        })
    }
}

fn positive(field: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive { field, value });
    }
    Ok(value)
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vosinv")
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
