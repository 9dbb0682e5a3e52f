//! # catalog.rs
//!
//! Host catalog builder: turns site outcomes into uniquely named hosts with a
//! fixed set of variables, and computes group memberships.
//!
//! Host names come from `hostname_template` (default `{site}_{name}`), so
//! hosts of different sites never clash. Inside one site, when several VMs
//! share a name the lowest VM id keeps it and the others become
//! `{name}_{id}`, with a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{Filters, GroupDimension, InventoryConfig};
use crate::fetch::SiteOutcome;
use crate::models::{EnrichedVm, RawVm, VmStatus};

pub type HostVars = BTreeMap<String, Value>;

/// Statuses dropped when `include_stopped` is off.
const STOPPED_STATUSES: [&str; 3] = ["stopped", "offline", "powered_off"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub hosts: BTreeMap<String, HostVars>,
    pub groups: BTreeMap<String, BTreeSet<String>>,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn host(&self, name: &str) -> Option<&HostVars> {
        self.hosts.get(name)
    }

    pub fn group(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.groups.get(name)
    }

    fn insert(&mut self, entry: HostEntry) {
        for group in entry.groups {
            self.groups.entry(group).or_default().insert(entry.name.clone());
        }
        self.hosts.insert(entry.name, entry.vars);
    }
}

/// One VM at one site, ready to go into the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEntry {
    pub name: String,
    pub vars: HostVars,
    pub groups: BTreeSet<String>,
}

/// Something the consumer should know about but that did not stop the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub site: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn for_site(site: &str, message: impl Into<String>) -> Self {
        Self {
            site: Some(site.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.site {
            Some(site) => write!(f, "Site '{}': {}", site, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub catalog: Catalog,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    group_by: BTreeSet<GroupDimension>,
    filters: Filters,
    hostname_template: String,
    hostvar_prefix: String,
    include_stopped: bool,
}

impl CatalogBuilder {
    pub fn new(config: &InventoryConfig) -> Self {
        Self {
            group_by: config.group_by.iter().copied().collect(),
            filters: config.filters.clone(),
            hostname_template: config.hostname_template.clone(),
            hostvar_prefix: config.hostvar_prefix.clone(),
            include_stopped: config.include_stopped,
        }
    }

    /// Build the catalog. Failed sites only add a warning; this never fails.
    pub fn build(&self, outcomes: &[SiteOutcome]) -> BuildReport {
        let mut report = BuildReport::default();

        let mut ordered: Vec<&SiteOutcome> = outcomes.iter().collect();
        ordered.sort_by(|a, b| a.site().cmp(b.site()));

        for outcome in ordered {
            match outcome {
                SiteOutcome::Failure { site, reason } => {
                    warn!("Site '{}' returned error: {}", site, reason);
                    report.warnings.push(Warning::for_site(site, reason.clone()));
                }
                SiteOutcome::Success { site, site_url, vms } => {
                    let added = self.add_site(&mut report, site, site_url, vms);
                    debug!("Site '{}': {} of {} VM(s) in catalog", site, added, vms.len());
                }
            }
        }

        info!(
            "Catalog built: {} host(s), {} group(s)",
            report.catalog.hosts.len(),
            report.catalog.groups.len()
        );
        report
    }

    fn add_site(&self, report: &mut BuildReport, site: &str, site_url: &str, vms: &[EnrichedVm]) -> usize {
        let mut kept: Vec<(String, &EnrichedVm)> = vms
            .iter()
            .filter(|e| self.should_include(&e.vm))
            .map(|e| (self.hostname(site, &e.vm), e))
            .collect();
        kept.sort_by(|(a, x), (b, y)| a.cmp(b).then(x.vm.id.cmp(&y.vm.id)));

        let mut added = 0;
        for (base, enriched) in kept {
            let name = if !report.catalog.hosts.contains_key(&base) {
                base
            } else {
                let mut renamed = format!("{}_{}", base, enriched.vm.id);
                let mut n = 2;
                while report.catalog.hosts.contains_key(&renamed) {
                    renamed = format!("{}_{}_{}", base, enriched.vm.id, n);
                    n += 1;
                }
                let message = format!(
                    "host name '{}' already taken, VM id {} listed as '{}'",
                    base, enriched.vm.id, renamed
                );
                warn!("Site '{}': {}", site, message);
                report.warnings.push(Warning::for_site(site, message));
                renamed
            };

            report.catalog.insert(self.host_entry(name, site, site_url, enriched));
            added += 1;
        }
        added
    }

    fn should_include(&self, vm: &RawVm) -> bool {
        if vm.is_snapshot {
            return false;
        }
        if !self.include_stopped && STOPPED_STATUSES.contains(&vm.status.as_str()) {
            return false;
        }
        matches_filters(&self.filters, vm)
    }

    fn hostname(&self, site: &str, vm: &RawVm) -> String {
        let name = vm.name.clone().unwrap_or_else(|| vm.id.to_string());
        let hostname = self
            .hostname_template
            .replace("{site}", site)
            .replace("{name}", &name);
        sanitize_hostname(&hostname)
    }

    fn host_entry(&self, name: String, site: &str, site_url: &str, enriched: &EnrichedVm) -> HostEntry {
        let vm = &enriched.vm;
        let os_family = os_family(vm);
        // A stopped VM is not placed on any node.
        let placed = vm.status != VmStatus::Stopped;
        let node = vm.node_name.as_ref().filter(|_| placed);
        let node_key = vm.node_key.filter(|_| placed);

        let p = &self.hostvar_prefix;
        let mut vars = HostVars::new();
        let mut set = |key: &str, value: Value| {
            vars.insert(format!("{p}{key}"), value);
        };
        set("site", json!(site));
        set("site_url", json!(site_url));
        set("vm_id", json!(vm.id));
        set("name", json!(vm.name));
        set("description", json!(vm.description));
        set("status", json!(vm.status.as_str()));
        set("enabled", json!(vm.enabled.unwrap_or(true)));
        set("created", json!(vm.created));
        set("modified", json!(vm.modified));
        set("machine_type", json!(vm.machine_type));
        set("machine", json!(vm.machine));
        set("tags", json!(enriched.tags));
        set("ip", json!(enriched.primary_ip()));
        set("mac_addresses", json!(enriched.mac_addresses()));
        set("nics", Value::Array(enriched.nics.iter().map(|n| n.raw.clone()).collect()));
        set("drives", Value::Array(vm.drives.clone()));
        set("ram", json!(vm.ram));
        set("cpu_cores", json!(vm.cpu_cores));
        set("tenant", json!(vm.tenant));
        set("cluster", json!(vm.cluster));
        set("node", json!(node));
        set("node_key", json!(node_key));
        set("os_family", json!(os_family));
        set("os_description", json!(vm.os_description));
        set("vm_data", vm.raw.clone());

        let mut groups = BTreeSet::new();
        for dimension in &self.group_by {
            let keys: Vec<(&str, &str)> = match dimension {
                GroupDimension::Site => vec![("site", site)],
                GroupDimension::Status => vec![("status", vm.status.as_str())],
                GroupDimension::Tags => enriched.tags.iter().map(|t| ("tag", t.as_str())).collect(),
                GroupDimension::Tenant => vm.tenant.iter().map(|t| ("tenant", t.as_str())).collect(),
                GroupDimension::OsFamily => os_family.iter().map(|o| ("os", o.as_str())).collect(),
                GroupDimension::Cluster => vm.cluster.iter().map(|c| ("cluster", c.as_str())).collect(),
                GroupDimension::Node => node.iter().map(|n| ("node", n.as_str())).collect(),
            };
            for (prefix, value) in keys {
                groups.insert(format!("{}_{}", prefix, sanitize_group_name(value)));
            }
        }

        HostEntry { name, vars, groups }
    }
}

pub fn matches_filters(filters: &Filters, vm: &RawVm) -> bool {
    if let Some(status) = &filters.status {
        if vm.status.as_str() != status {
            return false;
        }
    }
    if let Some(pattern) = &filters.name_pattern {
        if !pattern.is_match(vm.name.as_deref().unwrap_or_default()) {
            return false;
        }
    }
    filters
        .fields
        .iter()
        .all(|(field, expected)| vm.raw.get(field).unwrap_or(&Value::Null) == expected)
}

/// OS family reported by the API, else guessed from the machine type.
/// Unknown families get no group.
pub fn os_family(vm: &RawVm) -> Option<String> {
    vm.os_family
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_lowercase)
        .or_else(|| vm.machine_type.as_deref().and_then(classify_os_family).map(String::from))
}

pub fn classify_os_family(machine_type: &str) -> Option<&'static str> {
    const FAMILIES: [(&str, &[&str]); 4] = [
        ("macos", &["darwin", "macos", "osx"]),
        ("windows", &["windows", "win1", "win2", "win7", "win8", "winxp"]),
        (
            "linux",
            &[
                "linux", "ubuntu", "debian", "centos", "rhel", "redhat", "fedora", "rocky", "alma",
                "suse", "alpine",
            ],
        ),
        ("bsd", &["freebsd", "openbsd", "netbsd", "bsd"]),
    ];

    let machine_type = machine_type.to_lowercase();
    FAMILIES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| machine_type.contains(n)))
        .map(|(family, _)| *family)
}

/// Keep `[A-Za-z0-9_-]`, replace everything else with `_`.
pub fn sanitize_hostname(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Keep `[A-Za-z0-9_]`, lower-case, no leading digit.
pub fn sanitize_group_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}
