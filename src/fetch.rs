//! # fetch.rs
//!
//! Per-site fetcher. Reduces one site to a [`SiteOutcome`] with a fixed
//! number of bulk calls, whatever the VM count:
//!
//! 1. `list_vms` (a failure here fails the whole site)
//! 2. `list_tag_definitions` + `list_tag_memberships` (failures degrade to no tags)
//! 3. `list_machine_nics` (failure degrades to no NICs)
//!
//! Tags and NICs are then joined to the VMs in memory.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::client::{SiteConnector, SiteSource};
use crate::config::SiteSpec;
use crate::models::{EnrichedVm, Nic, RawVm, Tag, TagMember};

/// Result of fetching one site. Exactly one per configured site.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteOutcome {
    Success {
        site: String,
        site_url: String,
        vms: Vec<EnrichedVm>,
    },
    Failure {
        site: String,
        reason: String,
    },
}

impl SiteOutcome {
    pub fn site(&self) -> &str {
        match self {
            SiteOutcome::Success { site, .. } | SiteOutcome::Failure { site, .. } => site,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SiteOutcome::Success { .. })
    }
}

/// Connect to `site` and fetch it. Never fails: errors become a `Failure`.
pub async fn fetch_with<C: SiteConnector>(connector: &C, site: &SiteSpec) -> SiteOutcome {
    match connector.connect(site).await {
        Ok(source) => fetch_site(site, &source).await,
        Err(e) => {
            debug!("Site '{}' could not be reached: {}", site.name, e);
            SiteOutcome::Failure {
                site: site.name.clone(),
                reason: e.to_string(),
            }
        }
    }
}

pub async fn fetch_site<S: SiteSource + ?Sized>(site: &SiteSpec, source: &S) -> SiteOutcome {
    let vms = match source.list_vms().await {
        Ok(vms) => vms,
        Err(e) => {
            debug!("Site '{}': failed to list VMs: {}", site.name, e);
            return SiteOutcome::Failure {
                site: site.name.clone(),
                reason: e.to_string(),
            };
        }
    };

    let tags = match source.list_tag_definitions().await {
        Ok(tags) => tags,
        Err(e) => {
            warn!("Site '{}': tags unavailable, continuing without them: {}", site.name, e);
            Vec::new()
        }
    };
    let members = match source.list_tag_memberships().await {
        Ok(members) => members,
        Err(e) => {
            warn!("Site '{}': tag members unavailable, continuing without them: {}", site.name, e);
            Vec::new()
        }
    };
    let nics = match source.list_machine_nics().await {
        Ok(nics) => nics,
        Err(e) => {
            warn!("Site '{}': NICs unavailable, continuing without them: {}", site.name, e);
            Vec::new()
        }
    };

    let vms = join(vms, &tags, &members, nics);
    debug!("Site '{}': fetched {} VM(s)", site.name, vms.len());

    SiteOutcome::Success {
        site: site.name.clone(),
        site_url: site.host.clone(),
        vms,
    }
}

/// Attach tag names and NICs to every VM.
pub fn join(vms: Vec<RawVm>, tags: &[Tag], members: &[TagMember], nics: Vec<Nic>) -> Vec<EnrichedVm> {
    let tag_index = tag_index(tags, members);
    let mut nic_index: HashMap<u64, Vec<Nic>> = HashMap::new();
    for nic in nics {
        nic_index.entry(nic.machine_id).or_default().push(nic);
    }

    vms.into_iter()
        .map(|vm| {
            let mut enriched = EnrichedVm::new(vm);
            if let Some(names) = tag_index.get(&enriched.vm.id) {
                enriched.tags = names.clone();
            }
            if let Some(vm_nics) = nic_index.remove(&enriched.machine_key()) {
                enriched.nics = vm_nics;
            }
            enriched
        })
        .collect()
}

/// VM id -> tag names, in membership order, each name once.
fn tag_index(tags: &[Tag], members: &[TagMember]) -> HashMap<u64, Vec<String>> {
    let names: HashMap<u64, &str> = tags.iter().map(|t| (t.id, t.name.as_str())).collect();
    let mut index: HashMap<u64, Vec<String>> = HashMap::new();

    for member in members {
        let (Some(vm_id), Some(name)) = (member.vm_id(), names.get(&member.tag)) else {
            continue;
        };
        let entry = index.entry(vm_id).or_default();
        if !entry.iter().any(|n| n == name) {
            entry.push(name.to_string());
        }
    }
    index
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::{NicSource, TagSource, VmSource};
    use crate::error::SiteError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory site that counts every bulk call.
    #[derive(Default)]
    pub(crate) struct FakeSite {
        pub vms: Vec<RawVm>,
        pub tags: Vec<Tag>,
        pub members: Vec<TagMember>,
        pub nics: Vec<Nic>,
        pub fail_vms: Option<SiteError>,
        pub fail_tags: bool,
        pub fail_nics: bool,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl VmSource for FakeSite {
        async fn list_vms(&self) -> Result<Vec<RawVm>, SiteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_vms {
                Some(e) => Err(e.clone()),
                None => Ok(self.vms.clone()),
            }
        }
    }

    #[async_trait]
    impl TagSource for FakeSite {
        async fn list_tag_definitions(&self) -> Result<Vec<Tag>, SiteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_tags {
                return Err(SiteError::Upstream("HTTP 500".into()));
            }
            Ok(self.tags.clone())
        }

        async fn list_tag_memberships(&self) -> Result<Vec<TagMember>, SiteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.members.clone())
        }
    }

    #[async_trait]
    impl NicSource for FakeSite {
        async fn list_machine_nics(&self) -> Result<Vec<Nic>, SiteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_nics {
                return Err(SiteError::Connection("reset by peer".into()));
            }
            Ok(self.nics.clone())
        }
    }

    pub(crate) fn vm(id: u64, name: &str, status: &str) -> RawVm {
        RawVm::from_value(json!({"$key": id, "name": name, "status": status, "machine": id + 100}))
            .unwrap()
    }

    pub(crate) fn nic(machine: u64, ip: &str) -> Nic {
        Nic::from_value(json!({"machine": machine, "ipaddress": ip, "macaddress": "52:54:00:00:00:01"}))
            .unwrap()
    }

    fn tag(id: u64, name: &str) -> Tag {
        Tag { id, name: name.to_string() }
    }

    fn member(tag: u64, member: &str) -> TagMember {
        TagMember { tag, member: member.to_string() }
    }

    fn denver() -> SiteSpec {
        SiteSpec::with_api_key("denver", "denver.local", "token")
    }

    fn tagged_site() -> FakeSite {
        FakeSite {
            vms: vec![vm(1, "web1", "running"), vm(2, "db1", "stopped")],
            tags: vec![tag(10, "production"), tag(11, "web")],
            members: vec![
                member(10, "vms/1"),
                member(11, "vms/1"),
                member(10, "vms/1"),
                member(10, "vnets/1"),
                member(99, "vms/2"),
                member(11, "vms/not-a-number"),
            ],
            nics: vec![nic(101, "10.0.0.1"), nic(101, "10.0.0.2"), nic(555, "10.9.9.9")],
            ..Default::default()
        }
    }

    fn vms_of(outcome: SiteOutcome) -> Vec<EnrichedVm> {
        match outcome {
            SiteOutcome::Success { vms, .. } => vms,
            SiteOutcome::Failure { reason, .. } => panic!("unexpected failure: {reason}"),
        }
    }

    #[tokio::test]
    async fn joins_tags_and_nics_onto_vms() {
        let site = tagged_site();
        let vms = vms_of(fetch_site(&denver(), &site).await);

        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0].tags, vec!["production", "web"]);
        assert_eq!(vms[0].nics.len(), 2);
        assert_eq!(vms[0].primary_ip(), Some("10.0.0.1"));
        assert!(vms[1].tags.is_empty());
        assert!(vms[1].nics.is_empty());
    }

    #[tokio::test]
    async fn issues_four_calls_regardless_of_vm_count() {
        for count in [0u64, 1, 50, 500] {
            let site = FakeSite {
                vms: (0..count).map(|i| vm(i, &format!("vm{i}"), "running")).collect(),
                nics: (0..count).map(|i| nic(i + 100, "10.0.0.1")).collect(),
                ..Default::default()
            };
            let vms = vms_of(fetch_site(&denver(), &site).await);
            assert_eq!(vms.len() as u64, count);
            assert_eq!(site.calls.load(Ordering::SeqCst), 4, "with {count} VMs");
        }
    }

    #[tokio::test]
    async fn vm_listing_failure_fails_the_site_without_further_calls() {
        let site = FakeSite {
            fail_vms: Some(SiteError::Authentication("HTTP 401".into())),
            ..tagged_site()
        };
        let outcome = fetch_site(&denver(), &site).await;

        match outcome {
            SiteOutcome::Failure { site: name, reason } => {
                assert_eq!(name, "denver");
                assert!(reason.contains("Authentication"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(site.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tag_and_nic_failures_degrade_gracefully() {
        let site = FakeSite {
            fail_tags: true,
            fail_nics: true,
            ..tagged_site()
        };
        let vms = vms_of(fetch_site(&denver(), &site).await);

        assert_eq!(vms.len(), 2);
        assert!(vms.iter().all(|v| v.tags.is_empty() && v.nics.is_empty()));
        assert_eq!(site.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn success_carries_site_name_and_url() {
        let outcome = fetch_site(&denver(), &FakeSite::default()).await;
        assert_eq!(
            outcome,
            SiteOutcome::Success {
                site: "denver".into(),
                site_url: "denver.local".into(),
                vms: vec![],
            }
        );
    }

    #[test]
    fn nics_fall_back_to_vm_key_without_machine() {
        let raw = RawVm::from_value(json!({"$key": 5, "name": "bare"})).unwrap();
        let joined = join(vec![raw], &[], &[], vec![nic(5, "192.168.1.5")]);
        assert_eq!(joined[0].primary_ip(), Some("192.168.1.5"));
    }
}
