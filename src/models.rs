// vosinv: multi-site VergeOS VM inventory for your automation, from
// the CLI or as a library.
// Copyright (C) 2025 Francesco Garbin
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 2.1 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301
// USA

//! # models.rs
//!
//! Records returned by the VergeOS bulk endpoints, and the per-VM join of
//! those records.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
    Table,
}

/// Power state of a VM. Anything that is not plainly running or stopped
/// (starting, migrating, error, ...) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    Stopped,
    Other(String),
}

impl VmStatus {
    pub fn as_str(&self) -> &str {
        match self {
            VmStatus::Running => "running",
            VmStatus::Stopped => "stopped",
            VmStatus::Other(s) => s,
        }
    }
}

impl Default for VmStatus {
    fn default() -> Self {
        VmStatus::Other("unknown".to_string())
    }
}

impl From<String> for VmStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => VmStatus::Running,
            "stopped" => VmStatus::Stopped,
            _ => VmStatus::Other(s),
        }
    }
}

impl<'de> Deserialize<'de> for VmStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Option::<String>::deserialize(d)?
            .map(VmStatus::from)
            .unwrap_or_default())
    }
}

impl Serialize for VmStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

/// One entry of the `vms` listing. `raw` keeps the untouched payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawVm {
    #[serde(rename = "$key")]
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: VmStatus,
    /// Absent means enabled.
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub modified: Option<i64>,
    #[serde(default)]
    pub machine_type: Option<String>,
    /// Machine key the NICs refer to.
    #[serde(default)]
    pub machine: Option<u64>,
    /// RAM in MB.
    #[serde(default)]
    pub ram: Option<u64>,
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tenant: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cluster: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_key: Option<u64>,
    #[serde(default)]
    pub os_family: Option<String>,
    #[serde(default)]
    pub os_description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_snapshot: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub drives: Vec<Value>,
    #[serde(skip)]
    pub raw: Value,
}

/// Field, then the payload keys it is read from, first usable one wins.
const VM_FALLBACKS: [(&str, [&str; 2]); 4] = [
    ("status", ["status", "power_state"]),
    ("tenant", ["tenant", "tenant_name"]),
    ("cluster", ["cluster", "cluster_name"]),
    ("node_name", ["node_name", "node"]),
];

const NIC_FALLBACKS: [(&str, [&str; 2]); 3] = [
    ("ip_address", ["ipaddress", "ip_address"]),
    ("mac_address", ["macaddress", "mac_address"]),
    ("slot", ["orderid", "slot"]),
];

impl RawVm {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let mut vm: RawVm = serde_json::from_value(resolve_fallbacks(&value, &VM_FALLBACKS))?;
        vm.raw = value;
        Ok(vm)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tag {
    #[serde(rename = "$key")]
    pub id: u64,
    pub name: String,
}

/// Links a tag to a resource, e.g. `member: "vms/34"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagMember {
    pub tag: u64,
    #[serde(default)]
    pub member: String,
}

impl TagMember {
    /// VM id of a `vms/<id>` member reference. Other resource kinds and
    /// malformed references yield `None`.
    pub fn vm_id(&self) -> Option<u64> {
        self.member.strip_prefix("vms/")?.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Nic {
    #[serde(rename = "machine")]
    pub machine_id: u64,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub slot: Option<u32>,
    #[serde(skip)]
    pub raw: Value,
}

impl Nic {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let mut nic: Nic = serde_json::from_value(resolve_fallbacks(&value, &NIC_FALLBACKS))?;
        nic.raw = value;
        Ok(nic)
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip_address.as_deref().filter(|ip| !ip.is_empty())
    }
}

/// A VM joined with its tags and NICs.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedVm {
    pub vm: RawVm,
    pub tags: Vec<String>,
    pub nics: Vec<Nic>,
}

impl EnrichedVm {
    pub fn new(vm: RawVm) -> Self {
        Self {
            vm,
            tags: Vec::new(),
            nics: Vec::new(),
        }
    }

    /// Key used to match NICs: the machine key if the listing has one,
    /// otherwise the VM key.
    pub fn machine_key(&self) -> u64 {
        self.vm.machine.unwrap_or(self.vm.id)
    }

    /// First IP found walking the NICs in listing order.
    pub fn primary_ip(&self) -> Option<&str> {
        self.nics.iter().find_map(Nic::ip)
    }

    pub fn mac_addresses(&self) -> Vec<String> {
        self.nics
            .iter()
            .filter_map(|nic| nic.mac_address.clone())
            .collect()
    }
}

/// Copy of `value` where each field holds the first non-null, non-empty
/// value among its keys. The API reports some fields under either name,
/// sometimes under both.
fn resolve_fallbacks(value: &Value, fallbacks: &[(&str, [&str; 2])]) -> Value {
    let mut value = value.clone();
    if let Value::Object(map) = &mut value {
        for (field, keys) in fallbacks {
            let found = keys
                .iter()
                .filter_map(|key| map.get(*key))
                .find(|v| !v.is_null() && v.as_str() != Some(""))
                .cloned();
            match found {
                Some(v) => {
                    map.insert(field.to_string(), v);
                }
                None => {
                    map.remove(*field);
                }
            }
        }
    }
    value
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Accepts a string or a number, the API reports some references either way.
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
