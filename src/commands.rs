/*
src/commands.rs

Output of `--list` (Ansible dynamic inventory layout):
{
  "_meta": { "hostvars": { "denver_web1": { "vergeos_site": "denver", ... } } },
  "all": { "children": ["site_denver", "status_running", "ungrouped"] },
  "site_denver": { "hosts": ["denver_web1"] },
  "status_running": { "hosts": ["denver_web1"] },
  "ungrouped": { "hosts": [] }
}

Output of `--list --as-csv`:
HOST,SITE,VM_ID,STATUS,IP,TAGS
denver_web1,denver,34,running,10.0.0.1,production;web
chicago_db1,chicago,12,stopped,,
*/

use std::collections::BTreeSet;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::catalog::{Catalog, HostVars};
use crate::inventory::InventoryReport;
use crate::models::OutputFormat;

const COLUMNS: [&str; 6] = ["HOST", "SITE", "VM_ID", "STATUS", "IP", "TAGS"];

pub struct Commands {
    report: InventoryReport,
    prefix: String,
    format: OutputFormat,
}

impl Commands {
    pub fn new(report: InventoryReport, prefix: &str, format: OutputFormat) -> Self {
        Self {
            report,
            prefix: prefix.to_string(),
            format,
        }
    }

    pub fn list(&self) -> Result<()> {
        let catalog = &self.report.catalog;
        let output = match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&ansible_list(catalog))?,
            OutputFormat::Csv => render_csv(catalog, &self.prefix),
            OutputFormat::Table => render_table(catalog, &self.prefix),
        };
        println!("{}", output);

        info!(
            "Listed {} host(s) in {} group(s), generated {}",
            catalog.hosts.len(),
            catalog.groups.len(),
            self.report.generated_at
        );
        Ok(())
    }

    /// Variables of one host; an unknown host prints `{}`.
    pub fn host(&self, name: &str) -> Result<()> {
        let vars = self.report.catalog.host(name).cloned().unwrap_or_default();
        println!("{}", serde_json::to_string_pretty(&vars)?);
        Ok(())
    }
}

pub fn ansible_list(catalog: &Catalog) -> Value {
    let mut out = Map::new();
    out.insert("_meta".into(), json!({ "hostvars": catalog.hosts }));

    let grouped: BTreeSet<&String> = catalog.groups.values().flatten().collect();
    let ungrouped: Vec<&String> = catalog.hosts.keys().filter(|h| !grouped.contains(h)).collect();

    let mut children: Vec<&str> = catalog.groups.keys().map(String::as_str).collect();
    children.push("ungrouped");
    out.insert("all".into(), json!({ "children": children }));

    for (group, hosts) in &catalog.groups {
        out.insert(group.clone(), json!({ "hosts": hosts }));
    }
    out.insert("ungrouped".into(), json!({ "hosts": ungrouped }));
    Value::Object(out)
}

fn row(name: &str, vars: &HostVars, prefix: &str) -> Vec<String> {
    let text = |key: &str| match vars.get(&format!("{prefix}{key}")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let tags = match vars.get(&format!("{prefix}tags")) {
        Some(Value::Array(tags)) => tags
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(";"),
        _ => String::new(),
    };
    vec![name.to_string(), text("site"), text("vm_id"), text("status"), text("ip"), tags]
}

pub fn render_csv(catalog: &Catalog, prefix: &str) -> String {
    let mut lines = vec![COLUMNS.join(",")];
    for (name, vars) in &catalog.hosts {
        let fields: Vec<String> = row(name, vars, prefix).iter().map(|f| csv_field(f)).collect();
        lines.push(fields.join(","));
    }
    lines.join("\n")
}

/// Quote a field holding a separator, quote or line break; quotes are doubled.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn render_table(catalog: &Catalog, prefix: &str) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(COLUMNS.to_vec());
    for (name, vars) in &catalog.hosts {
        table.add_row(row(name, vars, prefix));
    }
    table.to_string()
}
