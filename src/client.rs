// src/client.rs
//
// Site client adapter. The inventory only ever talks to a site through the
// four bulk listings below; single-resource endpoints are never used.
//
//   vms           GET /api/v4/vms?fields=all
//   tags          GET /api/v4/tags?fields=all
//   tag_members   GET /api/v4/tag_members?fields=all
//   machine_nics  GET /api/v4/machine_nics?fields=all

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, error};

use crate::config::{Credential, SiteSpec};
use crate::error::SiteError;
use crate::models::{Nic, RawVm, Tag, TagMember};

const API_PREFIX: &str = "/api/v4";

#[async_trait]
pub trait VmSource: Send + Sync {
    async fn list_vms(&self) -> Result<Vec<RawVm>, SiteError>;
}

#[async_trait]
pub trait TagSource: Send + Sync {
    async fn list_tag_definitions(&self) -> Result<Vec<Tag>, SiteError>;
    async fn list_tag_memberships(&self) -> Result<Vec<TagMember>, SiteError>;
}

#[async_trait]
pub trait NicSource: Send + Sync {
    async fn list_machine_nics(&self) -> Result<Vec<Nic>, SiteError>;
}

/// Everything the per-site fetcher needs from one site.
pub trait SiteSource: VmSource + TagSource + NicSource {}

impl<T: VmSource + TagSource + NicSource> SiteSource for T {}

/// Binds a [`SiteSpec`] to a ready-to-use [`SiteSource`].
#[async_trait]
pub trait SiteConnector: Send + Sync + 'static {
    type Source: SiteSource + 'static;

    async fn connect(&self, site: &SiteSpec) -> Result<Self::Source, SiteError>;
}

/// Connector for live VergeOS systems.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

#[async_trait]
impl SiteConnector for HttpConnector {
    type Source = VergeClient;

    async fn connect(&self, site: &SiteSpec) -> Result<VergeClient, SiteError> {
        VergeClient::new(site)
    }
}

pub struct VergeClient {
    base_url: String,
    client: Client,
    credential: Credential,
}

impl VergeClient {
    pub fn new(site: &SiteSpec) -> Result<Self, SiteError> {
        let base_url = base_url(&site.host);
        debug!("Creating VergeOS client for site '{}' at {}", site.name, base_url);

        let client = ClientBuilder::new()
            .danger_accept_invalid_certs(site.insecure)
            .timeout(site.timeout)
            .build()
            .map_err(|e| SiteError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            client,
            credential: site.credential.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Credential::Password { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credential::ApiKey(token) => request.bearer_auth(token),
        }
    }

    async fn get_list(&self, collection: &str) -> Result<Vec<Value>, SiteError> {
        let url = format!("{}{}/{}", self.base_url, API_PREFIX, collection);
        debug!("GET {}", url);

        let response = self
            .authorize(self.client.get(&url))
            .query(&[("fields", "all")])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!("GET {} rejected with status: {}", url, status);
            return Err(SiteError::Authentication(format!("HTTP {status}")));
        }
        if !status.is_success() {
            error!("GET {} failed with status: {}", url, status);
            return Err(SiteError::Upstream(format!("HTTP {status} listing {collection}")));
        }

        match response.json::<Value>().await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            obj @ Value::Object(_) => Ok(vec![obj]),
            other => Err(SiteError::Upstream(format!(
                "unexpected {collection} payload: {other}"
            ))),
        }
    }
}

fn parse_records<T>(
    collection: &str,
    items: Vec<Value>,
    parse: impl Fn(Value) -> Result<T, serde_json::Error>,
) -> Result<Vec<T>, SiteError> {
    items
        .into_iter()
        .map(|item| {
            parse(item)
                .map_err(|e| SiteError::Upstream(format!("malformed {collection} record: {e}")))
        })
        .collect()
}

#[async_trait]
impl VmSource for VergeClient {
    async fn list_vms(&self) -> Result<Vec<RawVm>, SiteError> {
        let items = self.get_list("vms").await?;
        let vms = parse_records("vms", items, RawVm::from_value)?;
        debug!("Found {} VM(s) at {}", vms.len(), self.base_url);
        Ok(vms)
    }
}

#[async_trait]
impl TagSource for VergeClient {
    async fn list_tag_definitions(&self) -> Result<Vec<Tag>, SiteError> {
        let items = self.get_list("tags").await?;
        parse_records("tags", items, serde_json::from_value)
    }

    async fn list_tag_memberships(&self) -> Result<Vec<TagMember>, SiteError> {
        let items = self.get_list("tag_members").await?;
        parse_records("tag_members", items, serde_json::from_value)
    }
}

#[async_trait]
impl NicSource for VergeClient {
    async fn list_machine_nics(&self) -> Result<Vec<Nic>, SiteError> {
        let items = self.get_list("machine_nics").await?;
        let nics = parse_records("machine_nics", items, Nic::from_value)?;
        debug!("Found {} NIC(s) at {}", nics.len(), self.base_url);
        Ok(nics)
    }
}

/// A host without scheme is reached over HTTPS; an explicit scheme is kept.
pub fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_to_https() {
        assert_eq!(base_url("denver.vergeos.local"), "https://denver.vergeos.local");
        assert_eq!(base_url("10.0.0.1:8443/"), "https://10.0.0.1:8443");
    }

    #[test]
    fn base_url_keeps_explicit_scheme() {
        assert_eq!(base_url("http://lab.local"), "http://lab.local");
        assert_eq!(base_url("https://prod.local/"), "https://prod.local");
    }

    #[test]
    fn client_construction_is_a_typed_result() {
        let site = SiteSpec::with_api_key("denver", "denver.local", "token");
        let client = VergeClient::new(&site).unwrap();
        assert_eq!(client.base_url(), "https://denver.local");
    }
}
