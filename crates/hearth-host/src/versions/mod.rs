//! Upstream version catalogs.
//!
//! Each server type has an upstream manifest endpoint describing the versions
//! it publishes. A `Provider` fetches that catalog and resolves one version
//! into a concrete download (URL plus whatever size/checksum the upstream
//! publishes). Catalog order is kept exactly as received.

pub mod paper;
pub mod vanilla;

use hearth_process::ServerType;

use crate::fetch::Checksum;

/// One catalog row. `detail_url` points at the per-version metadata document
/// for upstreams that publish one (vanilla); empty for upstreams addressed
/// purely by id (paper).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VersionDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_url: Option<String>,
}

/// A resolved, fetchable artifact. Upstreams that do not publish a size or a
/// checksum leave the field `None`; the fetcher skips that validation.
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    pub url: String,
    pub size: Option<u64>,
    pub checksum: Option<Checksum>,
}

#[derive(Debug, Clone)]
pub enum Provider {
    Vanilla { manifest_url: String },
    Paper { base_url: String },
    #[cfg(test)]
    Stub(StubProvider),
}

impl Provider {
    /// Provider for `server_type` against the real upstream endpoints.
    pub fn for_type(server_type: ServerType) -> Self {
        match server_type {
            ServerType::Vanilla => Provider::Vanilla {
                manifest_url: vanilla::default_manifest_url(),
            },
            ServerType::Paper => Provider::Paper {
                base_url: paper::default_base_url(),
            },
        }
    }

    pub fn server_type(&self) -> ServerType {
        match self {
            Provider::Vanilla { .. } => ServerType::Vanilla,
            Provider::Paper { .. } => ServerType::Paper,
            #[cfg(test)]
            Provider::Stub(s) => s.server_type,
        }
    }

    pub async fn fetch_catalog(
        &self,
        client: &reqwest::Client,
    ) -> anyhow::Result<Vec<VersionDescriptor>> {
        match self {
            Provider::Vanilla { manifest_url } => {
                vanilla::fetch_catalog(client, manifest_url).await
            }
            Provider::Paper { base_url } => paper::fetch_catalog(client, base_url).await,
            #[cfg(test)]
            Provider::Stub(s) => Ok(s.catalog.clone()),
        }
    }

    pub async fn resolve(
        &self,
        client: &reqwest::Client,
        descriptor: &VersionDescriptor,
    ) -> anyhow::Result<DownloadSpec> {
        match self {
            Provider::Vanilla { .. } => vanilla::resolve(client, descriptor).await,
            Provider::Paper { base_url } => paper::resolve(client, base_url, descriptor).await,
            #[cfg(test)]
            Provider::Stub(s) => s
                .specs
                .get(&descriptor.id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("stub has no spec for {}", descriptor.id)),
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct StubProvider {
    pub server_type: ServerType,
    pub catalog: Vec<VersionDescriptor>,
    pub specs: std::collections::HashMap<String, DownloadSpec>,
}

#[cfg(test)]
impl StubProvider {
    pub fn with_version(id: &str, spec: DownloadSpec) -> Provider {
        let mut specs = std::collections::HashMap::new();
        specs.insert(id.to_string(), spec);
        Provider::Stub(StubProvider {
            server_type: ServerType::Vanilla,
            catalog: vec![VersionDescriptor {
                id: id.to_string(),
                detail_url: None,
            }],
            specs,
        })
    }
}
