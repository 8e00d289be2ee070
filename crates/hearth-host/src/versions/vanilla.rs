//! Mojang vanilla catalog: the launcher version manifest plus a per-version
//! metadata document carrying the server jar's url, size and sha1.

use anyhow::Context;

use super::{DownloadSpec, VersionDescriptor};
use crate::fetch::{Checksum, HashAlgo};

#[derive(Debug, Clone, serde::Deserialize)]
struct VersionManifest {
    versions: Vec<VersionRef>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct VersionRef {
    id: String,
    url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct VersionJson {
    downloads: Downloads,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct Downloads {
    server: ServerDownload,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ServerDownload {
    sha1: String,
    size: u64,
    url: String,
}

pub fn default_manifest_url() -> String {
    std::env::var("HEARTH_VANILLA_MANIFEST_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| {
            "https://launchermeta.mojang.com/mc/game/version_manifest.json".to_string()
        })
}

pub async fn fetch_catalog(
    client: &reqwest::Client,
    manifest_url: &str,
) -> anyhow::Result<Vec<VersionDescriptor>> {
    let manifest: VersionManifest = client
        .get(manifest_url)
        .send()
        .await
        .context("fetch vanilla version manifest")?
        .error_for_status()?
        .json()
        .await
        .context("parse vanilla version manifest")?;

    Ok(manifest
        .versions
        .into_iter()
        .map(|v| VersionDescriptor {
            id: v.id,
            detail_url: Some(v.url),
        })
        .collect())
}

pub async fn resolve(
    client: &reqwest::Client,
    descriptor: &VersionDescriptor,
) -> anyhow::Result<DownloadSpec> {
    let detail_url = descriptor
        .detail_url
        .as_deref()
        .with_context(|| format!("vanilla version {} has no metadata url", descriptor.id))?;

    let vjson: VersionJson = client
        .get(detail_url)
        .send()
        .await
        .with_context(|| format!("fetch vanilla version json for {}", descriptor.id))?
        .error_for_status()?
        .json()
        .await
        .with_context(|| format!("parse vanilla version json for {}", descriptor.id))?;

    Ok(DownloadSpec {
        url: vjson.downloads.server.url,
        size: Some(vjson.downloads.server.size),
        checksum: Some(Checksum::new(HashAlgo::Sha1, vjson.downloads.server.sha1)),
    })
}
