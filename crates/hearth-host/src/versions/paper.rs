//! PaperMC catalog: the builds API publishes version ids, per-version build
//! numbers, and a sha256 per build artifact. The newest build of a version is
//! always the one served.

use anyhow::Context;

use super::{DownloadSpec, VersionDescriptor};
use crate::fetch::{Checksum, HashAlgo};

#[derive(Debug, Clone, serde::Deserialize)]
struct Project {
    versions: Vec<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct Builds {
    builds: Vec<u32>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct Build {
    downloads: BuildDownloads,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct BuildDownloads {
    application: Application,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct Application {
    name: String,
    sha256: String,
}

pub fn default_base_url() -> String {
    std::env::var("HEARTH_PAPER_API_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "https://api.papermc.io".to_string())
}

pub async fn fetch_catalog(
    client: &reqwest::Client,
    base_url: &str,
) -> anyhow::Result<Vec<VersionDescriptor>> {
    let project: Project = client
        .get(format!("{base_url}/v2/projects/paper"))
        .send()
        .await
        .context("fetch paper project manifest")?
        .error_for_status()?
        .json()
        .await
        .context("parse paper project manifest")?;

    Ok(project
        .versions
        .into_iter()
        .map(|id| VersionDescriptor {
            id,
            detail_url: None,
        })
        .collect())
}

pub async fn resolve(
    client: &reqwest::Client,
    base_url: &str,
    descriptor: &VersionDescriptor,
) -> anyhow::Result<DownloadSpec> {
    let id = &descriptor.id;

    let builds: Builds = client
        .get(format!("{base_url}/v2/projects/paper/versions/{id}"))
        .send()
        .await
        .with_context(|| format!("fetch paper builds for {id}"))?
        .error_for_status()?
        .json()
        .await
        .with_context(|| format!("parse paper builds for {id}"))?;

    let build = *builds
        .builds
        .last()
        .with_context(|| format!("paper version {id} has no builds"))?;

    let detail: Build = client
        .get(format!(
            "{base_url}/v2/projects/paper/versions/{id}/builds/{build}"
        ))
        .send()
        .await
        .with_context(|| format!("fetch paper build {build} for {id}"))?
        .error_for_status()?
        .json()
        .await
        .with_context(|| format!("parse paper build {build} for {id}"))?;

    let app = detail.downloads.application;
    Ok(DownloadSpec {
        url: format!(
            "{base_url}/v2/projects/paper/versions/{id}/builds/{build}/downloads/{}",
            app.name
        ),
        size: None,
        checksum: Some(Checksum::new(HashAlgo::Sha256, app.sha256)),
    })
}
