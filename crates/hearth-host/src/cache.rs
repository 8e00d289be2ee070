//! Versioned artifact cache, one instance per server type.
//!
//! Resolves a version id to a checksum-verified binary under the cache root,
//! deduplicating concurrent downloads of the same version. The set of cached
//! artifacts is persisted to `artifacts.json` and the upstream catalog to
//! `catalog.json`, which offline mode uses instead of refreshing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::watch;

use crate::fetch::{self, Checksum, FetchError, HashAlgo};
use crate::versions::{Provider, VersionDescriptor};
use hearth_process::ServerType;

const MANIFEST_FILE: &str = "artifacts.json";
const CATALOG_FILE: &str = "catalog.json";

/// One verified artifact on disk. `sha` is hex; the digest algorithm is
/// implied by its length (40 = sha1, 64 = sha256).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachedArtifact {
    pub id: String,
    #[serde(rename = "type")]
    pub server_type: ServerType,
    pub sha: String,
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("version not found: {0}")]
    VersionNotFound(String),
    #[error("download failed for {0}")]
    DownloadFailed(String),
    #[error("cached artifact for {id} is corrupt: expected {expected}, got {got}")]
    CorruptCache {
        id: String,
        expected: String,
        got: String,
    },
    #[error("copied artifact for {id} is corrupt: expected {expected}, got {got}")]
    CorruptCopy {
        id: String,
        expected: String,
        got: String,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to clear {} cache entries", .0.len())]
    ClearAll(Vec<(String, String)>),
}

struct Inner {
    catalog: Vec<VersionDescriptor>,
    cached: HashMap<String, CachedArtifact>,
    // At most one in-flight download per version id; a version is never in
    // both `cached` and `inflight`. The channel publishes the outcome once.
    inflight: HashMap<String, watch::Receiver<Option<bool>>>,
}

pub struct ArtifactCache {
    provider: Provider,
    root: PathBuf,
    client: reqwest::Client,
    inner: Mutex<Inner>,
}

enum Plan {
    Cached(CachedArtifact),
    Wait(watch::Receiver<Option<bool>>),
    Fetch(VersionDescriptor, watch::Sender<Option<bool>>),
}

impl ArtifactCache {
    /// Opens the cache rooted at `<cache_root>/<type>`: loads the persisted
    /// manifest and either refreshes the catalog from upstream or, in
    /// offline mode, loads the last saved snapshot.
    pub async fn open(
        provider: Provider,
        cache_root: &Path,
        client: reqwest::Client,
        offline: bool,
    ) -> anyhow::Result<Arc<Self>> {
        let server_type = provider.server_type();
        let root = cache_root.join(server_type.as_str().to_ascii_lowercase());
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create cache root {}", root.display()))?;

        let cached = load_manifest(&root.join(MANIFEST_FILE))?;

        let catalog = if offline {
            load_catalog_snapshot(&root.join(CATALOG_FILE))
        } else {
            let catalog = provider
                .fetch_catalog(&client)
                .await
                .with_context(|| format!("refresh {server_type} catalog"))?;
            save_catalog_snapshot(&root.join(CATALOG_FILE), &catalog);
            catalog
        };

        tracing::info!(
            %server_type,
            versions = catalog.len(),
            cached = cached.len(),
            offline,
            "artifact cache ready"
        );

        Ok(Arc::new(Self {
            provider,
            root,
            client,
            inner: Mutex::new(Inner {
                catalog,
                cached,
                inflight: HashMap::new(),
            }),
        }))
    }

    pub fn server_type(&self) -> ServerType {
        self.provider.server_type()
    }

    /// Known version ids in upstream order.
    pub fn list_versions(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.catalog.iter().map(|v| v.id.clone()).collect()
    }

    /// Materializes `version_id` at `dest`, downloading it first if it is not
    /// cached. Concurrent callers for the same version share one download and
    /// observe the same outcome.
    pub async fn resolve_and_download(
        self: &Arc<Self>,
        version_id: &str,
        dest: &Path,
    ) -> Result<(), CacheError> {
        loop {
            let plan = {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(art) = inner.cached.get(version_id) {
                    Plan::Cached(art.clone())
                } else if let Some(rx) = inner.inflight.get(version_id) {
                    Plan::Wait(rx.clone())
                } else {
                    let desc = inner
                        .catalog
                        .iter()
                        .find(|v| v.id == version_id)
                        .cloned()
                        .ok_or_else(|| CacheError::VersionNotFound(version_id.to_string()))?;
                    let (tx, rx) = watch::channel(None);
                    inner.inflight.insert(version_id.to_string(), rx);
                    Plan::Fetch(desc, tx)
                }
            };

            match plan {
                Plan::Cached(art) => return self.copy_verified(&art, dest).await,
                Plan::Wait(rx) => {
                    self.await_outcome(rx, version_id).await?;
                    // Loop back; the artifact is now in `cached`.
                }
                Plan::Fetch(desc, tx) => {
                    let rx = tx.subscribe();
                    self.spawn_download(desc, tx);
                    self.await_outcome(rx, version_id).await?;
                }
            }
        }
    }

    fn spawn_download(self: &Arc<Self>, desc: VersionDescriptor, tx: watch::Sender<Option<bool>>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let id = desc.id.clone();
            let result = this.download_version(&desc).await;
            let ok = result.is_ok();
            if let Err(e) = &result {
                tracing::warn!(version = %id, error = %e, "artifact download failed");
            }

            // Commit under one lock so no caller ever sees the version in
            // both maps or in neither while the outcome is success.
            {
                let mut inner = this.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.inflight.remove(&id);
                if let Ok(art) = result {
                    inner.cached.insert(id.clone(), art);
                }
            }
            if ok {
                this.save_manifest();
            }
            let _ = tx.send(Some(ok));
        });
    }

    async fn await_outcome(
        &self,
        mut rx: watch::Receiver<Option<bool>>,
        version_id: &str,
    ) -> Result<(), CacheError> {
        let outcome = rx.wait_for(|v| v.is_some()).await;
        match outcome {
            Ok(v) if *v == Some(true) => Ok(()),
            _ => Err(CacheError::DownloadFailed(version_id.to_string())),
        }
    }

    async fn download_version(&self, desc: &VersionDescriptor) -> anyhow::Result<CachedArtifact> {
        let spec = self
            .provider
            .resolve(&self.client, desc)
            .await
            .with_context(|| format!("resolve download for {}", desc.id))?;

        let path = self.artifact_path(&desc.id);
        fetch::fetch(
            &self.client,
            &path,
            &spec.url,
            spec.size,
            spec.checksum.as_ref(),
        )
        .await
        .with_context(|| format!("fetch artifact for {}", desc.id))?;

        // Upstreams without a published checksum get a locally computed one
        // so later verification still works.
        let sha = match &spec.checksum {
            Some(c) => c.hex.clone(),
            None => file_checksum_blocking(&path, HashAlgo::Sha256).await?,
        };

        tracing::info!(version = %desc.id, path = %path.display(), "artifact cached");
        Ok(CachedArtifact {
            id: desc.id.clone(),
            server_type: self.provider.server_type(),
            sha,
            path,
        })
    }

    /// Verifies the cached artifact, copies it to `dest`, verifies the copy.
    /// A mismatch at either point is reported, never silently evicted.
    async fn copy_verified(&self, art: &CachedArtifact, dest: &Path) -> Result<(), CacheError> {
        let checksum = artifact_checksum(art);

        let got = file_checksum_blocking(&art.path, checksum.algo).await?;
        if !got.eq_ignore_ascii_case(&checksum.hex) {
            return Err(CacheError::CorruptCache {
                id: art.id.clone(),
                expected: checksum.hex,
                got,
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&art.path, dest).await?;

        let got = file_checksum_blocking(dest, checksum.algo).await?;
        if !got.eq_ignore_ascii_case(&checksum.hex) {
            return Err(CacheError::CorruptCopy {
                id: art.id.clone(),
                expected: checksum.hex,
                got,
            });
        }
        Ok(())
    }

    /// Removes one cached artifact from disk and from the manifest. Unknown
    /// versions are a no-op; a failed removal leaves the manifest entry in
    /// place so the artifact is still accounted for.
    pub fn clear_cache(&self, version_id: &str) -> Result<(), CacheError> {
        let art = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.cached.get(version_id).cloned()
        };
        let Some(art) = art else {
            return Ok(());
        };

        remove_artifact_files(&self.root, &art)?;
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.cached.remove(version_id);
        }
        self.save_manifest();
        Ok(())
    }

    /// Clears every cached artifact. Failures are collected per entry and
    /// those entries stay in the manifest; entries that did clear stay
    /// cleared.
    pub fn clear_cache_all(&self) -> Result<(), CacheError> {
        let entries: Vec<CachedArtifact> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.cached.values().cloned().collect()
        };

        let mut failures = Vec::new();
        for art in entries {
            match remove_artifact_files(&self.root, &art) {
                Ok(()) => {
                    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner.cached.remove(&art.id);
                }
                Err(e) => failures.push((art.id.clone(), e.to_string())),
            }
        }
        self.save_manifest();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::ClearAll(failures))
        }
    }

    fn artifact_path(&self, version_id: &str) -> PathBuf {
        self.root.join(version_id).join("server.jar")
    }

    fn save_manifest(&self) {
        let entries: Vec<CachedArtifact> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut v: Vec<CachedArtifact> = inner.cached.values().cloned().collect();
            v.sort_by(|a, b| a.id.cmp(&b.id));
            v
        };

        let path = self.root.join(MANIFEST_FILE);
        if let Err(e) = write_json_atomic(&path, &entries) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist cache manifest");
        }
    }

    #[cfg(test)]
    fn has_inflight(&self, version_id: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.inflight.contains_key(version_id)
    }

    #[cfg(test)]
    fn cached_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cached.len()
    }
}

// Server jars run to hundreds of megabytes; hashing them stays off the
// async executor threads.
async fn file_checksum_blocking(path: &Path, algo: HashAlgo) -> Result<String, CacheError> {
    let path = path.to_path_buf();
    let hex = tokio::task::spawn_blocking(move || fetch::file_checksum(&path, algo))
        .await
        .map_err(std::io::Error::other)??;
    Ok(hex)
}

fn artifact_checksum(art: &CachedArtifact) -> Checksum {
    let algo = if art.sha.len() == 40 {
        HashAlgo::Sha1
    } else {
        HashAlgo::Sha256
    };
    Checksum::new(algo, art.sha.clone())
}

fn remove_artifact_files(root: &Path, art: &CachedArtifact) -> std::io::Result<()> {
    // Artifacts live in a per-version directory under the root; remove the
    // whole directory when the path follows that layout.
    let target = match art.path.parent() {
        Some(parent) if parent.starts_with(root) && parent != root => parent.to_path_buf(),
        _ => art.path.clone(),
    };
    match std::fs::metadata(&target) {
        Ok(m) if m.is_dir() => std::fs::remove_dir_all(&target),
        Ok(_) => std::fs::remove_file(&target),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Loads the manifest, dropping entries that do not decode as a full
/// `CachedArtifact`. A missing file is an empty cache.
fn load_manifest(path: &Path) -> anyhow::Result<HashMap<String, CachedArtifact>> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("read cache manifest {}", path.display()));
        }
    };

    let raw: Vec<serde_json::Value> = serde_json::from_slice(&data)
        .with_context(|| format!("parse cache manifest {}", path.display()))?;

    let mut out = HashMap::new();
    for value in raw {
        match serde_json::from_value::<CachedArtifact>(value) {
            Ok(art) => {
                out.insert(art.id.clone(), art);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "dropping malformed manifest entry");
            }
        }
    }
    Ok(out)
}

fn load_catalog_snapshot(path: &Path) -> Vec<VersionDescriptor> {
    match std::fs::read(path) {
        Ok(data) => match serde_json::from_slice(&data) {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "catalog snapshot unreadable");
                Vec::new()
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "catalog snapshot unreadable");
            }
            Vec::new()
        }
    }
}

fn save_catalog_snapshot(path: &Path, catalog: &[VersionDescriptor]) {
    if let Err(e) = write_json_atomic(path, &catalog) {
        tracing::warn!(path = %path.display(), error = %e, "failed to persist catalog snapshot");
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value).context("serialize")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::{DownloadSpec, StubProvider};
    use sha1::Digest;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &[u8] = b"01234567890123456789012345678901234567890123456789"; // 50 bytes

    fn body_sha1() -> String {
        hex::encode(sha1::Sha1::digest(BODY))
    }

    async fn stub_upstream() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/server.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .mount(&server)
            .await;
        server
    }

    fn stub_provider(uri: &str) -> Provider {
        StubProvider::with_version(
            "1.20.1",
            DownloadSpec {
                url: format!("{uri}/server.jar"),
                size: Some(BODY.len() as u64),
                checksum: Some(Checksum::new(HashAlgo::Sha1, body_sha1())),
            },
        )
    }

    #[tokio::test]
    async fn unknown_version_creates_no_inflight_handle() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(
            stub_provider("http://unused.invalid"),
            dir.path(),
            reqwest::Client::new(),
            false,
        )
        .await
        .unwrap();

        let err = cache
            .resolve_and_download("0.0.0", &dir.path().join("out.jar"))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::VersionNotFound(v) if v == "0.0.0"));
        assert!(!cache.has_inflight("0.0.0"));
    }

    #[tokio::test]
    async fn download_verify_and_serve_from_cache() {
        let upstream = stub_upstream().await;
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(
            stub_provider(&upstream.uri()),
            dir.path(),
            reqwest::Client::new(),
            false,
        )
        .await
        .unwrap();

        let dest = dir.path().join("room").join("server.jar");
        cache.resolve_and_download("1.20.1", &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap().len(), 50);
        assert_eq!(
            fetch::file_checksum(&dest, HashAlgo::Sha1).unwrap(),
            body_sha1()
        );
        assert_eq!(cache.cached_count(), 1);

        // Upstream gone: the second resolve must come from cache.
        drop(upstream);
        let dest2 = dir.path().join("room2").join("server.jar");
        cache.resolve_and_download("1.20.1", &dest2).await.unwrap();
        assert_eq!(std::fs::read(&dest2).unwrap(), BODY);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/server.jar"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(BODY)
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(
            stub_provider(&server.uri()),
            dir.path(),
            reqwest::Client::new(),
            false,
        )
        .await
        .unwrap();

        let mut tasks = Vec::new();
        for i in 0..5 {
            let cache = Arc::clone(&cache);
            let dest = dir.path().join(format!("out-{i}.jar"));
            tasks.push(tokio::spawn(async move {
                cache.resolve_and_download("1.20.1", &dest).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        // MockServer verifies expect(1) on drop.
        assert_eq!(cache.cached_count(), 1);
        assert!(!cache.has_inflight("1.20.1"));
    }

    #[tokio::test]
    async fn failed_download_reports_to_every_waiter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/server.jar"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(
            stub_provider(&server.uri()),
            dir.path(),
            reqwest::Client::new(),
            false,
        )
        .await
        .unwrap();

        let a = {
            let cache = Arc::clone(&cache);
            let dest = dir.path().join("a.jar");
            tokio::spawn(async move { cache.resolve_and_download("1.20.1", &dest).await })
        };
        let b = {
            let cache = Arc::clone(&cache);
            let dest = dir.path().join("b.jar");
            tokio::spawn(async move { cache.resolve_and_download("1.20.1", &dest).await })
        };

        assert!(matches!(
            a.await.unwrap(),
            Err(CacheError::DownloadFailed(_))
        ));
        assert!(matches!(
            b.await.unwrap(),
            Err(CacheError::DownloadFailed(_))
        ));
        assert!(!cache.has_inflight("1.20.1"));
        assert_eq!(cache.cached_count(), 0);
    }

    #[tokio::test]
    async fn manifest_round_trip_survives_reopen() {
        let upstream = stub_upstream().await;
        let dir = tempfile::tempdir().unwrap();

        {
            let cache = ArtifactCache::open(
                stub_provider(&upstream.uri()),
                dir.path(),
                reqwest::Client::new(),
                false,
            )
            .await
            .unwrap();
            cache
                .resolve_and_download("1.20.1", &dir.path().join("first.jar"))
                .await
                .unwrap();
        }
        drop(upstream);

        // Reopen offline: catalog comes from the snapshot, the artifact from
        // the manifest, and no network is available at all.
        let cache = ArtifactCache::open(
            stub_provider("http://unused.invalid"),
            dir.path(),
            reqwest::Client::new(),
            true,
        )
        .await
        .unwrap();
        assert_eq!(cache.cached_count(), 1);
        assert_eq!(cache.list_versions(), vec!["1.20.1".to_string()]);

        let dest = dir.path().join("second.jar");
        cache.resolve_and_download("1.20.1", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn malformed_manifest_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("vanilla");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join(MANIFEST_FILE),
            serde_json::json!([
                {"id": "1.20.1", "type": "VANILLA", "sha": "aa".repeat(20), "path": "/tmp/x"},
                {"id": "1.19", "type": "VANILLA"},
                {"id": "1.18", "type": "VANILLA", "sha": "bb", "path": "/tmp/y", "extra": 1}
            ])
            .to_string(),
        )
        .unwrap();

        let cache = ArtifactCache::open(
            stub_provider("http://unused.invalid"),
            dir.path(),
            reqwest::Client::new(),
            true,
        )
        .await
        .unwrap();
        assert_eq!(cache.cached_count(), 1);
    }

    #[tokio::test]
    async fn corrupt_cached_artifact_is_reported_not_evicted() {
        let upstream = stub_upstream().await;
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(
            stub_provider(&upstream.uri()),
            dir.path(),
            reqwest::Client::new(),
            false,
        )
        .await
        .unwrap();

        cache
            .resolve_and_download("1.20.1", &dir.path().join("ok.jar"))
            .await
            .unwrap();

        // Tamper with the cached copy.
        let art_path = dir.path().join("vanilla").join("1.20.1").join("server.jar");
        std::fs::write(&art_path, b"tampered").unwrap();

        let err = cache
            .resolve_and_download("1.20.1", &dir.path().join("bad.jar"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::CorruptCache { .. }));
        assert_eq!(cache.cached_count(), 1);
    }

    #[tokio::test]
    async fn clear_cache_removes_entry_and_files() {
        let upstream = stub_upstream().await;
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(
            stub_provider(&upstream.uri()),
            dir.path(),
            reqwest::Client::new(),
            false,
        )
        .await
        .unwrap();

        cache
            .resolve_and_download("1.20.1", &dir.path().join("out.jar"))
            .await
            .unwrap();
        let art_dir = dir.path().join("vanilla").join("1.20.1");
        assert!(art_dir.exists());

        cache.clear_cache("1.20.1").unwrap();
        assert!(!art_dir.exists());
        assert_eq!(cache.cached_count(), 0);

        // Clearing an unknown version is a no-op.
        cache.clear_cache("0.0.0").unwrap();
        cache.clear_cache_all().unwrap();
    }

    #[tokio::test]
    async fn failed_clear_keeps_manifest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("vanilla");
        let good = root.join("1.19");
        std::fs::create_dir_all(&good).unwrap();
        std::fs::write(good.join("server.jar"), b"a").unwrap();
        // "1.18" is a plain file, so resolving 1.18/sub/server.jar fails with
        // NotADirectory and the removal errors out.
        std::fs::write(root.join("1.18"), b"blocker").unwrap();

        std::fs::write(
            root.join(MANIFEST_FILE),
            serde_json::json!([
                {"id": "1.19", "type": "VANILLA", "sha": "aa".repeat(20),
                 "path": good.join("server.jar")},
                {"id": "1.18", "type": "VANILLA", "sha": "bb".repeat(20),
                 "path": root.join("1.18").join("sub").join("server.jar")},
            ])
            .to_string(),
        )
        .unwrap();

        let cache = ArtifactCache::open(
            stub_provider("http://unused.invalid"),
            dir.path(),
            reqwest::Client::new(),
            true,
        )
        .await
        .unwrap();
        assert_eq!(cache.cached_count(), 2);

        let err = cache.clear_cache_all().unwrap_err();
        assert!(matches!(err, CacheError::ClearAll(ref v) if v.len() == 1));
        assert_eq!(cache.cached_count(), 1);
        assert!(!good.exists());

        // The failed entry survives in the persisted manifest too.
        let kept = load_manifest(&root.join(MANIFEST_FILE)).unwrap();
        assert!(kept.contains_key("1.18"));

        // Single-entry clear on the broken entry also keeps it accounted for.
        assert!(cache.clear_cache("1.18").is_err());
        assert_eq!(cache.cached_count(), 1);

        // Once the path is fixed up the retry clears everything.
        std::fs::remove_file(root.join("1.18")).unwrap();
        std::fs::create_dir_all(root.join("1.18").join("sub")).unwrap();
        std::fs::write(root.join("1.18").join("sub").join("server.jar"), b"b").unwrap();
        cache.clear_cache_all().unwrap();
        assert_eq!(cache.cached_count(), 0);
    }
}
