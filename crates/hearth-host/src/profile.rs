//! Room profiles: the persisted descriptor of a room, plus room creation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::process::Command;

use hearth_process::{RoomId, ServerType};

use crate::cache::ArtifactCache;
use crate::config::Config;

const EULA_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RoomProfile {
    pub id: RoomId,
    #[serde(rename = "server-type")]
    pub server_type: ServerType,
    #[serde(rename = "version-id")]
    pub version_id: String,
    pub name: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(rename = "jarpath")]
    pub jar_path: PathBuf,
}

pub fn load_profiles(path: &Path) -> anyhow::Result<Vec<RoomProfile>> {
    let data = std::fs::read(path)
        .with_context(|| format!("read room profiles {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("parse room profiles {}", path.display()))
}

pub fn save_profiles(path: &Path, profiles: &[RoomProfile]) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(profiles).context("serialize room profiles")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

/// Creates a new room on disk: assigns an id, materializes the server jar
/// from the artifact cache, and runs the EULA bootstrap. Any failure removes
/// the partially created directory before returning.
pub async fn generate_room(
    config: &Config,
    caches: &HashMap<ServerType, Arc<ArtifactCache>>,
    name: &str,
    server_type: ServerType,
    version_id: &str,
) -> anyhow::Result<RoomProfile> {
    let id = RoomId::new();
    let dir = config.servers_root.join(id.as_str());
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("create server directory {}", dir.display()))?;

    let result = build_room(config, caches, &dir, name, server_type, version_id, id).await;
    if result.is_err() {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to clean up server directory");
        }
    }
    result
}

async fn build_room(
    config: &Config,
    caches: &HashMap<ServerType, Arc<ArtifactCache>>,
    dir: &Path,
    name: &str,
    server_type: ServerType,
    version_id: &str,
    id: RoomId,
) -> anyhow::Result<RoomProfile> {
    let jar_path = dir.join("server.jar");

    let cache = caches
        .get(&server_type)
        .with_context(|| format!("no artifact cache for server type {server_type}"))?;
    cache
        .resolve_and_download(version_id, &jar_path)
        .await
        .with_context(|| format!("materialize {server_type} {version_id}"))?;

    run_eula_bootstrap(&config.java_bin, dir, &jar_path).await?;
    accept_eula(dir)?;

    Ok(RoomProfile {
        id,
        server_type,
        version_id: version_id.to_string(),
        name: name.to_string(),
        emails: Vec::new(),
        jar_path,
    })
}

/// Runs the jar once so it writes its initial files, `eula.txt` included.
/// Bounded by a hard timeout; expiry aborts room creation.
async fn run_eula_bootstrap(java_bin: &str, dir: &Path, jar_path: &Path) -> anyhow::Result<()> {
    let mut child = Command::new(java_bin)
        .arg("-jar")
        .arg(jar_path)
        .arg("nogui")
        .current_dir(dir)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("spawn eula bootstrap")?;

    match tokio::time::timeout(EULA_TIMEOUT, child.wait()).await {
        Ok(status) => {
            let status = status.context("wait for eula bootstrap")?;
            if !status.success() {
                anyhow::bail!("eula bootstrap exited abnormally: {status}");
            }
            Ok(())
        }
        Err(_) => {
            let _ = child.kill().await;
            anyhow::bail!("eula bootstrap timed out after {:?}", EULA_TIMEOUT)
        }
    }
}

fn accept_eula(dir: &Path) -> anyhow::Result<()> {
    let path = dir.join("eula.txt");
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("read {}", path.display()))?;
    let accepted = text.replace("eula=false", "eula=true");
    std::fs::write(&path, accepted).with_context(|| format!("rewrite {}", path.display()))?;
    Ok(())
}
