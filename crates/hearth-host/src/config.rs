//! Typed host configuration, decoded once at startup.

use std::path::{Path, PathBuf};

use anyhow::Context;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Root directory holding one working directory per room.
    pub servers_root: PathBuf,
    /// Root directory of the per-type artifact caches.
    pub cache_root: PathBuf,
    /// Root directory of the download-staging store.
    pub downloads_root: PathBuf,
    /// Persisted room profiles.
    pub profiles_file: PathBuf,
    /// Skip upstream catalog refresh and rely on the saved snapshot.
    pub offline: bool,
    pub java_bin: String,
    pub java_heap_mb: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers_root: PathBuf::from("servers"),
            cache_root: PathBuf::from("cache"),
            downloads_root: PathBuf::from("downloads"),
            profiles_file: PathBuf::from("rooms.json"),
            offline: false,
            java_bin: "java".to_string(),
            java_heap_mb: 2048,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let cfg: Config = serde_json::from_slice(&data)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Loads `HEARTH_CONFIG` if set, `./hearth.json` if present, else defaults.
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("HEARTH_CONFIG") {
            return Self::load(Path::new(&path));
        }
        let local = Path::new("hearth.json");
        if local.exists() {
            return Self::load(local);
        }
        Ok(Self::default())
    }
}
