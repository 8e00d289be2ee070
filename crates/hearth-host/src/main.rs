use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use hearth_host::cache::ArtifactCache;
use hearth_host::config::Config;
use hearth_host::notify::TracingNotifier;
use hearth_host::registry::RoomRegistry;
use hearth_host::staging::DownloadStore;
use hearth_host::versions::Provider;
use hearth_process::ServerType;

const JAVA_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Verifies a usable Java runtime is on the path. Failure aborts startup.
async fn probe_java(java_bin: &str) -> anyhow::Result<()> {
    let probe = tokio::process::Command::new(java_bin)
        .arg("-version")
        .output();
    let out = tokio::time::timeout(JAVA_PROBE_TIMEOUT, probe)
        .await
        .with_context(|| format!("`{java_bin} -version` timed out"))?
        .with_context(|| format!("run `{java_bin} -version`"))?;
    if !out.status.success() {
        anyhow::bail!("`{java_bin} -version` exited with {}", out.status);
    }
    let banner = String::from_utf8_lossy(&out.stderr);
    tracing::info!(version = banner.lines().next().unwrap_or_default(), "java runtime available");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::load_default().context("load configuration")?;
    probe_java(&config.java_bin).await?;

    let client = reqwest::Client::builder()
        .user_agent("hearth-host")
        .timeout(Duration::from_secs(15 * 60))
        .build()
        .context("build http client")?;

    let mut caches = HashMap::new();
    for server_type in ServerType::all() {
        let cache = ArtifactCache::open(
            Provider::for_type(server_type),
            &config.cache_root,
            client.clone(),
            config.offline,
        )
        .await
        .with_context(|| format!("open {server_type} artifact cache"))?;
        caches.insert(server_type, cache);
    }

    // Validate the staging root early; the routing layer opens its own
    // handle per request.
    let _staging =
        DownloadStore::new(&config.downloads_root).context("open download-staging store")?;

    let registry = RoomRegistry::new(
        &config.java_bin,
        config.java_heap_mb,
        Arc::new(TracingNotifier),
    );
    if config.profiles_file.exists() {
        registry
            .load_rooms(&config.profiles_file)
            .context("load room profiles")?;
    } else {
        tracing::info!(path = %config.profiles_file.display(), "no room profiles yet");
    }

    tracing::info!(caches = caches.len(), "hearth-host ready");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    tracing::info!("shutting down");

    registry
        .save_rooms(&config.profiles_file)
        .context("save room profiles")?;
    Ok(())
}
