//! Download-staging store.
//!
//! Produced artifacts (room backups) are written into a staged file and, on
//! `finish`, published under a download id together with a sidecar info
//! record carrying size, checksum and expiry. Retrieval by id is left to the
//! routing layer; the store only guarantees that a published file is complete
//! and its info record accurate.

use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::fetch::{self, HashAlgo};

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DownloadId(pub String);

impl DownloadId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Sidecar metadata persisted next to each published download.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DownloadInfo {
    pub name: String,
    pub size: u64,
    pub sha256: String,
    /// Unix milliseconds after which the download may be reaped.
    #[serde(rename = "expiration-stamp")]
    pub expiration_stamp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("download not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("info record for {id} is unreadable: {source}")]
    BadInfo {
        id: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct DownloadStore {
    root: PathBuf,
}

/// Writable handle for one staged download. Publishing happens in `finish`;
/// dropping the handle without finishing leaves only a `.part` file behind.
pub struct StagingFile {
    id: DownloadId,
    name: String,
    expiration_stamp: i64,
    part_path: PathBuf,
    final_path: PathBuf,
    info_path: PathBuf,
    file: File,
}

impl DownloadStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Opens a new staged download named `name`, expiring `expires_in` after
    /// now. Returns the writable handle and the id it will publish under.
    pub fn put(
        &self,
        name: &str,
        expires_in: chrono::Duration,
    ) -> Result<(StagingFile, DownloadId), StagingError> {
        let id = DownloadId::new();
        let part_path = self.root.join(format!("{}.part", id.0));
        let final_path = self.root.join(&id.0);
        let info_path = self.root.join(format!("{}.json", id.0));

        let file = File::create(&part_path)?;
        let staged = StagingFile {
            id: id.clone(),
            name: name.to_string(),
            expiration_stamp: (Utc::now() + expires_in).timestamp_millis(),
            part_path,
            final_path,
            info_path,
            file,
        };
        Ok((staged, id))
    }

    pub fn info(&self, id: &DownloadId) -> Result<DownloadInfo, StagingError> {
        let info_path = self.root.join(format!("{}.json", id.0));
        let data = match std::fs::read(&info_path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StagingError::NotFound(id.0.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data).map_err(|source| StagingError::BadInfo {
            id: id.0.clone(),
            source,
        })
    }

    pub fn open(&self, id: &DownloadId) -> Result<File, StagingError> {
        let path = self.root.join(&id.0);
        match File::open(&path) {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StagingError::NotFound(id.0.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl StagingFile {
    pub fn id(&self) -> &DownloadId {
        &self.id
    }

    /// Publishes the staged file: records size and sha256, writes the info
    /// sidecar, then renames the payload into place.
    pub fn finish(mut self) -> Result<DownloadInfo, StagingError> {
        self.file.flush()?;
        self.file.sync_all()?;
        drop(self.file);

        let size = std::fs::metadata(&self.part_path)?.len();
        let sha256 = fetch::file_checksum(&self.part_path, HashAlgo::Sha256)?;

        let info = DownloadInfo {
            name: self.name,
            size,
            sha256,
            expiration_stamp: self.expiration_stamp,
        };
        write_atomic(&self.info_path, &serde_json::to_vec_pretty(&info).map_err(
            |source| StagingError::BadInfo {
                id: self.id.0.clone(),
                source,
            },
        )?)?;
        std::fs::rename(&self.part_path, &self.final_path)?;
        Ok(info)
    }
}

impl Write for StagingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Seek for StagingFile {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}
