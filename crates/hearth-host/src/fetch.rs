//! Download-and-verify primitive used by the artifact cache.

use std::io::Read;
use std::path::Path;

use sha1::Digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha1,
    Sha256,
}

/// Expected digest of a downloaded file, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algo: HashAlgo,
    pub hex: String,
}

impl Checksum {
    pub fn new(algo: HashAlgo, hex: impl Into<String>) -> Self {
        Self {
            algo,
            hex: hex.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch { expected: u64, got: u64 },
    #[error("checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

enum Digester {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl Digester {
    fn new(algo: HashAlgo) -> Self {
        match algo {
            HashAlgo::Sha1 => Digester::Sha1(sha1::Sha1::new()),
            HashAlgo::Sha256 => Digester::Sha256(sha2::Sha256::new()),
        }
    }

    fn update(&mut self, buf: &[u8]) {
        match self {
            Digester::Sha1(h) => h.update(buf),
            Digester::Sha256(h) => h.update(buf),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Digester::Sha1(h) => hex::encode(h.finalize()),
            Digester::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Downloads `url` to `dest`, creating parent directories as needed.
///
/// `expected_size: None` skips size validation and `checksum: None` skips
/// digest validation. The body is streamed into `dest` with a `.part`
/// extension and only renamed into place once every check has passed, so a
/// failed fetch never leaves a partial or corrupt file behind.
pub async fn fetch(
    client: &reqwest::Client,
    dest: &Path,
    url: &str,
    expected_size: Option<u64>,
    checksum: Option<&Checksum>,
) -> Result<(), FetchError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = dest.with_extension("part");
    match fetch_to(client, &tmp, url, expected_size, checksum).await {
        Ok(()) => {
            tokio::fs::rename(&tmp, dest).await?;
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e)
        }
    }
}

async fn fetch_to(
    client: &reqwest::Client,
    tmp: &Path,
    url: &str,
    expected_size: Option<u64>,
    checksum: Option<&Checksum>,
) -> Result<(), FetchError> {
    use tokio::io::AsyncWriteExt;

    let mut resp = client.get(url).send().await?.error_for_status()?;

    let mut hasher = checksum.map(|c| Digester::new(c.algo));
    let mut file = tokio::fs::File::create(tmp).await?;
    let mut total: u64 = 0;

    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
        if let Some(h) = hasher.as_mut() {
            h.update(&chunk);
        }
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Some(expected) = expected_size
        && total != expected
    {
        return Err(FetchError::SizeMismatch {
            expected,
            got: total,
        });
    }

    if let (Some(h), Some(c)) = (hasher, checksum) {
        let got = h.finalize_hex();
        if !got.eq_ignore_ascii_case(&c.hex) {
            return Err(FetchError::ChecksumMismatch {
                expected: c.hex.clone(),
                got,
            });
        }
    }

    Ok(())
}

/// Hex digest of an on-disk file, streamed in 8 KiB chunks.
pub fn file_checksum(path: &Path, algo: HashAlgo) -> std::io::Result<String> {
    let mut f = std::fs::File::open(path)?;
    let mut hasher = Digester::new(algo);
    let mut buf = [0u8; 8192];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}
