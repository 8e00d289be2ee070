//! Directory archiver used for room backups.

use std::io::{Read, Seek, Write};
use std::path::Path;

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zips the contents of `src` into `writer`. Directory entries are stored,
/// regular files are deflated, symlinks are skipped. Entry names are
/// relative to `src` with `/` separators.
pub fn zip_dir<W: Write + Seek>(src: &Path, writer: W) -> anyhow::Result<W> {
    let mut zip = ZipWriter::new(writer);
    add_dir(&mut zip, src, src)?;
    let writer = zip.finish().context("finalize archive")?;
    Ok(writer)
}

fn add_dir<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    root: &Path,
    dir: &Path,
) -> anyhow::Result<()> {
    let dir_opts = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let file_opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let entries =
        std::fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let meta = std::fs::symlink_metadata(&path)?;

        if meta.file_type().is_symlink() {
            tracing::debug!(path = %path.display(), "skipping symlink in archive");
            continue;
        }

        let name = entry_name(root, &path)?;
        if meta.is_dir() {
            zip.add_directory(format!("{name}/"), dir_opts)
                .with_context(|| format!("add directory entry {name}"))?;
            add_dir(zip, root, &path)?;
        } else {
            zip.start_file(&name, file_opts)
                .with_context(|| format!("add file entry {name}"))?;
            let mut f = std::fs::File::open(&path)
                .with_context(|| format!("open {}", path.display()))?;
            let mut buf = [0u8; 8192];
            loop {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                zip.write_all(&buf[..n])?;
            }
        }
    }
    Ok(())
}

fn entry_name(root: &Path, path: &Path) -> anyhow::Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("path {} escapes archive root", path.display()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
