use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, warn};

use crate::core::error::ExtractError;

/// Fixed copy buffer for streaming entry bodies to disk.
const COPY_BUF_SIZE: usize = 8192;

/// Extension of entries that get a zstd post-decompression pass.
const ZSTD_EXT: &str = "zst";

/// Unpack a gzip-compressed tar archive into `staging_dir`.
///
/// Entries are streamed to disk in fixed-size chunks with the
/// archive-reported permissions. Entries ending in `.zst` are decompressed
/// in place (suffix stripped) and the compressed original is deleted.
///
/// Per-entry failures are logged and skipped. An entry whose path would
/// land outside `staging_dir` invalidates the whole archive.
///
/// Returns `Ok(true)` iff at least one entry was written.
pub fn extract_archive(archive_path: &Path, staging_dir: &Path) -> Result<bool, ExtractError> {
    let file = File::open(archive_path).map_err(|source| ExtractError::Open {
        path: archive_path.to_path_buf(),
        source,
    })?;

    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = Archive::new(decoder);

    let mut extracted = false;

    for entry in archive.entries().map_err(ExtractError::Archive)? {
        let mut entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // The tar stream is not recoverable past a header error;
                // keep whatever was already written.
                warn!(error = %e, "archive stream ended early");
                break;
            }
        };

        let entry_path = match entry.path() {
            Ok(p) => p.into_owned(),
            Err(e) => {
                warn!(error = %e, "skipping entry with undecodable path");
                continue;
            }
        };

        let out_path = match resolve_entry_path(staging_dir, &entry_path) {
            Some(p) => p,
            None => {
                return Err(ExtractError::PathEscape { entry: entry_path });
            }
        };

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            if let Err(e) = fs::create_dir_all(&out_path) {
                warn!(path = %out_path.display(), error = %e, "failed to create directory entry");
            }
            continue;
        }
        if !entry_type.is_file() {
            warn!(path = %entry_path.display(), ?entry_type, "skipping non-regular entry");
            continue;
        }

        if let Err(e) = write_entry(&mut entry, &out_path) {
            warn!(path = %out_path.display(), error = %e, "failed to extract entry, skipping");
            let _ = fs::remove_file(&out_path);
            continue;
        }

        debug!(path = %out_path.display(), "extracted entry");
        extracted = true;

        if out_path.extension().and_then(|e| e.to_str()) == Some(ZSTD_EXT) {
            decompress_zstd_entry(&out_path);
        }
    }

    Ok(extracted)
}

/// Join a tar-reported path onto the staging directory, refusing anything
/// that could land outside it: absolute paths and `..` components.
fn resolve_entry_path(staging_dir: &Path, entry_path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(staging_dir.join(clean))
}

/// Stream one entry body to disk and apply its recorded mode.
fn write_entry<R: Read>(entry: &mut tar::Entry<'_, R>, out_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut out = File::create(out_path)?;
    let mut buf = [0u8; COPY_BUF_SIZE];
    loop {
        let n = entry.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    out.sync_data()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(mode) = entry.header().mode() {
            let _ = fs::set_permissions(out_path, fs::Permissions::from_mode(mode));
        }
    }

    Ok(())
}

/// Decompress a `.zst` entry next to itself and drop the compressed file.
/// On failure the original is left in place; it carries an unrecognized
/// extension and will be removed during validation.
fn decompress_zstd_entry(zst_path: &Path) {
    let target = zst_path.with_extension("");

    let result = (|| -> std::io::Result<()> {
        let src = BufReader::new(File::open(zst_path)?);
        let dst = BufWriter::new(File::create(&target)?);
        zstd::stream::copy_decode(src, dst)
    })();

    match result {
        Ok(()) => {
            debug!(path = %target.display(), "decompressed zstd entry");
            if let Err(e) = fs::remove_file(zst_path) {
                warn!(path = %zst_path.display(), error = %e, "failed to delete zstd original");
            }
        }
        Err(e) => {
            warn!(path = %zst_path.display(), error = %e, "zstd decompression failed");
            let _ = fs::remove_file(&target);
        }
    }
}
