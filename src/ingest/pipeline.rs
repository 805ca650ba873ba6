use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::error::UploadError;
use crate::core::types::{AudioId, PublisherId};
use crate::storage::StorageLayout;

use super::extract::extract_archive;
use super::validator::{
    classify, validate_fragmented_mp4, validate_playlist, validate_transport_stream, FileClass,
};

/// Run one upload transaction to completion.
///
/// The body is parked as `<temp_root>/<audio_id>.tar.gz`, unpacked into a
/// staging directory named by the audio id, validated file by file, and the
/// survivors are promoted into `<storage_root>/<publisher>/<audio_id>/`.
///
/// On every exit path — success or any failure — the archive file and the
/// staging directory are gone and the permanent tree holds either the full
/// validated set or nothing.
///
/// Blocking: does synchronous filesystem work throughout. Callers on the
/// runtime run it inside `spawn_blocking`.
pub fn run_upload(
    layout: &StorageLayout,
    publisher: &PublisherId,
    body: &[u8],
) -> Result<AudioId, UploadError> {
    let audio_id = AudioId::new();
    let archive_path = layout.archive_path(&audio_id);

    info!(%publisher, %audio_id, bytes = body.len(), "upload started");

    let result = run_stages(layout, publisher, &audio_id, &archive_path, body);

    if let Err(e) = fs::remove_file(&archive_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %archive_path.display(), error = %e, "failed to remove uploaded archive");
        }
    }

    match &result {
        Ok(()) => info!(%publisher, %audio_id, "upload complete"),
        Err(e) => warn!(%publisher, %audio_id, error = %e, "upload failed"),
    }
    result.map(|()| audio_id)
}

fn run_stages(
    layout: &StorageLayout,
    publisher: &PublisherId,
    audio_id: &AudioId,
    archive_path: &Path,
    body: &[u8],
) -> Result<(), UploadError> {
    fs::write(archive_path, body).map_err(UploadError::ArchiveWrite)?;

    let archive_len = fs::metadata(archive_path).map(|m| m.len()).unwrap_or(0);
    if archive_len == 0 {
        return Err(UploadError::EmptyUpload);
    }

    let staging = layout.create_staging(audio_id)?;

    let outcome = extract_and_promote(layout, publisher, audio_id, archive_path, &staging);
    if outcome.is_err() {
        layout.remove_staging(&staging);
    }
    outcome
}

fn extract_and_promote(
    layout: &StorageLayout,
    publisher: &PublisherId,
    audio_id: &AudioId,
    archive_path: &Path,
    staging: &Path,
) -> Result<(), UploadError> {
    match extract_archive(archive_path, staging) {
        Ok(true) => {}
        Ok(false) => {
            return Err(UploadError::InvalidArchive {
                reason: "no entries extracted".to_string(),
            });
        }
        Err(e) => {
            return Err(UploadError::InvalidArchive {
                reason: e.to_string(),
            });
        }
    }

    let kept = validate_staging(staging)?;
    if kept.is_empty() {
        return Err(UploadError::NoValidFiles);
    }

    layout.promote(staging, publisher, audio_id, &kept)?;
    Ok(())
}

/// Validate every immediate child of the staging directory.
///
/// Rejected files are deleted in place; files that only warn are kept.
/// Returns the paths that survive.
fn validate_staging(staging: &Path) -> Result<Vec<PathBuf>, UploadError> {
    let mut kept = Vec::new();

    for entry in fs::read_dir(staging)?.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            warn!(%name, "removing unexpected directory in upload");
            let _ = fs::remove_dir_all(&path);
            continue;
        }

        match classify(&name) {
            FileClass::Playlist => {
                let content = fs::read(&path)?;
                if validate_playlist(&content) {
                    kept.push(path);
                } else {
                    warn!(%name, "invalid playlist, removing");
                    fs::remove_file(&path)?;
                }
            }
            FileClass::TransportStream => {
                let content = fs::read(&path)?;
                if validate_transport_stream(&content) {
                    kept.push(path);
                } else {
                    warn!(%name, "invalid transport stream, removing");
                    fs::remove_file(&path)?;
                }
            }
            FileClass::FragmentedMp4 => {
                // Advisory check only: a malformed segment is kept.
                if let Err(issue) = validate_fragmented_mp4(&path) {
                    warn!(%name, %issue, "possibly invalid fMP4 segment");
                }
                kept.push(path);
            }
            FileClass::Mp4 => {
                debug!(%name, "accepting MP4 file");
                kept.push(path);
            }
            FileClass::Other => {
                warn!(%name, "unrecognized file, removing");
                fs::remove_file(&path)?;
            }
        }
    }

    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::StorageConfig;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    fn layout_in(dir: &Path) -> StorageLayout {
        let layout = StorageLayout::new(&StorageConfig {
            storage_root: dir.join("hls_storage"),
            temp_root: dir.join("hls_temp"),
        });
        layout.ensure_roots().unwrap();
        layout
    }

    fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn temp_root_is_clean(layout: &StorageLayout) -> bool {
        fs::read_dir(layout.temp_root()).unwrap().next().is_none()
    }

    fn storage_is_empty(layout: &StorageLayout) -> bool {
        fs::read_dir(layout.storage_root()).unwrap().next().is_none()
    }

    #[test]
    fn happy_path_promotes_all_files() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let publisher = PublisherId::from("192.168.1.10");

        let archive = build_archive(&[
            ("index.m3u8", b"#EXTM3U\n#EXT-X-VERSION:3\n".as_slice()),
            ("hls_mp3_64.m3u8", b"#EXTM3U\nhls_mp3_64_0.ts\n".as_slice()),
            ("hls_mp3_64_0.ts", &[0x47, 0x40, 0x11]),
        ]);

        let audio_id = run_upload(&layout, &publisher, &archive).unwrap();

        let dest = layout
            .storage_root()
            .join("192.168.1.10")
            .join(audio_id.to_string());
        let mut names: Vec<String> = fs::read_dir(&dest)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["hls_mp3_64.m3u8", "hls_mp3_64_0.ts", "index.m3u8"]);
        assert!(temp_root_is_clean(&layout));
    }

    #[test]
    fn unrecognized_file_is_dropped_from_promotion() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let publisher = PublisherId::from("192.168.1.11");

        let archive = build_archive(&[
            ("index.m3u8", b"#EXTM3U\n".as_slice()),
            ("hls_mp3_64_0.ts", &[0x47]),
            ("junk.bin", b"opaque".as_slice()),
        ]);

        let audio_id = run_upload(&layout, &publisher, &archive).unwrap();

        let dest = layout
            .storage_root()
            .join("192.168.1.11")
            .join(audio_id.to_string());
        assert!(dest.join("index.m3u8").is_file());
        assert!(dest.join("hls_mp3_64_0.ts").is_file());
        assert!(!dest.join("junk.bin").exists());
    }

    #[test]
    fn all_invalid_fails_and_leaves_storage_untouched() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let publisher = PublisherId::from("192.168.1.12");

        let archive = build_archive(&[("bad.m3u8", b"no marker here\n".as_slice())]);

        let err = run_upload(&layout, &publisher, &archive).unwrap_err();
        assert!(matches!(err, UploadError::NoValidFiles));
        assert_eq!(err.status(), 400);
        assert!(storage_is_empty(&layout));
        assert!(temp_root_is_clean(&layout));
    }

    #[test]
    fn empty_body_is_rejected() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let publisher = PublisherId::from("192.168.1.13");

        let err = run_upload(&layout, &publisher, &[]).unwrap_err();
        assert!(matches!(err, UploadError::EmptyUpload));
        assert!(temp_root_is_clean(&layout));
        assert!(storage_is_empty(&layout));
    }

    #[test]
    fn non_gzip_body_is_rejected() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let publisher = PublisherId::from("192.168.1.14");

        let err = run_upload(&layout, &publisher, b"definitely not gzip").unwrap_err();
        assert!(matches!(err, UploadError::InvalidArchive { .. }));
        assert_eq!(err.status(), 400);
        assert!(temp_root_is_clean(&layout));
        assert!(storage_is_empty(&layout));
    }

    #[test]
    fn traversal_archive_is_rejected() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let publisher = PublisherId::from("192.168.1.15");

        // One honest entry, one hostile one; the whole archive is refused.
        // tar::Builder refuses to write `..` paths, so the hostile name is
        // forged in the GNU header directly.
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(8);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "index.m3u8", b"#EXTM3U\n".as_slice())
            .unwrap();
        let mut forged = tar::Header::new_gnu();
        forged.set_size(1);
        forged.set_mode(0o644);
        {
            let gnu = forged.as_gnu_mut().unwrap();
            let name = b"../../escape.ts";
            gnu.name[..name.len()].copy_from_slice(name);
        }
        forged.set_cksum();
        builder.append(&forged, [0x47u8].as_slice()).unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let err = run_upload(&layout, &publisher, &archive).unwrap_err();
        assert!(matches!(err, UploadError::InvalidArchive { .. }));
        assert!(temp_root_is_clean(&layout));
        assert!(storage_is_empty(&layout));
    }

    #[test]
    fn zstd_entries_land_decompressed() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let publisher = PublisherId::from("192.168.1.16");

        let ts_payload = [0x47u8, 0xAB, 0xCD];
        let mut compressed = Vec::new();
        zstd::stream::copy_encode(&ts_payload[..], &mut compressed, 0).unwrap();

        let archive = build_archive(&[
            ("hls_flac_64.m3u8", b"#EXTM3U\n".as_slice()),
            ("hls_flac_64_0.ts.zst", compressed.as_slice()),
        ]);

        let audio_id = run_upload(&layout, &publisher, &archive).unwrap();

        let dest = layout
            .storage_root()
            .join("192.168.1.16")
            .join(audio_id.to_string());
        assert_eq!(fs::read(dest.join("hls_flac_64_0.ts")).unwrap(), ts_payload);
        assert!(!dest.join("hls_flac_64_0.ts.zst").exists());
    }

    #[test]
    fn malformed_m4s_warns_but_upload_succeeds() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let publisher = PublisherId::from("192.168.1.17");

        // ftyp box present, no moof: advisory failure only.
        let mut m4s = Vec::new();
        m4s.extend_from_slice(&16u32.to_be_bytes());
        m4s.extend_from_slice(b"ftyp");
        m4s.extend_from_slice(b"iso5\0\0\0\0");

        let archive = build_archive(&[("seg_0.m4s", m4s.as_slice())]);
        let audio_id = run_upload(&layout, &publisher, &archive).unwrap();

        let dest = layout
            .storage_root()
            .join("192.168.1.17")
            .join(audio_id.to_string());
        assert!(dest.join("seg_0.m4s").is_file());
    }

    #[test]
    fn repeated_uploads_get_distinct_audio_ids() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let publisher = PublisherId::from("192.168.1.18");

        let archive = build_archive(&[("index.m3u8", b"#EXTM3U\n".as_slice())]);
        let a = run_upload(&layout, &publisher, &archive).unwrap();
        let b = run_upload(&layout, &publisher, &archive).unwrap();

        assert_ne!(a, b);
        let root = layout.storage_root().join("192.168.1.18");
        assert!(root.join(a.to_string()).is_dir());
        assert!(root.join(b.to_string()).is_dir());
    }
}
