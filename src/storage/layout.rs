use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::config::StorageConfig;
use crate::core::error::StorageError;
use crate::core::types::{AudioId, PublisherId};

/// Compressed archive suffix for uploaded payloads parked in the temp root.
pub const ARCHIVE_EXT: &str = ".tar.gz";

/// Owner of the on-disk tree.
///
/// ```text
/// <storage_root>/
///   <publisher>/
///     <audio_id>/
///       index.m3u8
///       ...
/// <temp_root>/
///   <audio_id>.tar.gz      uploaded archive, removed after the upload
///   <audio_id>/            staging directory, removed after the upload
/// ```
///
/// The two roots share a parent so that promotion is a same-filesystem
/// rename per file. The directory tree is the entire index; there is no
/// metadata database beside it.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    storage_root: PathBuf,
    temp_root: PathBuf,
}

impl StorageLayout {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            storage_root: config.storage_root.clone(),
            temp_root: config.temp_root.clone(),
        }
    }

    /// Create both roots if absent. Called once at startup.
    pub fn ensure_roots(&self) -> Result<(), StorageError> {
        for root in [&self.storage_root, &self.temp_root] {
            fs::create_dir_all(root).map_err(|source| StorageError::CreateDir {
                path: root.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Where the raw uploaded archive for this upload is parked.
    pub fn archive_path(&self, audio_id: &AudioId) -> PathBuf {
        self.temp_root.join(format!("{audio_id}{ARCHIVE_EXT}"))
    }

    /// Create and return the staging directory for one upload.
    pub fn create_staging(&self, audio_id: &AudioId) -> Result<PathBuf, StorageError> {
        let staging = self.temp_root.join(audio_id.to_string());
        fs::create_dir_all(&staging).map_err(|source| StorageError::CreateDir {
            path: staging.clone(),
            source,
        })?;
        Ok(staging)
    }

    /// Best-effort removal of a staging directory. Failures are logged;
    /// nothing above can act on them.
    pub fn remove_staging(&self, staging: &Path) {
        if let Err(e) = fs::remove_dir_all(staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
            }
        }
    }

    /// Move the surviving files of one upload into the permanent tree and
    /// drop the staging directory.
    ///
    /// Renames are same-filesystem, so each file appears atomically. If any
    /// rename fails the half-promoted audio directory is torn down again:
    /// a failed upload must leave the permanent tree as it was.
    pub fn promote(
        &self,
        staging: &Path,
        publisher: &PublisherId,
        audio_id: &AudioId,
        kept: &[PathBuf],
    ) -> Result<PathBuf, StorageError> {
        let dest = self
            .storage_root
            .join(publisher.as_str())
            .join(audio_id.to_string());
        fs::create_dir_all(&dest).map_err(|source| StorageError::CreateDir {
            path: dest.clone(),
            source,
        })?;

        for file in kept {
            let Some(name) = file.file_name() else {
                continue;
            };
            if let Err(source) = fs::rename(file, dest.join(name)) {
                let _ = fs::remove_dir_all(&dest);
                return Err(StorageError::Rename {
                    from: file.clone(),
                    source,
                });
            }
            debug!(file = %name.to_string_lossy(), %publisher, %audio_id, "file promoted");
        }

        self.remove_staging(staging);
        Ok(dest)
    }

    /// Absolute path a download request resolves to.
    pub fn path_for(&self, publisher: &str, audio_id: &str, filename: &str) -> PathBuf {
        self.storage_root.join(publisher).join(audio_id).join(filename)
    }

    /// Enumerate publishers and their audio identifiers.
    ///
    /// Fails only when the storage root itself is unreadable. Entries that
    /// vanish mid-iteration (a concurrent cleanup, say) are skipped.
    pub fn list_publishers(&self) -> Result<Vec<(String, Vec<String>)>, StorageError> {
        let root_iter = fs::read_dir(&self.storage_root).map_err(|source| {
            StorageError::ListRoot {
                path: self.storage_root.clone(),
                source,
            }
        })?;

        let mut publishers = Vec::new();
        for publisher_entry in root_iter.flatten() {
            if !publisher_entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let publisher = publisher_entry.file_name().to_string_lossy().into_owned();

            let mut audio_ids = Vec::new();
            if let Ok(audio_iter) = fs::read_dir(publisher_entry.path()) {
                for audio_entry in audio_iter.flatten() {
                    if audio_entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                        audio_ids.push(audio_entry.file_name().to_string_lossy().into_owned());
                    }
                }
            }
            audio_ids.sort();
            publishers.push((publisher, audio_ids));
        }
        publishers.sort();
        Ok(publishers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout_in(dir: &Path) -> StorageLayout {
        let layout = StorageLayout::new(&StorageConfig {
            storage_root: dir.join("hls_storage"),
            temp_root: dir.join("hls_temp"),
        });
        layout.ensure_roots().unwrap();
        layout
    }

    #[test]
    fn staging_lives_under_temp_root() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let id = AudioId::new();

        let staging = layout.create_staging(&id).unwrap();
        assert!(staging.starts_with(layout.temp_root()));
        assert!(staging.is_dir());

        layout.remove_staging(&staging);
        assert!(!staging.exists());
    }

    #[test]
    fn promote_moves_files_and_clears_staging() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let id = AudioId::new();
        let publisher = PublisherId::from("10.0.0.7");

        let staging = layout.create_staging(&id).unwrap();
        let kept: Vec<PathBuf> = ["index.m3u8", "seg_0.ts"]
            .iter()
            .map(|name| {
                let path = staging.join(name);
                fs::write(&path, b"#EXTM3U\n").unwrap();
                path
            })
            .collect();

        let dest = layout.promote(&staging, &publisher, &id, &kept).unwrap();

        assert!(!staging.exists());
        assert!(dest.join("index.m3u8").is_file());
        assert!(dest.join("seg_0.ts").is_file());
        assert_eq!(
            dest,
            layout.storage_root().join("10.0.0.7").join(id.to_string())
        );
    }

    #[test]
    fn promote_failure_tears_down_destination() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        let id = AudioId::new();
        let publisher = PublisherId::from("10.0.0.8");

        let staging = layout.create_staging(&id).unwrap();
        let missing = staging.join("never_written.ts");

        let err = layout
            .promote(&staging, &publisher, &id, &[missing])
            .unwrap_err();
        assert!(matches!(err, StorageError::Rename { .. }));
        assert!(!layout
            .storage_root()
            .join("10.0.0.8")
            .join(id.to_string())
            .exists());
    }

    #[test]
    fn list_publishers_reports_audio_ids() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());

        fs::create_dir_all(layout.storage_root().join("10.0.0.1/aaa")).unwrap();
        fs::create_dir_all(layout.storage_root().join("10.0.0.1/bbb")).unwrap();
        fs::create_dir_all(layout.storage_root().join("10.0.0.2")).unwrap();

        let listing = layout.list_publishers().unwrap();
        assert_eq!(
            listing,
            vec![
                (
                    "10.0.0.1".to_string(),
                    vec!["aaa".to_string(), "bbb".to_string()]
                ),
                ("10.0.0.2".to_string(), vec![]),
            ]
        );
    }

    #[test]
    fn list_publishers_ignores_stray_files() {
        let tmp = tempdir().unwrap();
        let layout = layout_in(tmp.path());
        fs::write(layout.storage_root().join("notes.txt"), b"x").unwrap();

        assert!(layout.list_publishers().unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempdir().unwrap();
        let layout = StorageLayout::new(&StorageConfig {
            storage_root: tmp.path().join("absent"),
            temp_root: tmp.path().join("tmp"),
        });
        assert!(matches!(
            layout.list_publishers(),
            Err(StorageError::ListRoot { .. })
        ));
    }
}
