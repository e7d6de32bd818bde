use std::{
    fs,
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use strongbox_core::backup::{is_recognized_artifact, BackupArtifact};
use tracing::{debug, info, instrument};

use crate::checksum;

/// Directory of backup artifacts with atomic saves and count-based retention.
///
/// Only files ending in a recognized suffix (`.backup`, `.zip`) are treated as
/// artifacts. Saves, deletes and cleanup share one lock so retention never
/// races a concurrent writer on the same instance.
pub struct BackupStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The backup directory, created (owner-only on unix) if it does not exist yet.
    pub fn backup_directory(&self) -> io::Result<PathBuf> {
        if !self.root.is_dir() {
            fs::create_dir_all(&self.root)?;
            restrict_dir_permissions(&self.root)?;
            debug!(root = ?self.root, "created backup directory");
        }
        Ok(self.root.clone())
    }

    /// Full path an artifact called `name` lives at. Rejects anything that is
    /// not a single plain file name.
    pub fn artifact_path(&self, name: &str) -> io::Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Write `data` as `name`, replacing any artifact of the same name.
    ///
    /// Bytes land in a hidden temp file first and are renamed into place, so
    /// listings never observe a partially written artifact.
    #[instrument(skip_all, fields(name = %name, len = data.len()))]
    pub fn save_backup_file(&self, name: &str, data: &[u8]) -> io::Result<PathBuf> {
        validate_name(name)?;
        let _guard = self.lock();
        let dir = self.backup_directory()?;
        let path = dir.join(name);

        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        info!(path = ?path, "saved backup artifact");
        Ok(path)
    }

    /// Read an artifact. A missing file is `Ok(None)`, not an error.
    #[instrument(skip_all, fields(path = ?path.as_ref()))]
    pub fn load_backup_file(&self, path: impl AsRef<Path>) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path.as_ref()) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Recognized artifacts, most recently modified first; equal timestamps
    /// fall back to descending name.
    pub fn list_backup_files(&self) -> io::Result<Vec<BackupArtifact>> {
        let dir = self.backup_directory()?;
        let mut artifacts = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_recognized_artifact(&name) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // Removed between readdir and stat.
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            if !metadata.is_file() {
                continue;
            }
            artifacts.push(BackupArtifact {
                path: entry.path(),
                name,
                size_bytes: metadata.len(),
                modified: metadata.modified()?,
            });
        }

        artifacts.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(artifacts)
    }

    /// Remove an artifact. Returns `false` when there was nothing to remove.
    #[instrument(skip_all, fields(path = ?path.as_ref()))]
    pub fn delete_backup_file(&self, path: impl AsRef<Path>) -> io::Result<bool> {
        let _guard = self.lock();
        remove_if_present(path.as_ref())
    }

    pub fn generate_checksum(&self, data: &[u8]) -> String {
        checksum::sha256_hex(data)
    }

    pub fn verify_checksum(&self, data: &[u8], checksum: &str) -> bool {
        checksum::verify(data, checksum)
    }

    /// Sum of sizes over recognized artifacts only.
    pub fn total_backup_size(&self) -> io::Result<u64> {
        Ok(self
            .list_backup_files()?
            .iter()
            .map(|artifact| artifact.size_bytes)
            .sum())
    }

    /// Keep the newest `max_backups_to_keep` artifacts and delete the rest.
    /// Returns how many artifacts were actually removed.
    #[instrument(skip(self))]
    pub fn cleanup_old_backups(&self, max_backups_to_keep: usize) -> io::Result<usize> {
        let _guard = self.lock();
        let artifacts = self.list_backup_files()?;
        if artifacts.len() <= max_backups_to_keep {
            return Ok(0);
        }

        let mut deleted = 0;
        for artifact in &artifacts[max_backups_to_keep..] {
            if remove_if_present(&artifact.path)? {
                deleted += 1;
            }
        }
        info!(deleted, kept = max_backups_to_keep, "pruned old backups");
        Ok(deleted)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock carries no broken state.
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = ?path, "deleted backup artifact");
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn validate_name(name: &str) -> io::Result<()> {
    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !plain || name.contains(['/', '\\']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid backup name: {name:?}"),
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) -> io::Result<()> {
    Ok(())
}
