use std::{
    ffi::OsString,
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use color_eyre::{
    eyre::{bail, eyre},
    Result,
};
use serde::Serialize;
use strongbox_core::{
    backup::{is_recognized_artifact, BackupArtifact, RECOGNIZED_SUFFIXES},
    crypto::SecretStore,
};
use strongbox_storage::{backup_store::BackupStore, encryption::EncryptionEngine};
use tracing::{info, warn};

const CHECKSUM_SUFFIX: &str = ".sha256";
const HEALTH_CHECK_FILE: &str = "health.check";

/// Encryption engine plus backup directory, shared with blocking worker threads.
pub struct Session<S: SecretStore + 'static> {
    engine: Arc<EncryptionEngine<S>>,
    store: Arc<BackupStore>,
}

impl<S: SecretStore + 'static> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            store: Arc::clone(&self.store),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub path: PathBuf,
    pub checksum: String,
    pub pruned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    Intact,
    Mismatch,
    NoChecksum,
}

#[derive(Debug, Serialize)]
struct ArtifactView {
    name: String,
    path: PathBuf,
    size_bytes: u64,
    modified: DateTime<Utc>,
}

impl From<&BackupArtifact> for ArtifactView {
    fn from(artifact: &BackupArtifact) -> Self {
        Self {
            name: artifact.name.clone(),
            path: artifact.path.clone(),
            size_bytes: artifact.size_bytes,
            modified: DateTime::<Utc>::from(artifact.modified),
        }
    }
}

impl<S: SecretStore + 'static> Session<S> {
    pub fn new(engine: EncryptionEngine<S>, store: BackupStore) -> Self {
        Self {
            engine: Arc::new(engine),
            store: Arc::new(store),
        }
    }

    /// Encrypt `plaintext`, save it as `name`, record its checksum next to it,
    /// and optionally prune down to `keep` artifacts.
    pub async fn backup(
        &self,
        plaintext: Vec<u8>,
        name: String,
        keep: Option<usize>,
    ) -> Result<BackupOutcome> {
        let session = self.clone();
        blocking(move || {
            let sealed = session.engine.encrypt(&plaintext)?;
            let checksum = session.store.generate_checksum(&sealed);
            session.invalidate_checksum(&name)?;
            let path = session.store.save_backup_file(&name, &sealed)?;
            session
                .store
                .save_backup_file(&format!("{name}{CHECKSUM_SUFFIX}"), checksum.as_bytes())?;

            let pruned = match keep {
                Some(keep) => session.prune_blocking(keep)?,
                None => 0,
            };
            Ok(BackupOutcome {
                path,
                checksum,
                pruned,
            })
        })
        .await
    }

    /// Remove the checksum record of `name` before its artifact is replaced.
    /// An overwrite interrupted between the two writes then reads as
    /// unchecked instead of corrupt.
    fn invalidate_checksum(&self, name: &str) -> Result<()> {
        let artifact = self.store.artifact_path(name)?;
        if self.store.delete_backup_file(checksum_path(&artifact))? {
            info!(%name, "dropped checksum record of replaced backup");
        }
        Ok(())
    }

    /// Load, verify against the recorded checksum when one exists, and decrypt.
    pub async fn restore(&self, artifact: PathBuf) -> Result<Vec<u8>> {
        let session = self.clone();
        blocking(move || {
            let sealed = session.load_existing(&artifact)?;
            if session.checksum_status(&artifact, &sealed)? == VerifyStatus::Mismatch {
                bail!("checksum mismatch for {}; refusing to restore", artifact.display());
            }
            Ok(session.engine.decrypt(&sealed)?)
        })
        .await
    }

    pub async fn verify(&self, artifact: PathBuf, deep: bool) -> Result<VerifyStatus> {
        let session = self.clone();
        blocking(move || {
            let sealed = session.load_existing(&artifact)?;
            let status = session.checksum_status(&artifact, &sealed)?;
            if deep && status != VerifyStatus::Mismatch {
                session.engine.decrypt(&sealed)?;
            }
            Ok(status)
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<BackupArtifact>> {
        let store = Arc::clone(&self.store);
        blocking(move || Ok(store.list_backup_files()?)).await
    }

    pub async fn total_size(&self) -> Result<u64> {
        let store = Arc::clone(&self.store);
        blocking(move || Ok(store.total_backup_size()?)).await
    }

    pub async fn prune(&self, keep: usize) -> Result<usize> {
        let session = self.clone();
        blocking(move || session.prune_blocking(keep)).await
    }

    /// Remove an artifact and its checksum record.
    pub async fn delete(&self, artifact: PathBuf) -> Result<bool> {
        let store = Arc::clone(&self.store);
        blocking(move || {
            let removed = store.delete_backup_file(&artifact)?;
            store.delete_backup_file(checksum_path(&artifact))?;
            Ok(removed)
        })
        .await
    }

    pub async fn delete_key(&self) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        blocking(move || {
            engine.delete_key();
            Ok(())
        })
        .await
    }

    /// Full encrypt/save/load/decrypt cycle on a scratch file listings never see.
    pub async fn health(&self) -> Result<()> {
        let session = self.clone();
        blocking(move || {
            let payload = b"ok";
            let sealed = session.engine.encrypt(payload)?;
            let path = session.store.save_backup_file(HEALTH_CHECK_FILE, &sealed)?;
            let loaded = session.store.load_backup_file(&path)?;
            session.store.delete_backup_file(&path)?;

            let loaded = loaded.ok_or_else(|| eyre!("health check file vanished after save"))?;
            if session.engine.decrypt(&loaded)? != payload {
                bail!("storage round-trip failed");
            }
            Ok(())
        })
        .await
    }

    /// Resolve a CLI argument: bare names live in the backup directory, anything
    /// with a path component is taken as-is.
    pub fn resolve_artifact(&self, artifact: &str) -> Result<PathBuf> {
        if Path::new(artifact).components().count() > 1 {
            return Ok(PathBuf::from(artifact));
        }
        Ok(self.store.artifact_path(artifact)?)
    }

    fn load_existing(&self, artifact: &Path) -> Result<Vec<u8>> {
        self.store
            .load_backup_file(artifact)?
            .ok_or_else(|| eyre!("backup not found: {}", artifact.display()))
    }

    fn checksum_status(&self, artifact: &Path, sealed: &[u8]) -> Result<VerifyStatus> {
        let Some(recorded) = self.store.load_backup_file(checksum_path(artifact))? else {
            return Ok(VerifyStatus::NoChecksum);
        };
        let recorded = String::from_utf8_lossy(&recorded);
        if self.store.verify_checksum(sealed, recorded.trim()) {
            Ok(VerifyStatus::Intact)
        } else {
            warn!(path = ?artifact, "checksum mismatch");
            Ok(VerifyStatus::Mismatch)
        }
    }

    fn prune_blocking(&self, keep: usize) -> Result<usize> {
        let pruned = self.store.cleanup_old_backups(keep)?;
        let swept = sweep_orphan_checksums(&self.store)?;
        if swept > 0 {
            info!(swept, "removed checksums of pruned backups");
        }
        Ok(pruned)
    }
}

/// Pick the artifact name: the caller's choice (with `.backup` appended when it
/// has no recognized suffix) or a UTC timestamp.
pub fn artifact_name(requested: Option<&str>, now: DateTime<Utc>) -> String {
    match requested {
        Some(name) if is_recognized_artifact(name) => name.to_string(),
        Some(name) => format!("{name}{}", RECOGNIZED_SUFFIXES[0]),
        None => format!(
            "backup-{}{}",
            now.format("%Y%m%dT%H%M%SZ"),
            RECOGNIZED_SUFFIXES[0]
        ),
    }
}

pub fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    Ok(fs::read(input)?)
}

/// Write restored plaintext atomically, or to stdout for `-`.
pub fn write_output(output: &str, data: &[u8]) -> Result<()> {
    if output == "-" {
        let mut stdout = io::stdout().lock();
        stdout.write_all(data)?;
        stdout.flush()?;
        return Ok(());
    }

    let path = Path::new(output);
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn render_table(artifacts: &[BackupArtifact]) -> String {
    let mut out = String::new();
    for artifact in artifacts {
        let view = ArtifactView::from(artifact);
        out.push_str(&format!(
            "{}  {:>10}  {}\n",
            view.modified.format("%Y-%m-%d %H:%M:%S"),
            human_size(view.size_bytes),
            view.name
        ));
    }
    out
}

pub fn render_json(artifacts: &[BackupArtifact]) -> Result<String> {
    let views: Vec<ArtifactView> = artifacts.iter().map(ArtifactView::from).collect();
    Ok(serde_json::to_string_pretty(&views)?)
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn checksum_path(artifact: &Path) -> PathBuf {
    let mut raw: OsString = artifact.as_os_str().to_owned();
    raw.push(CHECKSUM_SUFFIX);
    PathBuf::from(raw)
}

/// Drop `<artifact>.sha256` records whose artifact no longer exists.
fn sweep_orphan_checksums(store: &BackupStore) -> Result<usize> {
    let dir = store.backup_directory()?;
    let mut swept = 0;
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Some(artifact) = name.strip_suffix(CHECKSUM_SUFFIX) else {
            continue;
        };
        if is_recognized_artifact(artifact)
            && !dir.join(artifact).exists()
            && store.delete_backup_file(entry.path())?
        {
            swept += 1;
        }
    }
    Ok(swept)
}

/// Run blocking storage work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use strongbox_storage::secret_store::InMemorySecretStore;

    use super::*;

    fn session(root: &Path) -> Session<InMemorySecretStore> {
        Session::new(
            EncryptionEngine::new(InMemorySecretStore::new()),
            BackupStore::new(root.join("backups")),
        )
    }

    #[tokio::test]
    async fn backup_then_restore_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());

        let outcome = session
            .backup(b"{\"notes\":[]}".to_vec(), "export.backup".into(), None)
            .await
            .expect("backup");
        assert_eq!(outcome.pruned, 0);
        assert_eq!(outcome.checksum.len(), 64);

        let on_disk = fs::read(&outcome.path).expect("read artifact");
        assert!(!on_disk.windows(5).any(|w| w == b"notes"));

        let restored = session.restore(outcome.path).await.expect("restore");
        assert_eq!(restored, b"{\"notes\":[]}");
    }

    #[tokio::test]
    async fn checksum_records_are_invisible_to_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        session
            .backup(b"a".to_vec(), "a.backup".into(), None)
            .await
            .expect("backup");

        let listed = session.list().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert!(dir.path().join("backups/a.backup.sha256").exists());
    }

    #[tokio::test]
    async fn corrupted_artifact_is_detected_and_not_restored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        let outcome = session
            .backup(b"payload".to_vec(), "a.backup".into(), None)
            .await
            .expect("backup");

        let mut bytes = fs::read(&outcome.path).expect("read");
        bytes[0] ^= 0xFF;
        fs::write(&outcome.path, &bytes).expect("corrupt");

        let status = session
            .verify(outcome.path.clone(), false)
            .await
            .expect("verify");
        assert_eq!(status, VerifyStatus::Mismatch);
        assert!(session.restore(outcome.path).await.is_err());
    }

    #[tokio::test]
    async fn verify_without_checksum_record_reports_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        let outcome = session
            .backup(b"payload".to_vec(), "a.backup".into(), None)
            .await
            .expect("backup");
        fs::remove_file(checksum_path(&outcome.path)).expect("remove checksum");

        let status = session.verify(outcome.path, true).await.expect("verify");
        assert_eq!(status, VerifyStatus::NoChecksum);
    }

    #[tokio::test]
    async fn overwriting_backup_records_fresh_checksum() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        let first = session
            .backup(b"v1".to_vec(), "a.backup".into(), None)
            .await
            .expect("backup");
        let second = session
            .backup(b"v2".to_vec(), "a.backup".into(), None)
            .await
            .expect("backup");

        assert_ne!(first.checksum, second.checksum);
        let recorded = fs::read_to_string(checksum_path(&second.path)).expect("read checksum");
        assert_eq!(recorded, second.checksum);
        let status = session
            .verify(second.path.clone(), true)
            .await
            .expect("verify");
        assert_eq!(status, VerifyStatus::Intact);
    }

    #[tokio::test]
    async fn interrupted_overwrite_reads_as_unchecked_not_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        let first = session
            .backup(b"v1".to_vec(), "a.backup".into(), None)
            .await
            .expect("backup");

        // Replay the overwrite steps up to the artifact write, stopping before
        // the new checksum is recorded.
        let sealed = session.engine.encrypt(b"v2").expect("encrypt");
        session.invalidate_checksum("a.backup").expect("invalidate");
        assert!(!checksum_path(&first.path).exists());
        session
            .store
            .save_backup_file("a.backup", &sealed)
            .expect("save artifact");

        let status = session
            .verify(first.path.clone(), true)
            .await
            .expect("verify");
        assert_eq!(status, VerifyStatus::NoChecksum);
        assert_eq!(session.restore(first.path).await.expect("restore"), b"v2");
    }

    #[test]
    fn invalidating_missing_checksum_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        session
            .invalidate_checksum("never-saved.backup")
            .expect("nothing to drop");
        assert!(session.invalidate_checksum("../escape.backup").is_err());
    }

    #[tokio::test]
    async fn backup_with_keep_prunes_and_sweeps_checksums() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        for i in 0..4 {
            session
                .backup(vec![i], format!("b{i}.backup"), None)
                .await
                .expect("backup");
        }
        let outcome = session
            .backup(vec![9], "b9.backup".into(), Some(3))
            .await
            .expect("backup");
        assert_eq!(outcome.pruned, 2);

        let listed = session.list().await.expect("list");
        assert_eq!(listed.len(), 3);
        let checksums = fs::read_dir(dir.path().join("backups"))
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(CHECKSUM_SUFFIX))
            .count();
        assert_eq!(checksums, 3);
    }

    #[tokio::test]
    async fn delete_removes_artifact_and_checksum() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        let outcome = session
            .backup(b"x".to_vec(), "a.backup".into(), None)
            .await
            .expect("backup");

        assert!(session.delete(outcome.path.clone()).await.expect("delete"));
        assert!(!checksum_path(&outcome.path).exists());
        assert!(!session.delete(outcome.path).await.expect("delete again"));
    }

    #[tokio::test]
    async fn restore_after_key_deletion_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        let outcome = session
            .backup(b"old".to_vec(), "old.backup".into(), None)
            .await
            .expect("backup");

        session.delete_key().await.expect("delete key");
        assert!(session.restore(outcome.path).await.is_err());

        let fresh = session
            .backup(b"new".to_vec(), "new.backup".into(), None)
            .await
            .expect("backup");
        assert_eq!(session.restore(fresh.path).await.expect("restore"), b"new");
    }

    #[tokio::test]
    async fn restore_of_missing_artifact_reports_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        let path = session.resolve_artifact("ghost.backup").expect("resolve");
        let err = session.restore(path).await.expect_err("missing");
        assert!(err.to_string().contains("backup not found"));
    }

    #[tokio::test]
    async fn health_check_leaves_directory_clean() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        session.health().await.expect("health");

        let leftovers = fs::read_dir(dir.path().join("backups"))
            .expect("read_dir")
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn artifact_names_get_recognized_suffix() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(artifact_name(Some("nightly"), now), "nightly.backup");
        assert_eq!(artifact_name(Some("export.zip"), now), "export.zip");
        assert_eq!(artifact_name(None, now), "backup-20240309T140500Z.backup");
    }

    #[test]
    fn resolve_keeps_paths_and_scopes_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = session(dir.path());
        assert_eq!(
            session.resolve_artifact("a.backup").expect("name"),
            dir.path().join("backups").join("a.backup")
        );
        assert_eq!(
            session.resolve_artifact("elsewhere/a.backup").expect("path"),
            PathBuf::from("elsewhere/a.backup")
        );
        assert!(session.resolve_artifact("..").is_err());
    }

    #[test]
    fn human_size_scales_units() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn write_output_replaces_file_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("restored.json");
        fs::write(&out, b"stale").expect("seed");

        write_output(out.to_str().expect("utf8 path"), b"fresh").expect("write");
        assert_eq!(fs::read(&out).expect("read"), b"fresh");
    }

    #[test]
    fn json_listing_includes_sizes() {
        let artifacts = vec![BackupArtifact {
            path: PathBuf::from("/b/a.backup"),
            name: "a.backup".into(),
            size_bytes: 42,
            modified: std::time::SystemTime::UNIX_EPOCH,
        }];
        let json = render_json(&artifacts).expect("json");
        assert!(json.contains("\"size_bytes\": 42"));
        assert!(json.contains("1970-01-01T00:00:00Z"));
    }
}
