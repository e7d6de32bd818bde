use std::{path::PathBuf, time::SystemTime};

/// File name suffixes that mark a file in the backup directory as an artifact.
/// Anything else sharing the directory is ignored by listing, sizing and retention.
pub const RECOGNIZED_SUFFIXES: [&str; 2] = [".backup", ".zip"];

/// A complete backup file under the backup root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Whether `name` carries one of the recognized artifact suffixes.
pub fn is_recognized_artifact(name: &str) -> bool {
    RECOGNIZED_SUFFIXES
        .iter()
        .any(|suffix| name.len() > suffix.len() && name.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_backup_and_zip_only() {
        assert!(is_recognized_artifact("a.backup"));
        assert!(is_recognized_artifact("export-2024.zip"));
        assert!(!is_recognized_artifact("b.txt"));
        assert!(!is_recognized_artifact("a.backup.sha256"));
        assert!(!is_recognized_artifact(".x.tmp"));
    }

    #[test]
    fn bare_suffix_is_not_an_artifact() {
        assert!(!is_recognized_artifact(".backup"));
        assert!(!is_recognized_artifact(".zip"));
    }
}
