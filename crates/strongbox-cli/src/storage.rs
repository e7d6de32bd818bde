use std::path::PathBuf;

use color_eyre::Result;
use dirs::data_dir;
use strongbox_core::crypto::SecretStore;
use strongbox_storage::{
    backup_store::BackupStore,
    encryption::EncryptionEngine,
    secret_store::{FileSecretStore, KeyringSecretStore},
};
use tracing::debug;

use crate::config::{Config, KeyBackend};

const KEYRING_SERVICE: &str = "strongbox";
const KEYRING_ACCOUNT: &str = "backup-key";

pub type DynSecretStore = Box<dyn SecretStore>;

/// Resolve the default data directory for Strongbox.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("strongbox"))
}

/// Backup directory: config, then `STRONGBOX_BACKUP_DIR`, then the platform data dir.
pub fn backup_dir(config: &Config) -> Result<PathBuf> {
    if let Some(dir) = config
        .backup_dir
        .clone()
        .or_else(|| std::env::var_os("STRONGBOX_BACKUP_DIR").map(PathBuf::from))
    {
        return Ok(dir);
    }
    Ok(default_data_dir()?.join("backups"))
}

pub fn backup_store_from_config(config: &Config) -> Result<BackupStore> {
    let root = backup_dir(config)?;
    debug!(?root, "using backup directory");
    Ok(BackupStore::new(root))
}

/// Pick the key backing. `STRONGBOX_KEY_FILE` forces the file container.
/// Without configuration, the platform default from [`KeyBackend::default`].
pub fn secret_store_from_config(config: &Config) -> Result<DynSecretStore> {
    let key = config.key.clone().unwrap_or_default();
    let env_file = std::env::var_os("STRONGBOX_KEY_FILE").map(PathBuf::from);
    let backend = if env_file.is_some() {
        KeyBackend::File
    } else {
        key.backend.unwrap_or_default()
    };

    match backend {
        KeyBackend::Keyring => {
            let service = key.service.unwrap_or_else(|| KEYRING_SERVICE.to_string());
            let account = key.account.unwrap_or_else(|| KEYRING_ACCOUNT.to_string());
            debug!(%service, "using keyring key store");
            Ok(Box::new(KeyringSecretStore::new(service, account)))
        }
        KeyBackend::File => {
            let path = match key.file.or(env_file) {
                Some(path) => path,
                None => default_data_dir()?.join("backup.key"),
            };
            debug!(?path, "using key file store");
            Ok(Box::new(FileSecretStore::new(path)))
        }
    }
}

pub fn engine_from_config(config: &Config) -> Result<EncryptionEngine<DynSecretStore>> {
    Ok(EncryptionEngine::new(secret_store_from_config(config)?))
}
