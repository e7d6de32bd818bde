use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose, Engine as _};
use keyring::credential::CredentialPersistence;
use rand::{rngs::OsRng, RngCore};
use strongbox_core::crypto::{KeyError, SecretStore, SymmetricKey, KEY_LEN};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// OS keyring-backed store. Uses the `keyring` crate to hold the key.
pub struct KeyringSecretStore {
    service: String,
    account: String,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Backend(e.to_string()))
    }

    /// Fails unless the platform keystore keeps credentials until they are
    /// deleted. Linux kernel keyutils drops them on reboot, and a lost key
    /// orphans every backup sealed with it.
    pub fn ensure_durable(&self) -> Result<(), KeyError> {
        require_durable(keyring::default::default_credential_builder().persistence())
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self) -> Result<Option<SymmetricKey>, KeyError> {
        match self.entry()?.get_password() {
            Ok(secret) => decode_key(&secret).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyError::Backend(err.to_string())),
        }
    }

    fn generate_and_store(&self) -> Result<SymmetricKey, KeyError> {
        if let Err(err) = self.ensure_durable() {
            warn!(service = %self.service, "refusing to store key in non-durable keyring");
            return Err(err);
        }
        let key = generate_key();
        self.entry()?
            .set_password(&encode_key(&key))
            .map_err(|e| KeyError::Backend(e.to_string()))?;
        debug!(service = %self.service, "stored new key in keyring");
        Ok(key)
    }

    fn delete(&self) -> Result<(), KeyError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(KeyError::Backend(err.to_string())),
        }
    }
}

fn require_durable(persistence: CredentialPersistence) -> Result<(), KeyError> {
    let lifetime = match persistence {
        CredentialPersistence::UntilDelete => return Ok(()),
        CredentialPersistence::UntilReboot => "until reboot",
        CredentialPersistence::ProcessOnly => "for this process only",
        CredentialPersistence::EntryOnly => "in memory only",
        _ => "for an unknown time",
    };
    Err(KeyError::Backend(format!(
        "keyring backend keeps keys {lifetime}; use the file key store instead"
    )))
}

/// Key container file for headless environments where no keychain is reachable.
/// The key is written atomically and readable by the owner only (unix).
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self) -> Result<Option<SymmetricKey>, KeyError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let contents = Zeroizing::new(contents);
                decode_key(contents.trim()).map(Some)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(KeyError::Backend(err.to_string())),
        }
    }

    fn generate_and_store(&self) -> Result<SymmetricKey, KeyError> {
        let key = generate_key();
        write_key_file(&self.path, &encode_key(&key))?;
        debug!(path = ?self.path, "stored new key in key file");
        Ok(key)
    }

    fn delete(&self) -> Result<(), KeyError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(KeyError::Backend(err.to_string())),
        }
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemorySecretStore {
    inner: Arc<Mutex<Option<SymmetricKey>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self) -> Result<Option<SymmetricKey>, KeyError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Backend(format!("lock poisoned: {err}")))?;
        Ok(guard.clone())
    }

    fn generate_and_store(&self) -> Result<SymmetricKey, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Backend(format!("lock poisoned: {err}")))?;
        let key = generate_key();
        *guard = Some(key.clone());
        Ok(key)
    }

    fn delete(&self) -> Result<(), KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Backend(format!("lock poisoned: {err}")))?;
        *guard = None;
        Ok(())
    }
}

fn generate_key() -> SymmetricKey {
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut bytes[..]);
    SymmetricKey::from_bytes(*bytes)
}

fn encode_key(key: &SymmetricKey) -> Zeroizing<String> {
    Zeroizing::new(general_purpose::STANDARD.encode(key.as_bytes()))
}

fn decode_key(secret: &str) -> Result<SymmetricKey, KeyError> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(secret)
            .map_err(|e| KeyError::Decode(e.to_string()))?,
    );
    SymmetricKey::from_slice(&bytes)
}

fn write_key_file(path: &Path, encoded: &str) -> Result<(), KeyError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(backend_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(backend_err)?;
    restrict_to_owner(tmp.as_file())?;
    tmp.write_all(encoded.as_bytes()).map_err(backend_err)?;
    tmp.as_file().sync_all().map_err(backend_err)?;
    tmp.persist(path).map_err(|e| backend_err(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_to_owner(file: &fs::File) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(backend_err)
}

#[cfg(not(unix))]
fn restrict_to_owner(_file: &fs::File) -> Result<(), KeyError> {
    Ok(())
}

fn backend_err<E: ToString>(err: E) -> KeyError {
    KeyError::Backend(err.to_string())
}
