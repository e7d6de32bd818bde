use std::sync::{Mutex, MutexGuard};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use strongbox_core::crypto::{CryptoError, KeyError, SecretStore, SymmetricKey, NONCE_LEN};
use tracing::{debug, info, instrument, warn};

/// AES-256-GCM engine over a single key held by a `SecretStore`.
///
/// Payload layout is `nonce (12) || ciphertext || tag (16)`, no version byte.
/// The key is generated lazily by the first `encrypt`; the cache mutex is held
/// across lookup-or-generate so racing first calls agree on one key.
pub struct EncryptionEngine<S: SecretStore> {
    store: S,
    cached: Mutex<Option<SymmetricKey>>,
}

impl<S: SecretStore> EncryptionEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Encrypt `plaintext` under a fresh random nonce, creating the key on first use.
    #[instrument(skip_all, fields(len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = {
            let mut cached = self.lock_cache()?;
            let key = match cached.as_ref() {
                Some(key) => key.clone(),
                None => {
                    let key = match self.store.get()? {
                        Some(existing) => existing,
                        None => {
                            let created = self.store.generate_and_store()?;
                            info!("generated new backup encryption key");
                            created
                        }
                    };
                    *cached = Some(key.clone());
                    key
                }
            };
            build_cipher(&key)?
        };

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Split off the nonce and open the remainder. Fails closed on any tag mismatch.
    #[instrument(skip_all, fields(len = data.len()))]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::TooShort);
        }

        let key = {
            let mut cached = self.lock_cache()?;
            match cached.as_ref() {
                Some(key) => key.clone(),
                // No key means nothing could have produced this payload.
                None => match self.store.get()? {
                    Some(existing) => {
                        *cached = Some(existing.clone());
                        existing
                    }
                    None => return Err(CryptoError::AuthenticationFailed),
                },
            }
        };

        let cipher = build_cipher(&key)?;
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                debug!("payload failed authentication");
                CryptoError::AuthenticationFailed
            })
    }

    /// Drop the key from the cache and the backing store. Never fails.
    ///
    /// Payloads sealed under the removed key can no longer be opened; the next
    /// `encrypt` creates a replacement key.
    pub fn delete_key(&self) {
        match self.cached.lock() {
            Ok(mut cached) => *cached = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        if let Err(err) = self.store.delete() {
            warn!("failed to delete persisted key: {err}");
        } else {
            info!("deleted backup encryption key");
        }
    }

    /// Whether a key currently exists (cached or persisted).
    pub fn has_key(&self) -> Result<bool, CryptoError> {
        if self.lock_cache()?.is_some() {
            return Ok(true);
        }
        Ok(self.store.get()?.is_some())
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, Option<SymmetricKey>>, CryptoError> {
        self.cached
            .lock()
            .map_err(|err| KeyError::Backend(format!("lock poisoned: {err}")).into())
    }
}

fn build_cipher(key: &SymmetricKey) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("cipher init failed: {e}")))
}
