use std::{fmt, sync::Arc};

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the random nonce that prefixes every encrypted payload.
pub const NONCE_LEN: usize = 12;
/// Length of the GCM authentication tag that trails every encrypted payload.
pub const TAG_LEN: usize = 16;
/// AES-256 key length.
pub const KEY_LEN: usize = 32;

/// 256-bit symmetric key. Wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_LEN],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Build a key from a slice, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            KeyError::Decode(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("secret backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors surfaced by the encryption engine. Decryption never yields
/// unauthenticated plaintext; every failure lands here instead.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid ciphertext: too short")]
    TooShort,
    #[error("Invalid ciphertext: authentication failed")]
    AuthenticationFailed,
    #[error("key unavailable: {0}")]
    Key(#[from] KeyError),
    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Custody of the single symmetric key (OS keychain, key file, or memory).
///
/// A store is either empty or holds exactly one key. Implementations are
/// blocking; callers decide where that blocking is allowed to happen.
pub trait SecretStore: Send + Sync {
    /// Return the persisted key, or `None` when no key exists yet.
    fn get(&self) -> Result<Option<SymmetricKey>, KeyError>;

    /// Generate a fresh random key, persist it (replacing any previous one), and return it.
    fn generate_and_store(&self) -> Result<SymmetricKey, KeyError>;

    /// Remove the persisted key. Succeeds when no key exists.
    fn delete(&self) -> Result<(), KeyError>;
}

impl<S: SecretStore + ?Sized> SecretStore for Box<S> {
    fn get(&self) -> Result<Option<SymmetricKey>, KeyError> {
        (**self).get()
    }

    fn generate_and_store(&self) -> Result<SymmetricKey, KeyError> {
        (**self).generate_and_store()
    }

    fn delete(&self) -> Result<(), KeyError> {
        (**self).delete()
    }
}

impl<S: SecretStore + ?Sized> SecretStore for Arc<S> {
    fn get(&self) -> Result<Option<SymmetricKey>, KeyError> {
        (**self).get()
    }

    fn generate_and_store(&self) -> Result<SymmetricKey, KeyError> {
        (**self).generate_and_store()
    }

    fn delete(&self) -> Result<(), KeyError> {
        (**self).delete()
    }
}
