//! Concrete implementations of the Strongbox contracts.
//! AES-256-GCM with keys sourced from the OS keyring (or a key file / test doubles),
//! plus the on-disk backup directory with checksums and retention.

pub mod backup_store;
pub mod checksum;
pub mod encryption;
pub mod secret_store;
