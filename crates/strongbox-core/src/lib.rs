//! Core contracts for Strongbox: key custody, authenticated encryption errors,
//! and the shape of backup artifacts on disk.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod backup;
pub mod crypto;
