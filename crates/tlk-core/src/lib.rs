//! TLK Core - end-to-end encryption for the talk client.
//!
//! This crate implements:
//! - Key store abstraction with per-key single-flight locking
//! - Direct-peer public key resolution
//! - Group shared key resolution and registration fallback
//! - Message encryption and decryption (spec v1 legacy, spec v2 AEAD)
//! - Keychain provisioning of the long-term identity key pair
//! - The `E2eeEngine` facade tying these together

#![forbid(unsafe_code)]

// Protocol logic
pub mod engine;
pub mod peer_keys;
pub mod group_keys;
pub mod cipher;
pub mod keychain;

// Infrastructure
pub mod store;
pub mod locks;
pub mod directory;
pub mod config;

// Supporting modules
pub mod errors;
pub mod types;
pub mod message;
pub mod keys;
pub mod harness;

// Optional storage implementations
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

#[cfg(test)]
mod proptests;
