//! Narrow interface to a GPG engine.
//!
//! The credential store never talks to GPG directly; it goes through
//! [`GpgEngine`], so the encryption backend can be exercised against a mock
//! engine in tests and the production subprocess engine stays replaceable.

pub mod command;

pub use command::GpgCommand;

use crate::errors::Result;

/// Capability contract for an asymmetric-encryption engine.
///
/// All byte parameters are opaque to the caller: `encrypt` output feeds
/// `decrypt`, `sign_detached` output feeds `verify_detached`. Key
/// identifiers are whatever the engine accepts (fingerprints, key IDs,
/// e-mail addresses for GPG).
pub trait GpgEngine: Send + Sync {
    /// Engine version string, used for availability diagnostics.
    fn version(&self) -> Result<String>;

    /// Encrypt `plaintext` to every identifier in `recipients`.
    fn encrypt(&self, plaintext: &[u8], recipients: &[String]) -> Result<Vec<u8>>;

    /// Decrypt `ciphertext` with whatever secret keys the engine holds.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Produce a detached signature over `data` with `signing_key`.
    fn sign_detached(&self, data: &[u8], signing_key: &str) -> Result<Vec<u8>>;

    /// Verify a detached `signature` over `data`.
    ///
    /// Returns `Ok(false)` for a well-formed but invalid signature; `Err`
    /// is reserved for engine-level failures.
    fn verify_detached(&self, signature: &[u8], data: &[u8]) -> Result<bool>;

    /// Identifiers of public keys known to the engine.
    fn list_public_keys(&self) -> Result<Vec<String>>;

    /// Identifiers of secret keys known to the engine.
    fn list_secret_keys(&self) -> Result<Vec<String>>;

    /// Export ASCII-armored public-key material for the given identifiers
    /// (all known keys when empty).
    fn export_public_keys(&self, identifiers: &[String]) -> Result<String>;

    /// Import ASCII-armored public-key material; returns how many keys were
    /// imported.
    fn import_public_keys(&self, armored: &str) -> Result<usize>;
}
