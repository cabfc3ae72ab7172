//! GPG-encrypted file backend.
//!
//! Each credential is stored as two files under the storage directory: a
//! ciphertext (`<key>.gpg`, encrypted to a list of recipient public keys)
//! and, when a signing key is configured, a detached signature
//! (`<key>.gpg.sig`).
//!
//! The signature covers the **ciphertext** and is checked against it before
//! any decryption happens. Verification failures are fatal for that read,
//! with no fallback to unverified data. Decryption failures (e.g. the
//! local keyring lost the secret key) report the credential as absent so
//! the chain can consult the next backend.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{BackendKind, CredentialBackend, Metadata, StoredCredential};
use crate::config::GpgConfig;
use crate::domain::SecretString;
use crate::errors::{CredentialError, Result};
use crate::gpg::GpgEngine;

const CIPHERTEXT_EXT: &str = "gpg";
const SIGNATURE_SUFFIX: &str = ".sig";

/// Outcome of a [`GpgBackend::rotate_keys`] batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationReport {
    /// Credentials re-encrypted for the new recipient set.
    pub rotated: usize,
    /// Credentials that failed to decrypt or re-encrypt. The batch
    /// continues past failures; affected credentials keep their previous
    /// ciphertext.
    pub failed: usize,
}

impl RotationReport {
    /// Whether every credential rotated.
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// GPG-encrypted credential storage backend.
pub struct GpgBackend {
    engine: Arc<dyn GpgEngine>,
    storage_dir: PathBuf,
    recipients: Vec<String>,
    sign_key: Option<String>,
}

impl std::fmt::Debug for GpgBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpgBackend")
            .field("storage_dir", &self.storage_dir)
            .field("recipients", &self.recipients)
            .field("sign_key", &self.sign_key)
            .finish_non_exhaustive()
    }
}

impl GpgBackend {
    /// Create a backend storing ciphertexts under `storage_dir`.
    pub fn new(engine: Arc<dyn GpgEngine>, config: &GpgConfig, default_dir: &Path) -> Result<Self> {
        let storage_dir =
            config.storage_dir.clone().unwrap_or_else(|| default_dir.join("gpg"));
        fs::create_dir_all(&storage_dir)?;

        let backend = Self {
            engine,
            storage_dir,
            recipients: config.recipients.clone(),
            sign_key: config.sign_key.clone(),
        };
        backend.verify_setup()?;
        Ok(backend)
    }

    /// Check engine reachability and key availability.
    ///
    /// Unknown recipients are a warning (the key may be imported later);
    /// a missing signing key is fatal because every subsequent write would
    /// fail.
    fn verify_setup(&self) -> Result<()> {
        let version = self
            .engine
            .version()
            .map_err(|e| CredentialError::security(format!("GPG engine unavailable: {e}")))?;
        debug!(%version, "GPG engine ready");

        if !self.recipients.is_empty() {
            let known = self.engine.list_public_keys()?;
            for recipient in &self.recipients {
                if !known.contains(recipient) {
                    warn!(%recipient, "GPG public key not found for recipient");
                }
            }
        }

        if let Some(sign_key) = &self.sign_key {
            let secret_keys = self.engine.list_secret_keys()?;
            if !secret_keys.contains(sign_key) {
                return Err(CredentialError::security(format!(
                    "Signing key not found: {sign_key}"
                )));
            }
        }
        Ok(())
    }

    /// Replace filesystem-hostile characters so keys with separators cannot
    /// escape the storage directory.
    fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    fn ciphertext_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.{}", Self::sanitize_key(key), CIPHERTEXT_EXT))
    }

    fn signature_path(&self, key: &str) -> PathBuf {
        let mut path = self.ciphertext_path(key).into_os_string();
        path.push(SIGNATURE_SUFFIX);
        PathBuf::from(path)
    }

    /// Verify the detached signature over `ciphertext`, when signing is
    /// configured and a signature file exists. Fail-closed.
    fn verify_ciphertext(&self, key: &str, ciphertext: &[u8]) -> Result<()> {
        let sig_path = self.signature_path(key);
        if self.sign_key.is_none() || !sig_path.exists() {
            return Ok(());
        }
        let signature = fs::read(&sig_path)?;
        let valid = self.engine.verify_detached(&signature, ciphertext)?;
        if !valid {
            warn!(%key, "Invalid signature for credential");
            return Err(CredentialError::security(format!(
                "Signature verification failed for {key}"
            )));
        }
        Ok(())
    }

    /// Encrypt and persist one credential document, signing the ciphertext
    /// when configured.
    fn write_encrypted(
        &self,
        key: &str,
        document: &Metadata,
        recipients: &[String],
    ) -> Result<()> {
        if recipients.is_empty() {
            return Err(CredentialError::validation("No GPG recipients specified"));
        }
        let plaintext = serde_json::to_vec(document)?;
        let ciphertext = self.engine.encrypt(&plaintext, recipients)?;
        fs::write(self.ciphertext_path(key), &ciphertext)?;

        if let Some(sign_key) = &self.sign_key {
            let signature = self.engine.sign_detached(&ciphertext, sign_key)?;
            fs::write(self.signature_path(key), signature)?;
        }
        Ok(())
    }

    /// Re-encrypt every stored credential for `new_recipients`.
    ///
    /// `old_recipients` documents which keys the existing ciphertexts were
    /// produced for; decryption itself uses whatever secret keys the engine
    /// holds. Failures are counted, not fatal: a batch with one unreadable
    /// credential still rotates the rest.
    pub fn rotate_keys(
        &self,
        old_recipients: &[String],
        new_recipients: &[String],
    ) -> Result<RotationReport> {
        if new_recipients.is_empty() {
            return Err(CredentialError::validation("No GPG recipients specified"));
        }
        let mut report = RotationReport::default();

        for key in self.list_credentials()? {
            let stored = match self.get_credential(&key) {
                Ok(Some(stored)) => stored,
                Ok(None) => {
                    warn!(%key, "Failed to decrypt credential for rotation");
                    report.failed += 1;
                    continue;
                }
                Err(error) => {
                    warn!(%key, %error, "Failed to read credential for rotation");
                    report.failed += 1;
                    continue;
                }
            };

            let mut document = stored.metadata;
            document.insert("username".into(), stored.username.into());
            document.insert("password".into(), stored.password.expose_secret().into());

            match self.write_encrypted(&key, &document, new_recipients) {
                Ok(()) => report.rotated += 1,
                Err(error) => {
                    warn!(%key, %error, "Failed to re-encrypt credential");
                    report.failed += 1;
                }
            }
        }

        info!(
            rotated = report.rotated,
            failed = report.failed,
            old = old_recipients.len(),
            new = new_recipients.len(),
            "Key rotation complete"
        );
        Ok(report)
    }

    /// Verify signatures for every stored credential without mutating
    /// anything.
    ///
    /// A key with no signature file reports `false`; so does a key whose
    /// signature does not match its ciphertext.
    pub fn verify_all_signatures(&self) -> Result<BTreeMap<String, bool>> {
        let mut results = BTreeMap::new();

        for key in self.list_credentials()? {
            let sig_path = self.signature_path(&key);
            if !sig_path.exists() {
                results.insert(key, false);
                continue;
            }
            let verified = (|| -> Result<bool> {
                let ciphertext = fs::read(self.ciphertext_path(&key))?;
                let signature = fs::read(&sig_path)?;
                self.engine.verify_detached(&signature, &ciphertext)
            })();
            match verified {
                Ok(valid) => {
                    results.insert(key, valid);
                }
                Err(error) => {
                    error!(%key, %error, "Signature verification failed");
                    results.insert(key, false);
                }
            }
        }
        Ok(results)
    }

    /// Export ASCII-armored public keys for team onboarding.
    pub fn export_public_keys(&self, identifiers: &[String]) -> Result<String> {
        self.engine.export_public_keys(identifiers)
    }

    /// Import ASCII-armored public keys shared by team members.
    pub fn import_public_keys(&self, armored: &str) -> Result<usize> {
        let count = self.engine.import_public_keys(armored)?;
        info!(count, "Imported GPG public keys");
        Ok(count)
    }
}

impl CredentialBackend for GpgBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpg
    }

    fn is_available(&self) -> bool {
        if self.recipients.is_empty() {
            return false;
        }
        // Probe a full encrypt/decrypt cycle; anything short of a clean
        // round-trip disqualifies the backend.
        let probe = b"availability-probe";
        match self
            .engine
            .encrypt(probe, &self.recipients)
            .and_then(|ciphertext| self.engine.decrypt(&ciphertext))
        {
            Ok(decrypted) => decrypted == probe,
            Err(error) => {
                debug!(%error, "GPG backend not available");
                false
            }
        }
    }

    fn get_credential(&self, key: &str) -> Result<Option<StoredCredential>> {
        let path = self.ciphertext_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let ciphertext = fs::read(&path)?;

        // Verify before decrypt; a bad signature aborts the read.
        self.verify_ciphertext(key, &ciphertext)?;

        let plaintext = match self.engine.decrypt(&ciphertext) {
            Ok(plaintext) => plaintext,
            Err(error) => {
                error!(%key, %error, "Failed to decrypt credential");
                return Ok(None);
            }
        };

        let mut document: Metadata = serde_json::from_slice(&plaintext)?;
        let username = document
            .remove("username")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let password = document
            .remove("password")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        Ok(Some(StoredCredential {
            username,
            password: SecretString::new(password),
            metadata: document,
        }))
    }

    fn set_credential(
        &self,
        key: &str,
        username: &str,
        password: &SecretString,
        metadata: &Metadata,
    ) -> Result<()> {
        let mut document = metadata.clone();
        document.insert("username".into(), username.into());
        document.insert("password".into(), password.expose_secret().into());

        self.write_encrypted(key, &document, &self.recipients)?;
        info!(%key, "Credential stored with GPG encryption");
        Ok(())
    }

    fn delete_credential(&self, key: &str) -> Result<bool> {
        let ciphertext = self.ciphertext_path(key);
        let signature = self.signature_path(key);

        let existed = ciphertext.exists();
        if existed {
            fs::remove_file(&ciphertext)?;
        }
        if signature.exists() {
            fs::remove_file(&signature)?;
        }
        Ok(existed)
    }

    fn list_credentials(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.storage_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(CIPHERTEXT_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpg::GpgEngine;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Deterministic in-memory engine. "Encryption" wraps the payload in a
    /// JSON envelope naming the recipients; "decryption" requires overlap
    /// with the secret keys the engine holds. Signatures are a keyed
    /// checksum of the signed bytes.
    struct MockEngine {
        secret_keys: Mutex<Vec<String>>,
        public_keys: Mutex<Vec<String>>,
    }

    impl MockEngine {
        fn new(secret_keys: &[&str], public_keys: &[&str]) -> Self {
            Self {
                secret_keys: Mutex::new(secret_keys.iter().map(|s| s.to_string()).collect()),
                public_keys: Mutex::new(public_keys.iter().map(|s| s.to_string()).collect()),
            }
        }

        fn checksum(data: &[u8], signing_key: &str) -> u64 {
            let mut acc: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in data.iter().chain(signing_key.as_bytes()) {
                acc ^= u64::from(*byte);
                acc = acc.wrapping_mul(0x0000_0100_0000_01b3);
            }
            acc
        }
    }

    impl GpgEngine for MockEngine {
        fn version(&self) -> Result<String> {
            Ok("mock-gpg 1.0".to_string())
        }

        fn encrypt(&self, plaintext: &[u8], recipients: &[String]) -> Result<Vec<u8>> {
            if recipients.is_empty() {
                return Err(CredentialError::validation("No GPG recipients specified"));
            }
            let envelope = serde_json::json!({
                "recipients": recipients,
                "payload": String::from_utf8_lossy(plaintext),
            });
            Ok(serde_json::to_vec(&envelope).unwrap())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
            let envelope: serde_json::Value = serde_json::from_slice(ciphertext)
                .map_err(|_| CredentialError::security("Corrupt ciphertext"))?;
            let recipients: Vec<String> =
                serde_json::from_value(envelope["recipients"].clone()).unwrap_or_default();
            let held = self.secret_keys.lock().unwrap();
            if !recipients.iter().any(|r| held.contains(r)) {
                return Err(CredentialError::security("No usable secret key"));
            }
            Ok(envelope["payload"].as_str().unwrap_or_default().as_bytes().to_vec())
        }

        fn sign_detached(&self, data: &[u8], signing_key: &str) -> Result<Vec<u8>> {
            Ok(format!("{:016x}", Self::checksum(data, signing_key)).into_bytes())
        }

        fn verify_detached(&self, signature: &[u8], data: &[u8]) -> Result<bool> {
            let held = self.secret_keys.lock().unwrap();
            Ok(held.iter().any(|key| {
                format!("{:016x}", Self::checksum(data, key)).as_bytes() == signature
            }))
        }

        fn list_public_keys(&self) -> Result<Vec<String>> {
            Ok(self.public_keys.lock().unwrap().clone())
        }

        fn list_secret_keys(&self) -> Result<Vec<String>> {
            Ok(self.secret_keys.lock().unwrap().clone())
        }

        fn export_public_keys(&self, identifiers: &[String]) -> Result<String> {
            let keys = self.public_keys.lock().unwrap();
            let exported: Vec<&String> = if identifiers.is_empty() {
                keys.iter().collect()
            } else {
                keys.iter().filter(|k| identifiers.contains(k)).collect()
            };
            Ok(format!(
                "-----BEGIN PGP PUBLIC KEY BLOCK-----\n{}\n-----END PGP PUBLIC KEY BLOCK-----",
                exported.iter().map(|k| k.as_str()).collect::<Vec<_>>().join("\n")
            ))
        }

        fn import_public_keys(&self, armored: &str) -> Result<usize> {
            let mut keys = self.public_keys.lock().unwrap();
            let mut imported = 0;
            for line in armored.lines() {
                if !line.starts_with("-----") && !line.is_empty() {
                    keys.push(line.to_string());
                    imported += 1;
                }
            }
            Ok(imported)
        }
    }

    fn backend_with(
        secret_keys: &[&str],
        recipients: &[&str],
        sign_key: Option<&str>,
    ) -> (TempDir, GpgBackend) {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new(secret_keys, secret_keys));
        let config = GpgConfig {
            recipients: recipients.iter().map(|s| s.to_string()).collect(),
            sign_key: sign_key.map(|s| s.to_string()),
            ..GpgConfig::default()
        };
        let backend = GpgBackend::new(engine, &config, dir.path()).unwrap();
        (dir, backend)
    }

    fn sample_metadata() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("host".into(), "localhost".into());
        metadata.insert("port".into(), 5432.into());
        metadata.insert("database".into(), "mydb".into());
        metadata
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(GpgBackend::sanitize_key("dbcreds:dev"), "dbcreds_dev");
        assert_eq!(GpgBackend::sanitize_key("../../etc/passwd"), "______etc_passwd");
        assert_eq!(GpgBackend::sanitize_key("safe-key_1"), "safe-key_1");
    }

    #[test]
    fn test_roundtrip_unsigned() {
        let (_dir, backend) = backend_with(&["team-key"], &["team-key"], None);
        backend
            .set_credential("dbcreds:dev", "alice", &SecretString::new("pw"), &sample_metadata())
            .unwrap();

        let stored = backend.get_credential("dbcreds:dev").unwrap().unwrap();
        assert_eq!(stored.username, "alice");
        assert_eq!(stored.password.expose_secret(), "pw");
        assert_eq!(stored.metadata.get("host").unwrap(), "localhost");
    }

    #[test]
    fn test_signed_roundtrip_writes_signature() {
        let (dir, backend) = backend_with(&["team-key"], &["team-key"], Some("team-key"));
        backend
            .set_credential("dbcreds:dev", "alice", &SecretString::new("pw"), &sample_metadata())
            .unwrap();

        assert!(dir.path().join("gpg/dbcreds_dev.gpg").exists());
        assert!(dir.path().join("gpg/dbcreds_dev.gpg.sig").exists());
        assert!(backend.get_credential("dbcreds:dev").unwrap().is_some());
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let (dir, backend) = backend_with(&["team-key"], &["team-key"], Some("team-key"));
        backend
            .set_credential("dbcreds:dev", "alice", &SecretString::new("pw"), &sample_metadata())
            .unwrap();

        // Flip the ciphertext under the existing signature.
        let path = dir.path().join("gpg/dbcreds_dev.gpg");
        let mut raw = fs::read(&path).unwrap();
        raw[0] ^= 0xff;
        fs::write(&path, raw).unwrap();

        let result = backend.get_credential("dbcreds:dev");
        assert!(matches!(
            result.unwrap_err(),
            CredentialError::Security { .. }
        ));
    }

    #[test]
    fn test_decrypt_failure_reports_absent() {
        // Encrypted for someone else; our engine cannot decrypt it.
        let (_dir, backend) = backend_with(&["our-key"], &["their-key"], None);
        let document = serde_json::json!({
            "recipients": ["their-key"],
            "payload": "{}",
        });
        fs::write(
            backend.ciphertext_path("dbcreds:dev"),
            serde_json::to_vec(&document).unwrap(),
        )
        .unwrap();

        assert!(backend.get_credential("dbcreds:dev").unwrap().is_none());
    }

    #[test]
    fn test_missing_signing_key_rejected_at_construction() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new(&["a"], &["a"]));
        let config = GpgConfig {
            recipients: vec!["a".to_string()],
            sign_key: Some("missing".to_string()),
            ..GpgConfig::default()
        };
        let result = GpgBackend::new(engine, &config, dir.path());
        assert!(matches!(
            result.unwrap_err(),
            CredentialError::Security { .. }
        ));
    }

    #[test]
    fn test_set_without_recipients_fails() {
        let (_dir, backend) = backend_with(&["k"], &[], None);
        let result = backend.set_credential(
            "dbcreds:dev",
            "a",
            &SecretString::new("p"),
            &sample_metadata(),
        );
        assert!(matches!(
            result.unwrap_err(),
            CredentialError::Validation { .. }
        ));
    }

    #[test]
    fn test_delete_removes_both_files() {
        let (dir, backend) = backend_with(&["k"], &["k"], Some("k"));
        backend
            .set_credential("dbcreds:dev", "a", &SecretString::new("p"), &sample_metadata())
            .unwrap();
        assert!(backend.delete_credential("dbcreds:dev").unwrap());
        assert!(!dir.path().join("gpg/dbcreds_dev.gpg").exists());
        assert!(!dir.path().join("gpg/dbcreds_dev.gpg.sig").exists());
        assert!(!backend.delete_credential("dbcreds:dev").unwrap());
    }

    #[test]
    fn test_list_credentials_sorted() {
        let (_dir, backend) = backend_with(&["k"], &["k"], None);
        for env in ["prod", "dev"] {
            backend
                .set_credential(
                    &format!("dbcreds:{env}"),
                    "u",
                    &SecretString::new("p"),
                    &sample_metadata(),
                )
                .unwrap();
        }
        assert_eq!(
            backend.list_credentials().unwrap(),
            vec!["dbcreds_dev", "dbcreds_prod"]
        );
    }

    #[test]
    fn test_rotation_reencrypts_for_new_recipients() {
        let (_dir, backend) = backend_with(&["old-key", "new-key"], &["old-key"], None);
        backend
            .set_credential("dbcreds:dev", "alice", &SecretString::new("pw"), &sample_metadata())
            .unwrap();
        let before = backend.get_credential("dbcreds_dev").unwrap().unwrap();

        let report = backend
            .rotate_keys(&["old-key".to_string()], &["new-key".to_string()])
            .unwrap();
        assert!(report.succeeded());
        assert_eq!(report.rotated, 1);

        let after = backend.get_credential("dbcreds_dev").unwrap().unwrap();
        assert_eq!(after.username, before.username);
        assert_eq!(after.password, before.password);
        assert_eq!(after.metadata, before.metadata);

        // The new ciphertext names only the new recipient.
        let raw = fs::read(backend.ciphertext_path("dbcreds_dev")).unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(envelope["recipients"], serde_json::json!(["new-key"]));
    }

    #[test]
    fn test_rotation_tolerates_partial_failure() {
        let (_dir, backend) = backend_with(&["ours"], &["ours"], None);
        backend
            .set_credential("dbcreds:good", "a", &SecretString::new("p"), &sample_metadata())
            .unwrap();
        // A credential we cannot decrypt.
        let foreign = serde_json::json!({ "recipients": ["theirs"], "payload": "{}" });
        fs::write(
            backend.ciphertext_path("dbcreds:bad"),
            serde_json::to_vec(&foreign).unwrap(),
        )
        .unwrap();

        let report =
            backend.rotate_keys(&["ours".to_string()], &["next".to_string()]).unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.rotated, 1);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_verify_all_signatures() {
        let (dir, backend) = backend_with(&["k"], &["k"], Some("k"));
        backend
            .set_credential("dbcreds:ok", "a", &SecretString::new("p"), &sample_metadata())
            .unwrap();
        backend
            .set_credential("dbcreds:tampered", "b", &SecretString::new("p"), &sample_metadata())
            .unwrap();

        // Corrupt one ciphertext after signing.
        let path = dir.path().join("gpg/dbcreds_tampered.gpg");
        let mut raw = fs::read(&path).unwrap();
        raw[0] ^= 0xff;
        fs::write(&path, raw).unwrap();

        let results = backend.verify_all_signatures().unwrap();
        assert_eq!(results.get("dbcreds_ok"), Some(&true));
        assert_eq!(results.get("dbcreds_tampered"), Some(&false));
    }

    #[test]
    fn test_key_without_signature_reports_false() {
        let (dir, backend) = backend_with(&["k"], &["k"], Some("k"));
        backend
            .set_credential("dbcreds:dev", "a", &SecretString::new("p"), &sample_metadata())
            .unwrap();
        fs::remove_file(dir.path().join("gpg/dbcreds_dev.gpg.sig")).unwrap();

        let results = backend.verify_all_signatures().unwrap();
        assert_eq!(results.get("dbcreds_dev"), Some(&false));
    }

    #[test]
    fn test_export_import_public_keys() {
        let (_dir, backend) = backend_with(&["k1"], &["k1"], None);
        let armored = backend.export_public_keys(&[]).unwrap();
        assert!(armored.contains("BEGIN PGP PUBLIC KEY BLOCK"));

        let imported = backend.import_public_keys("teammate-key\n").unwrap();
        assert_eq!(imported, 1);
    }
}
