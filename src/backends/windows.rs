//! Windows Credential Manager backends.
//!
//! The native ABI lives in this module only; the rest of the crate sees the
//! [`CredentialBackend`] contract. The credential document
//! `{password, ...metadata}` is serialized to JSON, encoded UTF-16LE, and
//! written as the opaque `CredentialBlob` of a generic `CREDENTIALW`
//! record. Reads reverse the marshalling; a blob that does not parse as
//! JSON is decoded as a legacy raw-password blob instead of failing.

use std::path::PathBuf;
use std::ptr;

use tracing::debug;

use winapi::shared::minwindef::{DWORD, FILETIME};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::wincred::{
    CredDeleteW, CredEnumerateW, CredFree, CredReadW, CredWriteW, CREDENTIALW,
    CRED_PERSIST_LOCAL_MACHINE, CRED_TYPE_GENERIC, PCREDENTIALW,
};

use super::{BackendKind, CredentialBackend, Metadata, StoredCredential};
use crate::domain::SecretString;
use crate::errors::{CredentialError, Result};
use crate::KEY_PREFIX;

/// ERROR_NOT_FOUND: the target does not exist. Treated as absence, not
/// failure.
const ERROR_NOT_FOUND: DWORD = 1168;

/// Windows Credential Manager backend using the native API.
pub struct WindowsNativeBackend;

impl WindowsNativeBackend {
    /// Creates a new native backend.
    pub fn new() -> Self {
        Self
    }

    /// NUL-terminated UTF-16 for the native API.
    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn from_wide_ptr(ptr: *const u16) -> String {
        if ptr.is_null() {
            return String::new();
        }
        unsafe {
            let len = (0..).take_while(|&i| *ptr.offset(i) != 0).count();
            String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
        }
    }

    /// Decode a credential blob: UTF-16LE bytes, NUL padding stripped.
    fn decode_blob(blob: &[u8]) -> String {
        let units: Vec<u16> = blob
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units).trim_end_matches('\0').to_string()
    }

    /// Read one target and split the blob into password + metadata.
    fn read_target(&self, target: &str) -> Result<Option<StoredCredential>> {
        let target_wide = Self::to_wide(target);
        let mut cred_ptr: PCREDENTIALW = ptr::null_mut();

        unsafe {
            if CredReadW(target_wide.as_ptr(), CRED_TYPE_GENERIC, 0, &mut cred_ptr) == 0 {
                let code = GetLastError();
                if code == ERROR_NOT_FOUND {
                    return Ok(None);
                }
                return Err(CredentialError::backend(format!(
                    "CredReadW('{}') failed with code {}",
                    target, code
                )));
            }

            let cred = &*cred_ptr;
            let username = Self::from_wide_ptr(cred.UserName);
            let blob_size = cred.CredentialBlobSize as usize;
            let result = if blob_size > 0 {
                let blob = std::slice::from_raw_parts(cred.CredentialBlob, blob_size);
                let decoded = Self::decode_blob(blob);
                match serde_json::from_str::<Metadata>(&decoded) {
                    Ok(mut document) => {
                        let password = document
                            .remove("password")
                            .and_then(|v| v.as_str().map(str::to_string))
                            .unwrap_or_default();
                        StoredCredential {
                            username,
                            password: SecretString::new(password),
                            metadata: document,
                        }
                    }
                    // Legacy format: the blob is the bare password.
                    Err(_) => StoredCredential {
                        username,
                        password: SecretString::new(decoded),
                        metadata: Metadata::new(),
                    },
                }
            } else {
                StoredCredential {
                    username,
                    password: SecretString::default(),
                    metadata: Metadata::new(),
                }
            };

            CredFree(cred_ptr as *mut _);
            Ok(Some(result))
        }
    }
}

impl Default for WindowsNativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialBackend for WindowsNativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::WindowsNative
    }

    fn is_available(&self) -> bool {
        // Enumerating with a filter that matches nothing still proves the
        // store answers.
        let filter = Self::to_wide("dbcreds-availability-probe:*");
        let mut count: DWORD = 0;
        let mut creds: *mut PCREDENTIALW = ptr::null_mut();
        unsafe {
            let ok = CredEnumerateW(filter.as_ptr(), 0, &mut count, &mut creds);
            if !creds.is_null() {
                CredFree(creds as *mut _);
            }
            ok != 0 || GetLastError() == ERROR_NOT_FOUND
        }
    }

    fn get_credential(&self, key: &str) -> Result<Option<StoredCredential>> {
        self.read_target(key)
    }

    fn set_credential(
        &self,
        key: &str,
        username: &str,
        password: &SecretString,
        metadata: &Metadata,
    ) -> Result<()> {
        // Idempotent overwrite: drop any existing record first.
        let _ = self.delete_credential(key);

        let mut document = metadata.clone();
        document.insert("password".into(), password.expose_secret().into());
        let blob_utf16: Vec<u16> = serde_json::to_string(&document)?.encode_utf16().collect();
        let mut blob_bytes: Vec<u8> =
            blob_utf16.iter().flat_map(|unit| unit.to_le_bytes()).collect();

        let mut target_wide = Self::to_wide(key);
        let mut username_wide = Self::to_wide(username);

        let mut cred = CREDENTIALW {
            Flags: 0,
            Type: CRED_TYPE_GENERIC,
            TargetName: target_wide.as_mut_ptr(),
            Comment: ptr::null_mut(),
            LastWritten: FILETIME { dwLowDateTime: 0, dwHighDateTime: 0 },
            CredentialBlobSize: blob_bytes.len() as DWORD,
            CredentialBlob: blob_bytes.as_mut_ptr(),
            Persist: CRED_PERSIST_LOCAL_MACHINE,
            AttributeCount: 0,
            Attributes: ptr::null_mut(),
            TargetAlias: ptr::null_mut(),
            UserName: username_wide.as_mut_ptr(),
        };

        unsafe {
            if CredWriteW(&mut cred, 0) == 0 {
                return Err(CredentialError::backend(format!(
                    "CredWriteW('{}') failed with code {}",
                    key,
                    GetLastError()
                )));
            }
        }
        Ok(())
    }

    fn delete_credential(&self, key: &str) -> Result<bool> {
        let target_wide = Self::to_wide(key);
        unsafe {
            if CredDeleteW(target_wide.as_ptr(), CRED_TYPE_GENERIC, 0) != 0 {
                return Ok(true);
            }
            let code = GetLastError();
            if code == ERROR_NOT_FOUND {
                return Ok(false);
            }
            Err(CredentialError::backend(format!(
                "CredDeleteW('{}') failed with code {}",
                key, code
            )))
        }
    }

    fn list_credentials(&self) -> Result<Vec<String>> {
        let filter = Self::to_wide(&format!("{}*", KEY_PREFIX));
        let mut count: DWORD = 0;
        let mut creds: *mut PCREDENTIALW = ptr::null_mut();

        unsafe {
            if CredEnumerateW(filter.as_ptr(), 0, &mut count, &mut creds) == 0 {
                let code = GetLastError();
                if code == ERROR_NOT_FOUND {
                    return Ok(Vec::new());
                }
                return Err(CredentialError::backend(format!(
                    "CredEnumerateW failed with code {}",
                    code
                )));
            }

            let slice = std::slice::from_raw_parts(creds, count as usize);
            let mut keys: Vec<String> = slice
                .iter()
                .map(|&cred| Self::from_wide_ptr((*cred).TargetName))
                .collect();
            CredFree(creds as *mut _);
            keys.sort();
            Ok(keys)
        }
    }
}

/// Legacy on-disk config written by the old PowerShell tooling.
#[derive(Debug, serde::Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    port: Option<serde_json::Value>,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    update_date: Option<String>,
}

/// Backend for credentials stored by the legacy PowerShell profile.
///
/// Reads the standard format first, then falls back to
/// `DBCredentials:{database}` targets combined with
/// `~/.db_credentials/config.json`.
pub struct LegacyWindowsBackend {
    inner: WindowsNativeBackend,
    config_path: PathBuf,
}

impl LegacyWindowsBackend {
    /// Creates a new legacy-compatible backend.
    pub fn new() -> Self {
        let config_path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".db_credentials")
            .join("config.json");
        Self { inner: WindowsNativeBackend::new(), config_path }
    }

    fn load_legacy_config(&self) -> Option<LegacyConfig> {
        let raw = std::fs::read_to_string(&self.config_path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(config) => Some(config),
            Err(error) => {
                debug!(%error, "Could not parse legacy config");
                None
            }
        }
    }

    /// Raw-password read from a `DBCredentials:{database}` target.
    fn legacy_password(&self, database: &str) -> Option<SecretString> {
        let target = format!("DBCredentials:{}", database);
        match self.inner.read_target(&target) {
            Ok(Some(stored)) if !stored.password.is_empty() => Some(stored.password),
            _ => None,
        }
    }
}

impl Default for LegacyWindowsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialBackend for LegacyWindowsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LegacyWindowsNative
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn get_credential(&self, key: &str) -> Result<Option<StoredCredential>> {
        // Standard format first.
        if let Some(stored) = self.inner.get_credential(key)? {
            return Ok(Some(stored));
        }

        if !key.starts_with(KEY_PREFIX) {
            return Ok(None);
        }

        let Some(config) = self.load_legacy_config() else {
            return Ok(None);
        };
        let database = config.database.clone().unwrap_or_default();
        let Some(password) = self.legacy_password(&database) else {
            return Ok(None);
        };

        let mut metadata = Metadata::new();
        metadata.insert(
            "host".into(),
            config.server.clone().unwrap_or_else(|| "localhost".to_string()).into(),
        );
        let port = config
            .port
            .as_ref()
            .and_then(|value| match value {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .unwrap_or(5432);
        metadata.insert("port".into(), port.into());
        metadata.insert("database".into(), database.into());
        if let Some(updated) = &config.update_date {
            metadata.insert("password_updated_at".into(), updated.clone().into());
        }

        Ok(Some(StoredCredential {
            username: config.username.unwrap_or_default(),
            password,
            metadata,
        }))
    }

    fn set_credential(
        &self,
        key: &str,
        username: &str,
        password: &SecretString,
        metadata: &Metadata,
    ) -> Result<()> {
        // Writes always use the standard format.
        self.inner.set_credential(key, username, password, metadata)
    }

    fn delete_credential(&self, key: &str) -> Result<bool> {
        self.inner.delete_credential(key)
    }

    fn list_credentials(&self) -> Result<Vec<String>> {
        self.inner.list_credentials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_wide_roundtrip() {
        let wide = WindowsNativeBackend::to_wide("dbcreds:dev");
        assert_eq!(wide.last(), Some(&0));
        let back = String::from_utf16_lossy(&wide[..wide.len() - 1]);
        assert_eq!(back, "dbcreds:dev");
    }

    #[test]
    fn test_decode_blob_strips_padding() {
        let blob: Vec<u8> = "pw\0".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(WindowsNativeBackend::decode_blob(&blob), "pw");
    }

    #[test]
    fn test_decode_blob_json_document() {
        let doc = r#"{"password":"pw","host":"localhost"}"#;
        let blob: Vec<u8> = doc.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let decoded = WindowsNativeBackend::decode_blob(&blob);
        let parsed: HashMap<String, serde_json::Value> =
            serde_json::from_str(&decoded).unwrap();
        assert_eq!(parsed.get("host").unwrap(), "localhost");
    }
}
