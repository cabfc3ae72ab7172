//! GPG engine backed by the `gpg` command-line binary.
//!
//! Every invocation runs `--batch` with an explicit timeout: the child is
//! killed once the deadline passes, so a wedged pinentry or agent cannot
//! hang the credential chain.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::GpgEngine;
use crate::config::GpgConfig;
use crate::errors::{CredentialError, Result};

/// Subprocess-based GPG engine.
pub struct GpgCommand {
    binary: String,
    gpg_home: Option<PathBuf>,
    timeout: Duration,
}

impl GpgCommand {
    /// Build an engine from backend configuration.
    pub fn new(config: &GpgConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            gpg_home: config.gpg_home.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--batch").arg("--yes").arg("--quiet");
        if let Some(home) = &self.gpg_home {
            cmd.arg("--homedir").arg(home);
        }
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    /// Run gpg with `args`, feeding `input` on stdin, enforcing the
    /// configured timeout.
    fn run(&self, args: &[&str], input: &[u8]) -> Result<Output> {
        let mut cmd = self.base_command();
        cmd.args(args);
        debug!(binary = %self.binary, ?args, "Invoking gpg");

        let mut child = cmd
            .spawn()
            .map_err(|e| CredentialError::security(format!("Failed to spawn {}: {}", self.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input)?;
            // Drop closes the pipe so gpg sees EOF.
        }

        let output = wait_with_timeout(child, self.timeout)?;
        Ok(output)
    }

    fn run_expecting_success(&self, args: &[&str], input: &[u8]) -> Result<Output> {
        let output = self.run(args, input)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::security(format!(
                "gpg {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

/// Wait for the child, killing it once `timeout` elapses.
fn wait_with_timeout(child: Child, timeout: Duration) -> Result<Output> {
    let (tx, rx) = mpsc::channel();
    let pid = child.id();
    let handle = thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            let _ = handle.join();
            result.map_err(CredentialError::from)
        }
        Err(_) => {
            // Deadline passed; the reaper thread still owns the child, so
            // terminate it by pid and collect the thread.
            kill_process(pid);
            let _ = handle.join();
            Err(CredentialError::security(format!(
                "gpg invocation timed out after {}s",
                timeout.as_secs()
            )))
        }
    }
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    // SIGKILL; the process holds no state worth flushing.
    let _ = Command::new("kill").arg("-9").arg(pid.to_string()).status();
}

#[cfg(windows)]
fn kill_process(pid: u32) {
    let _ = Command::new("taskkill").args(["/PID", &pid.to_string(), "/T", "/F"]).status();
}

impl GpgEngine for GpgCommand {
    fn version(&self) -> Result<String> {
        let output = self.run_expecting_success(&["--version"], &[])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    fn encrypt(&self, plaintext: &[u8], recipients: &[String]) -> Result<Vec<u8>> {
        if recipients.is_empty() {
            return Err(CredentialError::validation("No GPG recipients specified"));
        }
        let mut args = vec!["--encrypt", "--trust-model", "always"];
        for recipient in recipients {
            args.push("--recipient");
            args.push(recipient);
        }
        let output = self.run_expecting_success(&args, plaintext)?;
        Ok(output.stdout)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let output = self.run_expecting_success(&["--decrypt"], ciphertext)?;
        Ok(output.stdout)
    }

    fn sign_detached(&self, data: &[u8], signing_key: &str) -> Result<Vec<u8>> {
        let output = self.run_expecting_success(
            &["--detach-sign", "--local-user", signing_key],
            data,
        )?;
        Ok(output.stdout)
    }

    fn verify_detached(&self, signature: &[u8], data: &[u8]) -> Result<bool> {
        // Detached verification needs both artifacts as files; stage them
        // under unique names in a private temp directory.
        static STAGE_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = STAGE_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let staging = std::env::temp_dir().join(format!("dbcreds-gpg-{}", std::process::id()));
        std::fs::create_dir_all(&staging)?;
        let sig_path = staging.join(format!("payload-{seq}.sig"));
        let data_path = staging.join(format!("payload-{seq}"));
        std::fs::write(&sig_path, signature)?;
        std::fs::write(&data_path, data)?;

        let result = self.run(
            &[
                "--verify",
                sig_path.to_str().unwrap_or_default(),
                data_path.to_str().unwrap_or_default(),
            ],
            &[],
        );

        let _ = std::fs::remove_file(&sig_path);
        let _ = std::fs::remove_file(&data_path);
        let _ = std::fs::remove_dir(&staging);

        Ok(result?.status.success())
    }

    fn list_public_keys(&self) -> Result<Vec<String>> {
        let output =
            self.run_expecting_success(&["--list-keys", "--with-colons"], &[])?;
        Ok(parse_colon_keys(&output.stdout, "pub"))
    }

    fn list_secret_keys(&self) -> Result<Vec<String>> {
        let output =
            self.run_expecting_success(&["--list-secret-keys", "--with-colons"], &[])?;
        Ok(parse_colon_keys(&output.stdout, "sec"))
    }

    fn export_public_keys(&self, identifiers: &[String]) -> Result<String> {
        let mut args = vec!["--export", "--armor"];
        for id in identifiers {
            args.push(id);
        }
        let output = self.run_expecting_success(&args, &[])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn import_public_keys(&self, armored: &str) -> Result<usize> {
        let output = self.run_expecting_success(
            &["--import", "--status-fd", "2"],
            armored.as_bytes(),
        )?;
        // Status lines land on fd 2: one IMPORT_OK per accepted key.
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(stderr.lines().filter(|line| line.contains("IMPORT_OK")).count())
    }
}

/// Extract key identifiers from `--with-colons` output.
fn parse_colon_keys(stdout: &[u8], record: &str) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.first() != Some(&record) {
                return None;
            }
            // keyid is the fifth colon-separated field
            fields.get(4).filter(|id| !id.is_empty()).map(|id| id.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_keys() {
        let stdout = b"tru::1:1700000000:0:3:1:5\n\
pub:u:4096:1:ABCDEF0123456789:1700000000:::u:::scESC::::::23::0:\n\
uid:u::::1700000000::HASH::Alice <alice@example.com>::::::::::0:\n\
sub:u:4096:1:1122334455667788:1700000000::::::e::::::23:\n";
        let keys = parse_colon_keys(stdout, "pub");
        assert_eq!(keys, vec!["ABCDEF0123456789".to_string()]);
        assert!(parse_colon_keys(stdout, "sec").is_empty());
    }

    #[test]
    fn test_encrypt_requires_recipients() {
        let engine = GpgCommand::new(&GpgConfig::default());
        let result = engine.encrypt(b"data", &[]);
        assert!(matches!(
            result.unwrap_err(),
            CredentialError::Validation { .. }
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_timeout_kills_wedged_child() {
        // `sleep` stands in for a hung gpg; the wrapper must come back with
        // a security error instead of blocking.
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let started = std::time::Instant::now();
        let result = wait_with_timeout(child, Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(
            result.unwrap_err(),
            CredentialError::Security { .. }
        ));
    }
}
