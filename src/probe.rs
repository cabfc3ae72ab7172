//! Connection-test collaborator interface.
//!
//! The crate ships no database driver. `test_connection` delegates to
//! whatever [`ConnectionProbe`] the embedding application provides,
//! typically a thin adapter over its driver of choice that opens a
//! connection and immediately closes it.

use crate::domain::{DatabaseCredentials, Environment};
use crate::errors::Result;

/// Opens and closes a connection to verify stored credentials work.
pub trait ConnectionProbe: Send + Sync {
    /// Attempt a connection with `creds` against the environment's
    /// database type. Any `Err` is reported to the caller as a failed
    /// test, never propagated.
    fn connect(&self, env: &Environment, creds: &DatabaseCredentials) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CredentialError;

    struct AlwaysOk;

    impl ConnectionProbe for AlwaysOk {
        fn connect(&self, _env: &Environment, _creds: &DatabaseCredentials) -> Result<()> {
            Ok(())
        }
    }

    struct AlwaysRefused;

    impl ConnectionProbe for AlwaysRefused {
        fn connect(&self, _env: &Environment, _creds: &DatabaseCredentials) -> Result<()> {
            Err(CredentialError::backend("connection refused"))
        }
    }

    #[test]
    fn test_probe_objects_are_object_safe() {
        let probes: Vec<Box<dyn ConnectionProbe>> =
            vec![Box::new(AlwaysOk), Box::new(AlwaysRefused)];
        assert_eq!(probes.len(), 2);
    }
}
