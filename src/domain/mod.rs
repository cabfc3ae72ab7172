//! Domain models for environments, credentials, and password lifecycle.

pub mod credentials;
pub mod environment;
pub mod secret;

pub use credentials::{DatabaseCredentials, PasswordState, EXPIRY_WARNING_DAYS};
pub use environment::{DatabaseType, Environment};
pub use secret::SecretString;
