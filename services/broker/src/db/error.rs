//! Registry error types.

use thiserror::Error;

use crate::secrets::SecretsCryptoError;

/// Registry operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/broker.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A persisted row could not be decoded into a record.
    #[error("failed to decode stored record: {0}")]
    Decode(String),

    /// Secret field encryption or decryption failed.
    #[error("secret field crypto failed: {0}")]
    Crypto(#[from] SecretsCryptoError),
}
