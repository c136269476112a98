use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error returned by migration bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Underlying Redis command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Underlying PostgreSQL statement failed.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// `lock` was called while this instance already holds the lock.
    #[error("lock already acquired")]
    AlreadyLocked,

    /// `unlock` was called without a held lock.
    #[error("unable to unlock, lock not acquired")]
    NotLocked,

    /// Another process holds the migration lock.
    #[error("migration lock is held by another process")]
    LockHeld,

    /// The lock expired or was taken over while this instance believed it held it.
    #[error("migration lock is no longer owned by this process")]
    LockLost,

    /// The identifier is already present in the applied history.
    #[error("migration {id} is already recorded as applied")]
    AlreadyRecorded { id: String },

    /// The migration body itself failed.
    #[error("{0}")]
    Payload(BoxError),

    /// Applied-migration record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

impl BackendError {
    pub fn other(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Applied history is not a positional prefix of the supplied migrations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("more migrations have been applied ({applied}) than there exist ({known})")]
    TooLong { applied: usize, known: usize },

    #[error("unknown migration encountered at position {index}, expected {expected} but was {found}")]
    Mismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("migration identifier {id} appears twice (positions {first} and {second})")]
    DuplicateIdentifier { id: String, first: usize, second: usize },
}

/// Failure while loading migrations from a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("migration file name is not valid UTF-8: {path}")]
    InvalidName { path: PathBuf },
}

/// Terminal outcome of a migration run that did not succeed.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Applied history does not match the supplied migrations.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The applied history could not be retrieved.
    #[error("failed to read applied migrations: {0}")]
    ReadHistory(#[source] BackendError),

    /// A pending migration failed to apply. Earlier migrations stay applied.
    #[error("migrate failed for {id}: {source}")]
    Apply {
        id: String,
        #[source]
        source: BackendError,
    },

    /// The configured attempt cap was reached without acquiring the lock.
    #[error("unable to acquire migration lock after {attempts} attempt(s): {last}")]
    LockUnavailable { attempts: u32, last: BackendError },

    /// The backend refused the lock request for a reason retrying cannot fix,
    /// such as an instance already locked outside the migrator.
    #[error("migration lock request rejected: {0}")]
    Lock(#[source] BackendError),

    /// The run was cancelled by its caller.
    #[error("migration run cancelled after applying {} migration(s)", applied.len())]
    Cancelled { applied: Vec<String> },
}

impl MigrateError {
    /// Identifier of the migration that failed to apply, if any.
    pub fn failed_migration(&self) -> Option<&str> {
        match self {
            MigrateError::Apply { id, .. } => Some(id),
            _ => None,
        }
    }
}
