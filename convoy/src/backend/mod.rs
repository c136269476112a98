//! Storage backends.
//!
//! A backend provides the coordination lock, the applied history, and the
//! atomic "run the body and record its identifier" operation. The engine in
//! [`crate::migrator`] is written purely against [`Backend`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;
use crate::migration::Migration;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod redis;
mod scripts;

pub use memory::{MemoryBackend, MemoryConnection, MemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
pub use redis::{LuaScript, RedisBackend, RedisBackendConfig};

/// Contract implemented once per storage engine.
///
/// `lock` must not block on contention: a held lock is reported as an error
/// straight away so the caller owns the retry policy. `lock` and `unlock` are
/// never called concurrently, and a second `lock` while holding fails.
#[async_trait]
pub trait Backend: Send {
    /// Connection type handed to migration bodies during [`Backend::apply`].
    type Conn: ?Sized + Send;

    async fn lock(&mut self) -> Result<(), BackendError>;

    async fn unlock(&mut self) -> Result<(), BackendError>;

    /// Identifiers of committed migrations, in commit order.
    async fn applied(&mut self) -> Result<Vec<String>, BackendError>;

    /// Runs the migration body and records its identifier as one unit.
    async fn apply(&mut self, migration: &dyn Migration<Self::Conn>) -> Result<(), BackendError>;
}

#[async_trait]
impl<'a, B> Backend for &'a mut B
where
    B: Backend + ?Sized,
{
    type Conn = B::Conn;

    async fn lock(&mut self) -> Result<(), BackendError> {
        (**self).lock().await
    }

    async fn unlock(&mut self) -> Result<(), BackendError> {
        (**self).unlock().await
    }

    async fn applied(&mut self) -> Result<Vec<String>, BackendError> {
        (**self).applied().await
    }

    async fn apply(&mut self, migration: &dyn Migration<Self::Conn>) -> Result<(), BackendError> {
        (**self).apply(migration).await
    }
}

/// Metadata stored alongside each applied identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Migration identifier (e.g., "20241228_100000_init.lua")
    pub id: String,
    /// When the migration was applied, always UTC
    pub applied_at: DateTime<Utc>,
    /// Time spent building and running the migration body
    pub execution_time_ms: u64,
}

impl AppliedMigration {
    pub fn new(id: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            id: id.into(),
            applied_at: Utc::now(),
            execution_time_ms,
        }
    }
}
