//! Convoy core library.
//!
//! Lock-coordinated, append-only schema migrations. Every process that
//! starts up calls [`Migrator::run`]; exactly one of them applies the pending
//! migrations while the others wait on the lock and then find nothing to do.

extern crate self as convoy;

pub mod backend;
pub mod errors;
pub mod id;
pub mod keys;
pub mod migration;
pub mod migrator;
pub mod observe;
pub mod reconcile;
pub mod source;

pub use backend::{AppliedMigration, Backend, MemoryBackend, MemoryStore, RedisBackend, RedisBackendConfig};
#[cfg(feature = "postgres")]
pub use backend::PostgresBackend;
pub use errors::*;
pub use migration::{Execer, Migration};
pub use migrator::{MigrationStats, Migrator, MigratorConfig};
pub use observe::{FnSink, LogSink, MigrateEvent, NullSink, ProgressSink};
pub use reconcile::{Plan, reconcile};
pub use source::{EmbeddedMigration, EmbeddedSource, FileMigration, FileSource, MigrationSource};

pub use convoy_macros::embed_migrations;

// Re-export redis types so users don't need to depend on a specific redis version
pub use redis;
pub use redis::aio::ConnectionManager;
