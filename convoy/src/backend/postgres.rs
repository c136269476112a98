//! PostgreSQL backend (feature `postgres`).
//!
//! The lock is an `ACCESS EXCLUSIVE` lock on `schema_migrations_lock` taken
//! with `NOWAIT` inside a transaction that stays open for the whole run and
//! is rolled back, never committed, on unlock. Each migration runs in its own
//! transaction together with the insert into `schema_migrations`, so a body
//! and its record commit or roll back together.
//!
//! The lock transaction pins one pool connection; pools need at least two.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::Backend;
use crate::errors::{BackendError, BoxError};
use crate::migration::{Execer, Migration};

const CREATE_LOCK_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations_lock(lock boolean PRIMARY KEY)";
const LOCK_TABLE: &str = "LOCK TABLE schema_migrations_lock IN ACCESS EXCLUSIVE MODE NOWAIT";
const CREATE_HISTORY_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations(\
    identifier varchar(255) NOT NULL PRIMARY KEY, \
    migrated_at timestamp WITH TIME ZONE NOT NULL DEFAULT now())";
const SELECT_HISTORY: &str = "SELECT identifier FROM schema_migrations ORDER BY migrated_at, identifier";
const INSERT_HISTORY: &str = "INSERT INTO schema_migrations(identifier) VALUES ($1)";

/// SQLSTATE raised by `NOWAIT` when the lock is taken.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE for unique violations.
const UNIQUE_VIOLATION: &str = "23505";

#[async_trait]
impl Execer for PgConnection {
    async fn exec(&mut self, payload: &str) -> Result<(), BoxError> {
        sqlx::Executor::execute(self, sqlx::raw_sql(payload)).await?;
        Ok(())
    }
}

/// Backend for the PostgreSQL dialect.
pub struct PostgresBackend {
    pool: PgPool,
    lock: Option<Transaction<'static, Postgres>>,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, lock: None }
    }

    /// Opens a small pool (two connections: lock holder plus applier).
    pub async fn connect(database_url: &str) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new().max_connections(2).connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code.into_owned())
}

#[async_trait]
impl Backend for PostgresBackend {
    type Conn = PgConnection;

    async fn lock(&mut self) -> Result<(), BackendError> {
        if self.lock.is_some() {
            return Err(BackendError::AlreadyLocked);
        }

        sqlx::query(CREATE_LOCK_TABLE).execute(&self.pool).await?;

        let mut tx = self.pool.begin().await?;
        if let Err(err) = sqlx::query(LOCK_TABLE).execute(&mut *tx).await {
            if let Err(rollback_err) = tx.rollback().await {
                log::debug!("rollback after failed lock attempt: {rollback_err}");
            }
            if sqlstate(&err).as_deref() == Some(LOCK_NOT_AVAILABLE) {
                return Err(BackendError::LockHeld);
            }
            return Err(err.into());
        }

        self.lock = Some(tx);
        Ok(())
    }

    async fn unlock(&mut self) -> Result<(), BackendError> {
        let tx = self.lock.take().ok_or(BackendError::NotLocked)?;
        tx.rollback().await?;
        Ok(())
    }

    async fn applied(&mut self) -> Result<Vec<String>, BackendError> {
        sqlx::query(CREATE_HISTORY_TABLE).execute(&self.pool).await?;
        let ids: Vec<String> = sqlx::query_scalar(SELECT_HISTORY).fetch_all(&self.pool).await?;
        Ok(ids)
    }

    async fn apply(&mut self, migration: &dyn Migration<PgConnection>) -> Result<(), BackendError> {
        if self.lock.is_none() {
            return Err(BackendError::NotLocked);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET LOCAL timezone = 'UTC'").execute(&mut *tx).await?;

        migration.migrate(&mut *tx).await.map_err(BackendError::Payload)?;

        if let Err(err) = sqlx::query(INSERT_HISTORY).bind(migration.id()).execute(&mut *tx).await {
            if sqlstate(&err).as_deref() == Some(UNIQUE_VIOLATION) {
                return Err(BackendError::AlreadyRecorded {
                    id: migration.id().to_string(),
                });
            }
            return Err(err.into());
        }

        tx.commit().await?;
        Ok(())
    }
}
