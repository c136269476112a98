//! Migration and connection contracts.
//!
//! A [`Migration`] is generic over the connection type its backend hands it
//! while applying: Redis migrations render Lua, PostgreSQL migrations run SQL
//! inside the apply transaction, and so on. Text-based migrations (files,
//! embedded strings) only need the connection to implement [`Execer`], so a
//! single migration type works with every backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::BoxError;

/// Executes a raw textual payload (SQL, Lua, ...) against a connection.
#[async_trait]
pub trait Execer: Send {
    async fn exec(&mut self, payload: &str) -> Result<(), BoxError>;
}

/// A single, immutable schema change with a stable identifier.
///
/// Identifiers must be unique within a sequence, and sequences must only ever
/// grow by appending: the applied history is checked positionally against the
/// identifiers on every run.
#[async_trait]
pub trait Migration<C: ?Sized + Send>: Send + Sync {
    fn id(&self) -> &str;

    async fn migrate(&self, conn: &mut C) -> Result<(), BoxError>;
}

#[async_trait]
impl<C, M> Migration<C> for Box<M>
where
    C: ?Sized + Send,
    M: Migration<C> + ?Sized,
{
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn migrate(&self, conn: &mut C) -> Result<(), BoxError> {
        (**self).migrate(conn).await
    }
}

#[async_trait]
impl<C, M> Migration<C> for Arc<M>
where
    C: ?Sized + Send,
    M: Migration<C> + ?Sized,
{
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn migrate(&self, conn: &mut C) -> Result<(), BoxError> {
        (**self).migrate(conn).await
    }
}

#[async_trait]
impl<'a, C, M> Migration<C> for &'a M
where
    C: ?Sized + Send,
    M: Migration<C> + ?Sized,
{
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn migrate(&self, conn: &mut C) -> Result<(), BoxError> {
        (**self).migrate(conn).await
    }
}

/// Collects the identifiers of a migration sequence, in order.
pub fn identifiers<C, M>(migrations: &[M]) -> Vec<&str>
where
    C: ?Sized + Send,
    M: Migration<C>,
{
    migrations.iter().map(|migration| migration.id()).collect()
}
