//! In-process backend.
//!
//! A [`MemoryStore`] plays the role of the shared database; every
//! [`MemoryBackend`] created from it behaves like a separate process
//! competing for the same lock. Useful for tests and for embedding the
//! engine where the "schema" lives in memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;

use super::{AppliedMigration, Backend};
use crate::errors::{BackendError, BoxError};
use crate::migration::{Execer, Migration};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct StoreState {
    history: Vec<AppliedMigration>,
    statements: Vec<String>,
    lock_owner: Option<u64>,
}

/// Shared state standing in for a database.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new backend instance (a new "process") over this store.
    pub fn backend(&self) -> MemoryBackend {
        MemoryBackend {
            store: self.clone(),
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            holding: false,
        }
    }

    /// Records identifiers as applied without running anything.
    pub fn seed_history<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state();
        state
            .history
            .extend(ids.into_iter().map(|id| AppliedMigration::new(id, 0)));
    }

    pub fn history(&self) -> Vec<String> {
        self.state().history.iter().map(|record| record.id.clone()).collect()
    }

    pub fn records(&self) -> Vec<AppliedMigration> {
        self.state().history.clone()
    }

    /// Payloads committed by successful migrations, in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.state().lock_owner.is_some()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connection handed to migration bodies; buffers payloads until commit.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    statements: Vec<String>,
}

impl MemoryConnection {
    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

#[async_trait]
impl Execer for MemoryConnection {
    async fn exec(&mut self, payload: &str) -> Result<(), BoxError> {
        self.statements.push(payload.to_string());
        Ok(())
    }
}

/// One participant in the lock protocol over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryBackend {
    store: MemoryStore,
    owner: u64,
    holding: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryStore::new().backend()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Conn = MemoryConnection;

    async fn lock(&mut self) -> Result<(), BackendError> {
        if self.holding {
            return Err(BackendError::AlreadyLocked);
        }

        let mut state = self.store.state();
        if state.lock_owner.is_some() {
            return Err(BackendError::LockHeld);
        }
        state.lock_owner = Some(self.owner);
        self.holding = true;
        Ok(())
    }

    async fn unlock(&mut self) -> Result<(), BackendError> {
        if !self.holding {
            return Err(BackendError::NotLocked);
        }
        self.holding = false;

        let mut state = self.store.state();
        if state.lock_owner != Some(self.owner) {
            return Err(BackendError::LockLost);
        }
        state.lock_owner = None;
        Ok(())
    }

    async fn applied(&mut self) -> Result<Vec<String>, BackendError> {
        Ok(self.store.history())
    }

    async fn apply(&mut self, migration: &dyn Migration<MemoryConnection>) -> Result<(), BackendError> {
        if !self.holding {
            return Err(BackendError::NotLocked);
        }

        let id = migration.id().to_string();
        {
            let state = self.store.state();
            if state.lock_owner != Some(self.owner) {
                return Err(BackendError::LockLost);
            }
            if state.history.iter().any(|record| record.id == id) {
                return Err(BackendError::AlreadyRecorded { id });
            }
        }

        let started = Instant::now();
        let mut conn = MemoryConnection::default();
        migration.migrate(&mut conn).await.map_err(BackendError::Payload)?;

        let mut state = self.store.state();
        state.statements.append(&mut conn.statements);
        state
            .history
            .push(AppliedMigration::new(id, started.elapsed().as_millis() as u64));
        Ok(())
    }
}
