//! Orchestration engine.
//!
//! A run acquires the backend lock (retrying on contention), reconciles the
//! applied history against the supplied migrations, then applies the pending
//! suffix one migration at a time, stopping at the first failure. The lock is
//! released before the run returns, whatever the outcome.

use std::future::Future;
use std::num::NonZeroU32;
use std::panic::AssertUnwindSafe;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;

use crate::backend::Backend;
use crate::errors::{BackendError, MigrateError};
use crate::migration::{Migration, identifiers};
use crate::observe::{MigrateEvent, NullSink, ProgressSink};
use crate::reconcile::{Plan, reconcile};

/// Tuning for the lock acquisition loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    /// Wait between failed lock attempts.
    pub lock_retry_interval: Duration,
    /// Give up after this many failed attempts; `None` retries forever.
    pub max_lock_attempts: Option<NonZeroU32>,
}

impl MigratorConfig {
    pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(2);

    pub fn with_lock_retry_interval(mut self, interval: Duration) -> Self {
        self.lock_retry_interval = interval;
        self
    }

    pub fn with_max_lock_attempts(mut self, attempts: Option<NonZeroU32>) -> Self {
        self.max_lock_attempts = attempts;
        self
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            lock_retry_interval: Self::DEFAULT_LOCK_RETRY_INTERVAL,
            max_lock_attempts: None,
        }
    }
}

/// Statistics from a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStats {
    /// Identifiers applied by this run, in order
    pub applied: Vec<String>,
    /// Migrations that were already applied before the run
    pub already_applied: usize,
    /// Lock attempts needed, including the successful one
    pub lock_attempts: u32,
    /// Wall-clock duration of the run in milliseconds
    pub total_time_ms: u64,
}

impl MigrationStats {
    pub fn migrations_applied(&self) -> usize {
        self.applied.len()
    }
}

/// Drives migration runs against one backend instance.
///
/// One `Migrator` must not run concurrently with itself; concurrent runs are
/// expected across processes, each with its own backend instance.
///
/// A run future dropped before completion (a timeout, a lost `select!`)
/// cannot release the lock. The migrator remembers the lock is still held
/// and releases it at the start of its next run.
pub struct Migrator<B: Backend> {
    backend: B,
    config: MigratorConfig,
    sink: Arc<dyn ProgressSink>,
    holding_lock: bool,
}

impl<B: Backend> Migrator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: MigratorConfig::default(),
            sink: Arc::new(NullSink),
            holding_lock: false,
        }
    }

    pub fn with_config(mut self, config: MigratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Applies every pending migration. See [`Migrator::run_until`].
    pub async fn run<M>(&mut self, migrations: &[M]) -> Result<MigrationStats, MigrateError>
    where
        M: Migration<B::Conn>,
    {
        self.run_until(migrations, std::future::pending()).await
    }

    /// Applies every pending migration unless `shutdown` completes first.
    ///
    /// `migrations` must be the full sequence, oldest first. Cancellation is
    /// observed while waiting for the lock and between migrations; a
    /// migration that has started applying is allowed to finish.
    pub async fn run_until<M, F>(&mut self, migrations: &[M], shutdown: F) -> Result<MigrationStats, MigrateError>
    where
        M: Migration<B::Conn>,
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let mut shutdown = pin!(shutdown);

        if self.holding_lock {
            self.release_lock().await;
        }

        let lock_attempts = self.acquire_lock(shutdown.as_mut()).await?;

        let outcome = AssertUnwindSafe(self.migrate_locked(migrations, shutdown.as_mut()))
            .catch_unwind()
            .await;

        self.release_lock().await;

        match outcome {
            Ok(result) => result.map(|mut stats| {
                stats.lock_attempts = lock_attempts;
                stats.total_time_ms = started.elapsed().as_millis() as u64;
                stats
            }),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Reconciles without taking the lock or applying anything.
    pub async fn plan<M>(&mut self, migrations: &[M]) -> Result<Plan, MigrateError>
    where
        M: Migration<B::Conn>,
    {
        let applied = self.backend.applied().await.map_err(MigrateError::ReadHistory)?;
        let known = identifiers::<B::Conn, M>(migrations);
        Ok(reconcile(&applied, &known)?)
    }

    async fn acquire_lock<F>(&mut self, mut shutdown: Pin<&mut F>) -> Result<u32, MigrateError>
    where
        F: Future<Output = ()>,
    {
        let mut attempt: u32 = 0;
        loop {
            if shutdown.as_mut().now_or_never().is_some() {
                return Err(self.cancelled(Vec::new()));
            }

            attempt = attempt.saturating_add(1);
            self.emit(MigrateEvent::LockAttempt { attempt });

            let err = match self.backend.lock().await {
                Ok(()) => {
                    self.holding_lock = true;
                    self.emit(MigrateEvent::LockAcquired { attempts: attempt });
                    return Ok(attempt);
                }
                Err(BackendError::AlreadyLocked) => return Err(MigrateError::Lock(BackendError::AlreadyLocked)),
                Err(err) => err,
            };

            if self.config.max_lock_attempts.is_some_and(|max| attempt >= max.get()) {
                return Err(MigrateError::LockUnavailable {
                    attempts: attempt,
                    last: err,
                });
            }

            let retry_in = self.config.lock_retry_interval;
            self.emit(MigrateEvent::LockUnavailable {
                attempt,
                error: err.to_string(),
                retry_in,
            });

            tokio::select! {
                _ = tokio::time::sleep(retry_in) => {}
                _ = shutdown.as_mut() => return Err(self.cancelled(Vec::new())),
            }
        }
    }

    async fn migrate_locked<M, F>(
        &mut self,
        migrations: &[M],
        mut shutdown: Pin<&mut F>,
    ) -> Result<MigrationStats, MigrateError>
    where
        M: Migration<B::Conn>,
        F: Future<Output = ()>,
    {
        let applied = self.backend.applied().await.map_err(MigrateError::ReadHistory)?;
        let known = identifiers::<B::Conn, M>(migrations);
        let plan = match reconcile(&applied, &known) {
            Ok(plan) => plan,
            Err(err) => {
                self.emit(MigrateEvent::HistoryRejected { error: err.to_string() });
                return Err(err.into());
            }
        };

        let mut stats = MigrationStats {
            already_applied: plan.applied,
            ..MigrationStats::default()
        };

        if plan.is_up_to_date() {
            self.emit(MigrateEvent::UpToDate { applied: plan.applied });
            return Ok(stats);
        }

        self.emit(MigrateEvent::Pending {
            applied: plan.applied,
            pending: plan.pending,
        });

        let pending = &migrations[plan.pending_range()];
        for (offset, migration) in pending.iter().enumerate() {
            if shutdown.as_mut().now_or_never().is_some() {
                return Err(self.cancelled(stats.applied));
            }

            let id = migration.id().to_string();
            self.emit(MigrateEvent::Applying {
                id: id.clone(),
                position: offset + 1,
                total: pending.len(),
            });

            let started = Instant::now();
            if let Err(source) = self.backend.apply(migration).await {
                self.emit(MigrateEvent::ApplyFailed {
                    id: id.clone(),
                    error: source.to_string(),
                });
                return Err(MigrateError::Apply { id, source });
            }

            self.emit(MigrateEvent::Applied {
                id: id.clone(),
                elapsed: started.elapsed(),
            });
            stats.applied.push(id);
        }

        Ok(stats)
    }

    async fn release_lock(&mut self) {
        self.holding_lock = false;
        self.emit(MigrateEvent::Releasing);
        if let Err(err) = self.backend.unlock().await {
            self.emit(MigrateEvent::UnlockFailed { error: err.to_string() });
        }
    }

    fn cancelled(&self, applied: Vec<String>) -> MigrateError {
        self.emit(MigrateEvent::Cancelled);
        MigrateError::Cancelled { applied }
    }

    fn emit(&self, event: MigrateEvent) {
        self.sink.event(&event);
    }
}
