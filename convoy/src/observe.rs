//! Progress reporting for migration runs.
//!
//! The engine never logs on its own; it emits [`MigrateEvent`]s into the
//! [`ProgressSink`] it was constructed with. [`NullSink`] is the default.

use std::fmt;
use std::time::Duration;

/// Structured progress notifications emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateEvent {
    LockAttempt { attempt: u32 },
    LockUnavailable { attempt: u32, error: String, retry_in: Duration },
    LockAcquired { attempts: u32 },
    HistoryRejected { error: String },
    UpToDate { applied: usize },
    Pending { applied: usize, pending: usize },
    Applying { id: String, position: usize, total: usize },
    Applied { id: String, elapsed: Duration },
    ApplyFailed { id: String, error: String },
    Releasing,
    UnlockFailed { error: String },
    Cancelled,
}

impl fmt::Display for MigrateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrateEvent::LockAttempt { attempt } => {
                write!(f, "Trying to acquire migration lock (attempt {attempt})")
            }
            MigrateEvent::LockUnavailable { error, retry_in, .. } => {
                write!(f, "Unable to acquire lock: {error}, retrying in {}ms", retry_in.as_millis())
            }
            MigrateEvent::LockAcquired { .. } => write!(f, "Lock acquired"),
            MigrateEvent::HistoryRejected { error } => write!(f, "Applied history rejected: {error}"),
            MigrateEvent::UpToDate { .. } => write!(f, "Database is up to date"),
            MigrateEvent::Pending { pending, .. } => write!(f, "Applying {pending} new migration(s)"),
            MigrateEvent::Applying { id, position, total } => {
                write!(f, "Applying migration {id} ({position}/{total})")
            }
            MigrateEvent::Applied { id, elapsed } => {
                write!(f, "Applied {id} in {}ms", elapsed.as_millis())
            }
            MigrateEvent::ApplyFailed { id, error } => write!(f, "Migration {id} failed: {error}"),
            MigrateEvent::Releasing => write!(f, "Releasing migration lock"),
            MigrateEvent::UnlockFailed { error } => write!(f, "Unlock error: {error}"),
            MigrateEvent::Cancelled => write!(f, "Migration run cancelled"),
        }
    }
}

/// Receives progress events from a [`Migrator`](crate::Migrator).
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: &MigrateEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: &MigrateEvent) {}
}

/// Forwards events to the `log` facade.
#[derive(Debug, Clone)]
pub struct LogSink {
    target: &'static str,
}

impl LogSink {
    pub const DEFAULT_TARGET: &'static str = "convoy::migrate";

    pub fn new() -> Self {
        Self {
            target: Self::DEFAULT_TARGET,
        }
    }

    pub fn with_target(target: &'static str) -> Self {
        Self { target }
    }

    fn level(event: &MigrateEvent) -> log::Level {
        match event {
            MigrateEvent::LockAttempt { .. } => log::Level::Debug,
            MigrateEvent::LockUnavailable { .. } | MigrateEvent::UnlockFailed { .. } | MigrateEvent::Cancelled => {
                log::Level::Warn
            }
            MigrateEvent::ApplyFailed { .. } | MigrateEvent::HistoryRejected { .. } => log::Level::Error,
            _ => log::Level::Info,
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for LogSink {
    fn event(&self, event: &MigrateEvent) {
        log::log!(target: self.target, Self::level(event), "[migrate] {event}");
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&MigrateEvent) + Send + Sync,
{
    fn event(&self, event: &MigrateEvent) {
        (self.0)(event)
    }
}
