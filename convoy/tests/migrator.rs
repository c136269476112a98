use std::num::NonZeroU32;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;

use convoy::backend::MemoryConnection;
use convoy::{
    Backend, BackendError, BoxError, EmbeddedMigration, Execer, FnSink, HistoryError, MemoryBackend, MemoryStore,
    MigrateError, MigrateEvent, Migration, Migrator, MigratorConfig,
};

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
    Sleep(Duration),
}

/// Programmatic migration that records each execution attempt.
struct TestMigration {
    id: &'static str,
    behavior: Behavior,
    executed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Migration<MemoryConnection> for TestMigration {
    fn id(&self) -> &str {
        self.id
    }

    async fn migrate(&self, conn: &mut MemoryConnection) -> Result<(), BoxError> {
        self.executed.lock().unwrap().push(self.id.to_string());
        match self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail => return Err("boom".into()),
            Behavior::Panic => panic!("migration {} panicked", self.id),
            Behavior::Sleep(duration) => tokio::time::sleep(duration).await,
        }
        conn.exec(&format!("-- {}", self.id)).await
    }
}

fn migrations(entries: &[(&'static str, Behavior)]) -> (Vec<TestMigration>, Arc<Mutex<Vec<String>>>) {
    let executed = Arc::new(Mutex::new(Vec::new()));
    let migrations = entries
        .iter()
        .map(|&(id, behavior)| TestMigration {
            id,
            behavior,
            executed: Arc::clone(&executed),
        })
        .collect();
    (migrations, executed)
}

fn succeeding(ids: &[&'static str]) -> Vec<TestMigration> {
    let entries: Vec<_> = ids.iter().map(|&id| (id, Behavior::Succeed)).collect();
    migrations(&entries).0
}

#[derive(Debug, Clone, Default)]
struct Calls {
    lock: u32,
    unlock: u32,
    apply: Vec<String>,
}

/// Wraps a memory backend to count calls and inject failures.
struct RecordingBackend {
    inner: MemoryBackend,
    calls: Arc<Mutex<Calls>>,
    lock_failures: u32,
    fail_unlock: bool,
    fail_history: bool,
}

impl RecordingBackend {
    fn new(store: &MemoryStore) -> Self {
        Self {
            inner: store.backend(),
            calls: Arc::default(),
            lock_failures: 0,
            fail_unlock: false,
            fail_history: false,
        }
    }

    fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    type Conn = MemoryConnection;

    async fn lock(&mut self) -> Result<(), BackendError> {
        self.calls.lock().unwrap().lock += 1;
        if self.lock_failures > 0 {
            self.lock_failures -= 1;
            return Err(BackendError::LockHeld);
        }
        self.inner.lock().await
    }

    async fn unlock(&mut self) -> Result<(), BackendError> {
        self.calls.lock().unwrap().unlock += 1;
        self.inner.unlock().await?;
        if self.fail_unlock {
            return Err(BackendError::other("connection reset"));
        }
        Ok(())
    }

    async fn applied(&mut self) -> Result<Vec<String>, BackendError> {
        if self.fail_history {
            return Err(BackendError::other("history unavailable"));
        }
        self.inner.applied().await
    }

    async fn apply(&mut self, migration: &dyn Migration<MemoryConnection>) -> Result<(), BackendError> {
        self.calls.lock().unwrap().apply.push(migration.id().to_string());
        self.inner.apply(migration).await
    }
}

fn collecting_sink() -> (Arc<FnSink<impl Fn(&MigrateEvent) + Send + Sync>>, Arc<Mutex<Vec<MigrateEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let sink = FnSink(move |event: &MigrateEvent| sink_events.lock().unwrap().push(event.clone()));
    (Arc::new(sink), events)
}

fn event_names(events: &[MigrateEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| match event {
            MigrateEvent::LockAttempt { .. } => "lock_attempt".to_string(),
            MigrateEvent::LockUnavailable { .. } => "lock_unavailable".to_string(),
            MigrateEvent::LockAcquired { .. } => "lock_acquired".to_string(),
            MigrateEvent::HistoryRejected { .. } => "history_rejected".to_string(),
            MigrateEvent::UpToDate { .. } => "up_to_date".to_string(),
            MigrateEvent::Pending { applied, pending } => format!("pending {applied}+{pending}"),
            MigrateEvent::Applying { id, .. } => format!("applying {id}"),
            MigrateEvent::Applied { id, .. } => format!("applied {id}"),
            MigrateEvent::ApplyFailed { id, .. } => format!("failed {id}"),
            MigrateEvent::Releasing => "releasing".to_string(),
            MigrateEvent::UnlockFailed { .. } => "unlock_failed".to_string(),
            MigrateEvent::Cancelled => "cancelled".to_string(),
        })
        .collect()
}

#[tokio::test]
async fn applies_pending_suffix_in_order() {
    let store = MemoryStore::new();
    store.seed_history(["A"]);
    let (sink, events) = collecting_sink();
    let mut migrator = Migrator::new(store.backend()).with_sink(sink);

    let stats = migrator.run(&succeeding(&["A", "B", "C"])).await.unwrap();

    assert_eq!(stats.applied, vec!["B", "C"]);
    assert_eq!(stats.already_applied, 1);
    assert_eq!(stats.lock_attempts, 1);
    assert_eq!(store.history(), vec!["A", "B", "C"]);
    assert_eq!(store.statements(), vec!["-- B", "-- C"]);
    assert!(!store.is_locked());

    assert_eq!(
        event_names(&events.lock().unwrap()),
        vec![
            "lock_attempt",
            "lock_acquired",
            "pending 1+2",
            "applying B",
            "applied B",
            "applying C",
            "applied C",
            "releasing",
        ]
    );
}

#[tokio::test]
async fn every_valid_prefix_leaves_exact_suffix_pending() {
    let ids = ["A", "B", "C", "D"];
    for applied in 0..=ids.len() {
        let store = MemoryStore::new();
        store.seed_history(ids[..applied].iter().copied());
        let mut migrator = Migrator::new(store.backend());

        let plan = migrator.plan(&succeeding(&ids)).await.unwrap();
        assert_eq!(plan.applied, applied);
        assert_eq!(plan.pending, ids.len() - applied);

        let stats = migrator.run(&succeeding(&ids)).await.unwrap();
        assert_eq!(stats.applied, ids[applied..].to_vec());
        assert_eq!(store.history(), ids.to_vec());
    }
}

#[tokio::test]
async fn mismatched_history_is_rejected_before_any_apply() {
    let store = MemoryStore::new();
    store.seed_history(["A", "X"]);
    let backend = RecordingBackend::new(&store);
    let calls = Arc::clone(&backend.calls);
    let (sink, events) = collecting_sink();
    let mut migrator = Migrator::new(backend).with_sink(sink);

    let err = migrator.run(&succeeding(&["A", "B"])).await.unwrap_err();

    match err {
        MigrateError::History(HistoryError::Mismatch {
            index,
            ref expected,
            ref found,
        }) => {
            assert_eq!(index, 1);
            assert_eq!(expected, "B");
            assert_eq!(found, "X");
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }
    assert_eq!(
        err.to_string(),
        "unknown migration encountered at position 1, expected B but was X"
    );

    let calls = calls.lock().unwrap().clone();
    assert!(calls.apply.is_empty());
    assert_eq!(calls.unlock, 1);
    assert_eq!(store.history(), vec!["A", "X"]);
    assert!(event_names(&events.lock().unwrap()).contains(&"history_rejected".to_string()));
}

#[tokio::test]
async fn history_longer_than_sequence_is_rejected() {
    let store = MemoryStore::new();
    store.seed_history(["A", "B"]);
    let backend = RecordingBackend::new(&store);
    let calls = Arc::clone(&backend.calls);
    let mut migrator = Migrator::new(backend);

    let err = migrator.run(&succeeding(&["A"])).await.unwrap_err();

    assert!(matches!(
        err,
        MigrateError::History(HistoryError::TooLong { applied: 2, known: 1 })
    ));
    assert!(calls.lock().unwrap().apply.is_empty());
    assert!(!store.is_locked());
}

#[tokio::test]
async fn duplicate_identifiers_are_rejected() {
    let store = MemoryStore::new();
    let mut migrator = Migrator::new(store.backend());

    let err = migrator.run(&succeeding(&["A", "B", "A"])).await.unwrap_err();

    assert!(matches!(
        err,
        MigrateError::History(HistoryError::DuplicateIdentifier { ref id, first: 0, second: 2 }) if id == "A"
    ));
    assert!(store.history().is_empty());
}

#[tokio::test]
async fn up_to_date_run_applies_nothing() {
    let store = MemoryStore::new();
    store.seed_history(["A", "B"]);
    let backend = RecordingBackend::new(&store);
    let calls = Arc::clone(&backend.calls);
    let (sink, events) = collecting_sink();
    let mut migrator = Migrator::new(backend).with_sink(sink);

    let stats = migrator.run(&succeeding(&["A", "B"])).await.unwrap();

    assert!(stats.applied.is_empty());
    assert_eq!(stats.already_applied, 2);
    assert!(calls.lock().unwrap().apply.is_empty());
    assert!(event_names(&events.lock().unwrap()).contains(&"up_to_date".to_string()));
}

#[tokio::test]
async fn empty_sequence_with_empty_history_succeeds() {
    let mut migrator = Migrator::new(MemoryBackend::new());
    let none: Vec<EmbeddedMigration> = Vec::new();

    let stats = migrator.run(&none).await.unwrap();
    assert_eq!(stats.migrations_applied(), 0);
    assert!(!migrator.backend().store().is_locked());
}

#[tokio::test]
async fn apply_failure_stops_the_run() {
    let store = MemoryStore::new();
    let backend = RecordingBackend::new(&store);
    let calls = Arc::clone(&backend.calls);
    let mut migrator = Migrator::new(backend);
    let (sequence, executed) = migrations(&[("A", Behavior::Succeed), ("B", Behavior::Fail), ("C", Behavior::Succeed)]);

    let err = migrator.run(&sequence).await.unwrap_err();

    assert_eq!(err.failed_migration(), Some("B"));
    assert_eq!(err.to_string(), "migrate failed for B: boom");
    assert_eq!(store.history(), vec!["A"]);
    assert_eq!(store.statements(), vec!["-- A"]);
    assert_eq!(*executed.lock().unwrap(), vec!["A", "B"]);

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.apply, vec!["A", "B"]);
    assert_eq!(calls.unlock, 1);
}

#[tokio::test]
async fn rerun_after_failure_resumes_at_failed_migration() {
    let store = MemoryStore::new();
    let (failing, _) = migrations(&[("A", Behavior::Succeed), ("B", Behavior::Fail)]);
    Migrator::new(store.backend()).run(&failing).await.unwrap_err();

    let stats = Migrator::new(store.backend())
        .run(&succeeding(&["A", "B", "C"]))
        .await
        .unwrap();

    assert_eq!(stats.applied, vec!["B", "C"]);
    assert_eq!(store.history(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn history_read_failure_releases_lock() {
    let store = MemoryStore::new();
    let mut backend = RecordingBackend::new(&store);
    backend.fail_history = true;
    let calls = Arc::clone(&backend.calls);
    let mut migrator = Migrator::new(backend);

    let err = migrator.run(&succeeding(&["A"])).await.unwrap_err();

    assert!(matches!(err, MigrateError::ReadHistory(_)));
    assert_eq!(calls.lock().unwrap().unlock, 1);
    assert!(!store.is_locked());
}

#[tokio::test]
async fn lock_is_released_exactly_once_per_outcome() {
    // success
    let store = MemoryStore::new();
    let mut migrator = Migrator::new(RecordingBackend::new(&store));
    migrator.run(&succeeding(&["A"])).await.unwrap();
    assert_eq!(migrator.backend().calls().unlock, 1);

    // reconciliation failure
    let store = MemoryStore::new();
    store.seed_history(["Z"]);
    let mut migrator = Migrator::new(RecordingBackend::new(&store));
    migrator.run(&succeeding(&["A"])).await.unwrap_err();
    assert_eq!(migrator.backend().calls().unlock, 1);

    // apply failure
    let store = MemoryStore::new();
    let mut migrator = Migrator::new(RecordingBackend::new(&store));
    let (failing, _) = migrations(&[("A", Behavior::Fail)]);
    migrator.run(&failing).await.unwrap_err();
    assert_eq!(migrator.backend().calls().unlock, 1);
}

#[tokio::test]
async fn unlock_failure_does_not_mask_the_outcome() {
    let store = MemoryStore::new();
    let mut backend = RecordingBackend::new(&store);
    backend.fail_unlock = true;
    let (sink, events) = collecting_sink();
    let mut migrator = Migrator::new(backend).with_sink(sink);

    let stats = migrator.run(&succeeding(&["A"])).await.unwrap();
    assert_eq!(stats.applied, vec!["A"]);
    assert_eq!(event_names(&events.lock().unwrap()).last().unwrap(), "unlock_failed");

    let (failing, _) = migrations(&[("A", Behavior::Succeed), ("B", Behavior::Fail)]);
    let err = migrator.run(&failing).await.unwrap_err();
    assert_eq!(err.failed_migration(), Some("B"));
}

#[tokio::test]
async fn panicking_migration_still_releases_lock() {
    let store = MemoryStore::new();
    let backend = RecordingBackend::new(&store);
    let calls = Arc::clone(&backend.calls);
    let mut migrator = Migrator::new(backend);
    let (sequence, _) = migrations(&[("A", Behavior::Succeed), ("B", Behavior::Panic)]);

    let outcome = AssertUnwindSafe(migrator.run(&sequence)).catch_unwind().await;

    assert!(outcome.is_err());
    assert_eq!(calls.lock().unwrap().unlock, 1);
    assert!(!store.is_locked());
    assert_eq!(store.history(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn retries_lock_at_configured_interval() {
    let store = MemoryStore::new();
    let mut backend = RecordingBackend::new(&store);
    backend.lock_failures = 2;
    let (sink, events) = collecting_sink();
    let mut migrator = Migrator::new(backend).with_sink(sink);

    let started = tokio::time::Instant::now();
    let stats = migrator.run(&succeeding(&["A"])).await.unwrap();
    let waited = started.elapsed();

    assert_eq!(stats.lock_attempts, 3);
    assert_eq!(migrator.backend().calls().lock, 3);
    assert!(waited >= Duration::from_secs(4), "waited {waited:?}");
    assert!(waited < Duration::from_secs(5), "waited {waited:?}");

    let names = event_names(&events.lock().unwrap());
    assert_eq!(names.iter().filter(|name| *name == "lock_unavailable").count(), 2);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_lock_attempts() {
    let store = MemoryStore::new();
    let mut backend = RecordingBackend::new(&store);
    backend.lock_failures = u32::MAX;
    let config = MigratorConfig::default()
        .with_lock_retry_interval(Duration::from_millis(100))
        .with_max_lock_attempts(NonZeroU32::new(3));
    let mut migrator = Migrator::new(backend).with_config(config);

    let err = migrator.run(&succeeding(&["A"])).await.unwrap_err();

    assert!(matches!(
        err,
        MigrateError::LockUnavailable {
            attempts: 3,
            last: BackendError::LockHeld
        }
    ));
    let calls = migrator.backend().calls();
    assert_eq!(calls.lock, 3);
    assert_eq!(calls.unlock, 0);
    assert!(calls.apply.is_empty());
}

#[tokio::test(start_paused = true)]
async fn waits_while_another_process_holds_the_lock() {
    let store = MemoryStore::new();
    let mut holder = store.backend();
    holder.lock().await.unwrap();

    let release = async {
        tokio::time::sleep(Duration::from_secs(7)).await;
        holder.unlock().await.unwrap();
    };
    let mut migrator = Migrator::new(store.backend());
    let sequence = succeeding(&["A"]);

    let ((), result) = tokio::join!(release, migrator.run(&sequence));
    let stats = result.unwrap();

    // attempts at t = 0, 2, 4, 6 fail; t = 8 succeeds
    assert_eq!(stats.lock_attempts, 5);
    assert_eq!(store.history(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_waiting_for_lock() {
    let store = MemoryStore::new();
    let mut holder = store.backend();
    holder.lock().await.unwrap();

    let (sink, events) = collecting_sink();
    let mut migrator = Migrator::new(store.backend()).with_sink(sink);

    let err = migrator
        .run_until(&succeeding(&["A"]), tokio::time::sleep(Duration::from_secs(5)))
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Cancelled { ref applied } if applied.is_empty()));
    assert!(store.history().is_empty());
    assert!(store.is_locked(), "the other process still owns the lock");

    let names = event_names(&events.lock().unwrap());
    assert_eq!(names.iter().filter(|name| *name == "lock_attempt").count(), 3);
    assert_eq!(names.last().unwrap(), "cancelled");
}

#[tokio::test]
async fn cancellation_between_migrations() {
    let store = MemoryStore::new();
    let backend = RecordingBackend::new(&store);
    let calls = Arc::clone(&backend.calls);
    let mut migrator = Migrator::new(backend);

    let (sequence, executed) = migrations(&[("A", Behavior::Succeed), ("B", Behavior::Succeed)]);
    let executed_for_shutdown = Arc::clone(&executed);
    let shutdown = futures::future::poll_fn(move |_| {
        if executed_for_shutdown.lock().unwrap().is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    });

    let err = migrator.run_until(&sequence, shutdown).await.unwrap_err();

    assert!(matches!(err, MigrateError::Cancelled { ref applied } if applied == &["A"]));
    assert_eq!(store.history(), vec!["A"]);
    assert_eq!(*executed.lock().unwrap(), vec!["A"]);
    assert_eq!(calls.lock().unwrap().unlock, 1);
    assert!(!store.is_locked());
}

#[tokio::test]
async fn shutdown_already_signalled_does_nothing() {
    let store = MemoryStore::new();
    let mut migrator = Migrator::new(RecordingBackend::new(&store));

    let err = migrator
        .run_until(&succeeding(&["A"]), std::future::ready(()))
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Cancelled { .. }));
    assert_eq!(migrator.backend().calls().lock, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_apply_each_migration_once() {
    let store = MemoryStore::new();
    let slow = |id| (id, Behavior::Sleep(Duration::from_secs(1)));
    let (first_sequence, _) = migrations(&[slow("A"), slow("B"), slow("C")]);
    let (second_sequence, _) = migrations(&[slow("A"), slow("B"), slow("C")]);

    let mut first = Migrator::new(store.backend());
    let mut second = Migrator::new(store.backend());

    let (first_result, second_result) = tokio::join!(first.run(&first_sequence), second.run(&second_sequence));
    let first_stats = first_result.unwrap();
    let second_stats = second_result.unwrap();

    assert_eq!(first_stats.migrations_applied() + second_stats.migrations_applied(), 3);
    assert!(first_stats.lock_attempts > 1 || second_stats.lock_attempts > 1);
    assert_eq!(store.history(), vec!["A", "B", "C"]);
    assert!(!store.is_locked());
}

#[tokio::test]
async fn plan_does_not_take_the_lock() {
    let store = MemoryStore::new();
    store.seed_history(["A"]);
    let mut migrator = Migrator::new(RecordingBackend::new(&store));

    let plan = migrator.plan(&succeeding(&["A", "B"])).await.unwrap();

    assert_eq!(plan.applied, 1);
    assert_eq!(plan.pending, 1);
    assert_eq!(migrator.backend().calls().lock, 0);
}

#[tokio::test]
async fn borrowed_backend_can_drive_a_run() {
    let mut backend = MemoryBackend::new();
    static SEQUENCE: &[EmbeddedMigration] = &[
        EmbeddedMigration::new("001_init.sql", "CREATE TABLE users (id int);"),
        EmbeddedMigration::new("002_index.sql", "CREATE INDEX users_id ON users (id);"),
    ];

    Migrator::new(&mut backend).run(SEQUENCE).await.unwrap();

    assert_eq!(backend.store().history(), vec!["001_init.sql", "002_index.sql"]);
    assert_eq!(backend.store().records()[1].id, "002_index.sql");
}

#[tokio::test(start_paused = true)]
async fn dropped_run_does_not_wedge_the_next_one() {
    let store = MemoryStore::new();
    let backend = RecordingBackend::new(&store);
    let calls = Arc::clone(&backend.calls);
    let mut migrator = Migrator::new(backend);
    let (slow, _) = migrations(&[("A", Behavior::Sleep(Duration::from_secs(10)))]);

    let timed_out = tokio::time::timeout(Duration::from_secs(1), migrator.run(&slow)).await;
    assert!(timed_out.is_err());
    assert!(store.is_locked(), "the abandoned run could not unlock");
    assert!(store.history().is_empty());

    let stats = migrator.run(&succeeding(&["A", "B"])).await.unwrap();

    assert_eq!(stats.applied, vec!["A", "B"]);
    assert_eq!(stats.lock_attempts, 1);
    assert_eq!(calls.lock().unwrap().unlock, 2);
    assert!(!store.is_locked());

    // other instances can take the lock afterwards
    let mut other = store.backend();
    other.lock().await.unwrap();
    other.unlock().await.unwrap();
}

#[tokio::test]
async fn externally_locked_backend_fails_without_retrying() {
    let store = MemoryStore::new();
    let mut backend = RecordingBackend::new(&store);
    backend.inner.lock().await.unwrap();
    let mut migrator = Migrator::new(backend);

    let err = migrator.run(&succeeding(&["A"])).await.unwrap_err();

    assert!(matches!(err, MigrateError::Lock(BackendError::AlreadyLocked)));
    let calls = migrator.backend().calls();
    assert_eq!(calls.lock, 1);
    assert_eq!(calls.unlock, 0);
    assert!(calls.apply.is_empty());
}
