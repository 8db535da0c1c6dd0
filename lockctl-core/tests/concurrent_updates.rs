//! Concurrency properties of the update protocol against the in-memory store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lockctl_core::{
    LockStrategy, MemoryStore, MemoryTransaction, NewRecord, ReadMode, RecordChanges, RecordId,
    RecordStore, RecordTransaction, RetryPolicy, StoreError, StoreResult, UpdateError,
    UpdateProtocol, VersionedRecord,
};
use parking_lot::Mutex;
use tokio::sync::Barrier;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Read { tx: usize, version: i64 },
    Commit { tx: usize, name: String },
}

/// Holds the first `remaining` reads at a barrier so that they all observe
/// the same version before anyone writes.
#[derive(Clone)]
struct Gate {
    barrier: Arc<Barrier>,
    remaining: Arc<AtomicUsize>,
}

impl Gate {
    fn new(parties: usize) -> Self {
        Self {
            barrier: Arc::new(Barrier::new(parties)),
            remaining: Arc::new(AtomicUsize::new(parties)),
        }
    }

    async fn pass(&self) {
        let claimed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if claimed {
            self.barrier.wait().await;
        }
    }
}

/// Store wrapper that logs reads and commits and can stall or fail them.
#[derive(Clone)]
struct Scripted {
    inner: MemoryStore,
    gate: Option<Gate>,
    pause_after_read: Option<Duration>,
    fail_commit: bool,
    log: Arc<Mutex<Vec<Event>>>,
    next_tx: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            gate: None,
            pause_after_read: None,
            fail_commit: false,
            log: Arc::default(),
            next_tx: Arc::default(),
        }
    }

    fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    fn pausing(mut self, pause: Duration) -> Self {
        self.pause_after_read = Some(pause);
        self
    }

    fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }
}

struct ScriptedTx {
    inner: MemoryTransaction,
    scripted: Scripted,
    tx: usize,
    last_write: Option<VersionedRecord>,
}

#[async_trait]
impl RecordStore for Scripted {
    type Tx = ScriptedTx;

    async fn begin(&self) -> StoreResult<ScriptedTx> {
        Ok(ScriptedTx {
            inner: self.inner.begin().await?,
            scripted: self.clone(),
            tx: self.next_tx.fetch_add(1, Ordering::SeqCst),
            last_write: None,
        })
    }
}

#[async_trait]
impl RecordTransaction for ScriptedTx {
    async fn read_by_id(
        &mut self,
        id: RecordId,
        mode: ReadMode,
    ) -> StoreResult<Option<VersionedRecord>> {
        let record = self.inner.read_by_id(id, mode).await?;
        if let Some(found) = &record {
            self.scripted.log.lock().push(Event::Read {
                tx: self.tx,
                version: found.version,
            });
        }
        if let Some(gate) = &self.scripted.gate {
            gate.pass().await;
        }
        if let Some(pause) = self.scripted.pause_after_read {
            tokio::time::sleep(pause).await;
        }
        Ok(record)
    }

    async fn update_if_version(
        &mut self,
        record: &VersionedRecord,
        expected_version: i64,
    ) -> StoreResult<u64> {
        let rows = self.inner.update_if_version(record, expected_version).await?;
        if rows == 1 {
            self.last_write = Some(record.clone());
        }
        Ok(rows)
    }

    async fn update(&mut self, record: &VersionedRecord) -> StoreResult<u64> {
        let rows = self.inner.update(record).await?;
        if rows == 1 {
            self.last_write = Some(record.clone());
        }
        Ok(rows)
    }

    async fn commit(self) -> StoreResult<()> {
        let ScriptedTx {
            inner,
            scripted,
            tx,
            last_write,
        } = self;
        if scripted.fail_commit {
            inner.rollback().await?;
            return Err(StoreError::backend("commit", "injected commit failure"));
        }
        // Logged while the row lock is still held.
        if let Some(record) = last_write {
            scripted.log.lock().push(Event::Commit {
                tx,
                name: record.name,
            });
        }
        inner.commit().await
    }

    async fn rollback(self) -> StoreResult<()> {
        self.inner.rollback().await
    }
}

fn record(id: RecordId, name: &str, version: i64) -> VersionedRecord {
    VersionedRecord {
        id,
        name: name.to_string(),
        description: None,
        version,
    }
}

#[tokio::test(start_paused = true)]
async fn optimistic_stale_writer_conflicts() {
    let store = MemoryStore::new();
    store.put(record(1, "A", 0));

    let gate = Gate::new(2);
    let fast = UpdateProtocol::new(Scripted::new(store.clone()).gated(gate.clone()));
    let slow = UpdateProtocol::new(
        Scripted::new(store.clone())
            .gated(gate)
            .pausing(Duration::from_millis(50)),
    );

    let b = tokio::spawn(async move {
        fast.update_record(1, &RecordChanges::new("B"), LockStrategy::Optimistic)
            .await
    });
    let c = tokio::spawn(async move {
        slow.update_record(1, &RecordChanges::new("C"), LockStrategy::Optimistic)
            .await
    });

    let b = b.await.unwrap().unwrap();
    assert_eq!(b, record(1, "B", 1));

    let err = c.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        UpdateError::OptimisticConflict {
            id: 1,
            expected_version: 0
        }
    ));
    assert_eq!(store.get(1), Some(record(1, "B", 1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn optimistic_overlapping_writers_exactly_one_wins() {
    const WRITERS: usize = 8;

    let store = MemoryStore::new();
    let id = store.insert(NewRecord::new("start")).id;
    let protocol = UpdateProtocol::new(Scripted::new(store.clone()).gated(Gate::new(WRITERS)));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let protocol = protocol.clone();
            tokio::spawn(async move {
                protocol
                    .update_record(
                        id,
                        &RecordChanges::new(format!("writer-{i}")),
                        LockStrategy::Optimistic,
                    )
                    .await
            })
        })
        .collect();

    let mut committed = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(updated) => committed.push(updated),
            Err(UpdateError::OptimisticConflict {
                expected_version, ..
            }) => {
                assert_eq!(expected_version, 0);
                conflicts += 1;
            }
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    assert_eq!(committed.len(), 1);
    assert_eq!(conflicts, WRITERS - 1);
    assert_eq!(committed[0].version, 1);
    assert_eq!(store.get(id), Some(committed[0].clone()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn optimistic_retry_lets_every_writer_commit() {
    const WRITERS: usize = 4;

    let store = MemoryStore::new();
    let id = store.insert(NewRecord::new("start")).id;
    let protocol = UpdateProtocol::new(Scripted::new(store.clone()).gated(Gate::new(WRITERS)));
    let policy = RetryPolicy::default()
        .with_max_attempts(WRITERS as u32 * 2)
        .with_delays(Duration::from_millis(1), Duration::from_millis(5));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let protocol = protocol.clone();
            tokio::spawn(async move {
                protocol
                    .update_with_retry(
                        id,
                        &RecordChanges::new(format!("writer-{i}")),
                        LockStrategy::Optimistic,
                        &policy,
                    )
                    .await
            })
        })
        .collect();

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap().expect("retry should commit").version);
    }
    versions.sort_unstable();

    assert_eq!(versions, [1, 2, 3, 4]);
    assert_eq!(store.get(id).unwrap().version, WRITERS as i64);
}

#[tokio::test(start_paused = true)]
async fn optimistic_without_retry_policy_surfaces_conflict() {
    let store = MemoryStore::new();
    store.put(record(1, "A", 0));
    let gate = Gate::new(2);
    let fast = UpdateProtocol::new(Scripted::new(store.clone()).gated(gate.clone()));
    let slow = UpdateProtocol::new(
        Scripted::new(store.clone())
            .gated(gate)
            .pausing(Duration::from_millis(10)),
    );

    let winner = tokio::spawn(async move {
        fast.update_record(1, &RecordChanges::new("B"), LockStrategy::Optimistic)
            .await
    });
    let loser = slow
        .update_with_retry(
            1,
            &RecordChanges::new("C"),
            LockStrategy::Optimistic,
            &RetryPolicy::none(),
        )
        .await;

    assert!(winner.await.unwrap().is_ok());
    assert!(loser.unwrap_err().is_retryable());
}

#[tokio::test(start_paused = true)]
async fn pessimistic_writers_serialize_on_row_lock() {
    let store = MemoryStore::new();
    store.put(record(2, "start", 5));
    let scripted = Scripted::new(store.clone()).pausing(Duration::from_millis(20));
    let protocol = UpdateProtocol::new(scripted.clone());

    let handles: Vec<_> = ["X", "Y"]
        .into_iter()
        .map(|name| {
            let protocol = protocol.clone();
            tokio::spawn(async move {
                protocol
                    .update_record(2, &RecordChanges::new(name), LockStrategy::Pessimistic)
                    .await
            })
        })
        .collect();

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap().expect("pessimistic update commits").version);
    }
    versions.sort_unstable();
    assert_eq!(versions, [6, 7]);

    let events = scripted.events();
    assert_eq!(events.len(), 4);
    let (first, second) = match (&events[0], &events[2]) {
        (Event::Read { tx: a, version: 5 }, Event::Read { tx: b, version: 6 }) => (*a, *b),
        other => panic!("reads interleaved or stale: {other:?}"),
    };
    assert!(matches!(&events[1], Event::Commit { tx, .. } if *tx == first));
    let last_name = match &events[3] {
        Event::Commit { tx, name } if *tx == second => name.clone(),
        other => panic!("second commit out of order: {other:?}"),
    };

    let stored = store.get(2).unwrap();
    assert_eq!(stored.version, 7);
    assert_eq!(stored.name, last_name);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pessimistic_many_writers_never_lose_updates() {
    const WRITERS: i64 = 6;

    let store = MemoryStore::new();
    let id = store.insert(NewRecord::new("start")).id;
    let protocol = UpdateProtocol::new(store.clone());

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let protocol = protocol.clone();
            tokio::spawn(async move {
                protocol
                    .update_record(
                        id,
                        &RecordChanges::new(format!("writer-{i}")),
                        LockStrategy::Pessimistic,
                    )
                    .await
            })
        })
        .collect();

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap().unwrap().version);
    }
    versions.sort_unstable();

    assert_eq!(versions, (1..=WRITERS).collect::<Vec<_>>());
    assert_eq!(store.get(id).unwrap().version, WRITERS);
}

#[tokio::test(start_paused = true)]
async fn lock_timeout_is_transaction_failure_and_leaves_record_unchanged() {
    let store = MemoryStore::new().with_lock_timeout(Duration::from_millis(100));
    let before = store.insert(NewRecord::new("held").with_description("untouched"));
    let protocol = UpdateProtocol::new(store.clone());

    let mut holder = store.begin().await.unwrap();
    holder
        .read_by_id(before.id, ReadMode::ForUpdate)
        .await
        .unwrap();

    for strategy in LockStrategy::all() {
        let err = protocol
            .update_record(before.id, &RecordChanges::new("blocked"), *strategy)
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                UpdateError::TransactionFailure {
                    source: StoreError::LockTimeout { .. },
                    ..
                }
            ),
            "{strategy}: {err}"
        );
        assert_eq!(store.get(before.id), Some(before.clone()));
    }

    holder.rollback().await.unwrap();

    let updated = protocol
        .update_record(before.id, &RecordChanges::new("free"), LockStrategy::Pessimistic)
        .await
        .unwrap();
    assert_eq!(updated.version, before.version + 1);
}

#[tokio::test(start_paused = true)]
async fn failed_commit_rolls_back_and_releases_lock() {
    let store = MemoryStore::new().with_lock_timeout(Duration::from_millis(100));
    let before = store.insert(NewRecord::new("A"));
    let failing = UpdateProtocol::new(Scripted::new(store.clone()).failing_commit());

    for strategy in LockStrategy::all() {
        let err = failing
            .update_record(before.id, &RecordChanges::new("lost"), *strategy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdateError::TransactionFailure {
                source: StoreError::Backend { .. },
                ..
            }
        ));
        assert_eq!(store.get(before.id), Some(before.clone()));
    }

    // No lock survives the failed attempts.
    let protocol = UpdateProtocol::new(store.clone());
    let updated = protocol
        .update_record(before.id, &RecordChanges::new("B"), LockStrategy::Pessimistic)
        .await
        .unwrap();
    assert_eq!(updated.version, 1);
}

#[tokio::test]
async fn not_found_performs_no_write() {
    let store = MemoryStore::new();
    let existing = store.insert(NewRecord::new("A"));
    let scripted = Scripted::new(store.clone());
    let protocol = UpdateProtocol::new(scripted.clone());

    for strategy in LockStrategy::all() {
        let err = protocol
            .update_record(existing.id + 1, &RecordChanges::new("x"), *strategy)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::NotFound { .. }));
    }

    assert!(scripted.events().is_empty());
    assert_eq!(store.get(existing.id), Some(existing));
    assert_eq!(store.len(), 1);
}
