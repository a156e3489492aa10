use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stats_collector::modules::entity::TrackedEntity;
use stats_collector::modules::snapshot::{FetchedSnapshot, SkillStats, SnapshotData, StoredSnapshot};
use stats_collector::services::collector::{PersistenceError, SnapshotRepository};
use stats_collector::services::hiscore::{ClientError, StatsSource};
use stats_collector::services::queue::{
    JobBackend, JobHandle, JobKind, QueueError, QueuedJob, TaskQueue,
};
use stats_collector::services::scheduler::{ScheduleStore, StoreError};

/// Snapshot data with only the overall experience set
#[allow(dead_code)]
pub fn snapshot_with_xp(experience: i64) -> SnapshotData {
    SnapshotData {
        overall: SkillStats {
            rank: Some(50_000),
            level: Some(1500),
            experience: Some(experience),
        },
        ..Default::default()
    }
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Default)]
struct RepositoryState {
    entities: Vec<TrackedEntity>,
    snapshots: Vec<StoredSnapshot>,
}

/// In-memory stand-in for the MySQL repository
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<RepositoryState>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

#[allow(dead_code)]
impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(
        &self,
        key: &str,
        fetch_interval_secs: i64,
        last_fetched: Option<DateTime<Utc>>,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.entities.len() as i64 + 1;
        state.entities.push(TrackedEntity {
            id,
            external_key: key.to_string(),
            active: true,
            fetch_interval_secs,
            last_fetched,
        });
        id
    }

    pub fn set_active(&self, key: &str, active: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(entity) = state.entities.iter_mut().find(|e| e.external_key == key) {
            entity.active = active;
        }
    }

    pub fn entity(&self, key: &str) -> Option<TrackedEntity> {
        let state = self.state.lock().unwrap();
        state.entities.iter().find(|e| e.external_key == key).cloned()
    }

    pub fn seed_snapshot(&self, entity_id: i64, fetched_at: DateTime<Utc>, data: SnapshotData) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.snapshots.len() as i64 + 1;
        state.snapshots.push(StoredSnapshot {
            id,
            entity_id,
            fetched_at,
            data,
        });
        id
    }

    pub fn snapshot_count(&self, entity_id: i64) -> usize {
        let state = self.state.lock().unwrap();
        state.snapshots.iter().filter(|s| s.entity_id == entity_id).count()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), PersistenceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryRepository {
    async fn get_entity(&self, entity_key: &str) -> Result<Option<TrackedEntity>, PersistenceError> {
        self.check_reads()?;
        Ok(self.entity(entity_key))
    }

    async fn list_active_entities(&self) -> Result<Vec<TrackedEntity>, PersistenceError> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state.entities.iter().filter(|e| e.active).cloned().collect())
    }

    async fn get_latest_snapshot(
        &self,
        entity_id: i64,
    ) -> Result<Option<StoredSnapshot>, PersistenceError> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.entity_id == entity_id)
            .max_by_key(|s| (s.fetched_at, s.id))
            .cloned())
    }

    async fn record_fetch(
        &self,
        entity_id: i64,
        fetched_at: DateTime<Utc>,
        snapshot: Option<&SnapshotData>,
    ) -> Result<Option<i64>, PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("writes disabled".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        if let Some(entity) = state.entities.iter_mut().find(|e| e.id == entity_id) {
            if entity.last_fetched.map_or(true, |last| last <= fetched_at) {
                entity.last_fetched = Some(fetched_at);
            }
        }

        Ok(snapshot.map(|data| {
            let id = state.snapshots.len() as i64 + 1;
            state.snapshots.push(StoredSnapshot {
                id,
                entity_id,
                fetched_at,
                data: data.clone(),
            });
            id
        }))
    }
}

// =============================================================================
// Stats source
// =============================================================================

/// Replays scripted fetch results in order; the last one repeats
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<SnapshotData, ClientError>>>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, data: SnapshotData) {
        self.script.lock().unwrap().push_back(Ok(data));
    }

    pub fn push_err(&self, error: ClientError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn clone_result(result: &Result<SnapshotData, ClientError>) -> Result<SnapshotData, ClientError> {
    match result {
        Ok(data) => Ok(data.clone()),
        Err(ClientError::NotFoundUpstream(key)) => Err(ClientError::NotFoundUpstream(key.clone())),
        Err(ClientError::RateLimited) => Err(ClientError::RateLimited),
        Err(ClientError::Unavailable {
            attempts,
            last_error,
        }) => Err(ClientError::Unavailable {
            attempts: *attempts,
            last_error: last_error.clone(),
        }),
        Err(ClientError::Protocol(message)) => Err(ClientError::Protocol(message.clone())),
    }
}

#[async_trait]
impl StatsSource for ScriptedSource {
    async fn fetch(&self, _entity_key: &str) -> Result<FetchedSnapshot, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().map(clone_result)
            }
        };

        let data = next.unwrap_or_else(|| Err(ClientError::Protocol("script exhausted".to_string())))?;
        Ok(FetchedSnapshot::now(data))
    }
}

// =============================================================================
// Task queue
// =============================================================================

/// Records enqueued jobs and serves them back to a worker
#[derive(Default)]
pub struct RecordingQueue {
    enqueued: Mutex<Vec<JobKind>>,
    scheduled: Mutex<Vec<(QueuedJob, DateTime<Utc>)>>,
    buried: Mutex<Vec<(QueuedJob, String)>>,
    rejected_keys: Mutex<HashSet<String>>,
    reject_all: AtomicBool,
}

#[allow(dead_code)]
impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make enqueues of a fetch for `entity_key` fail
    pub fn reject_key(&self, entity_key: &str) {
        self.rejected_keys.lock().unwrap().insert(entity_key.to_string());
    }

    pub fn reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    pub fn enqueued(&self) -> Vec<JobKind> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn scheduled(&self) -> Vec<(QueuedJob, DateTime<Utc>)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn buried(&self) -> Vec<(QueuedJob, String)> {
        self.buried.lock().unwrap().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.enqueued()
            .iter()
            .filter(|kind| **kind == JobKind::DispatchBatch)
            .count()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, kind: JobKind) -> Result<JobHandle, QueueError> {
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(QueueError::Rejected("queue offline".to_string()));
        }
        if let JobKind::FetchEntity { entity_key } = &kind {
            if self.rejected_keys.lock().unwrap().contains(entity_key) {
                return Err(QueueError::Rejected(format!("refused {}", entity_key)));
            }
        }

        let job = QueuedJob::new(kind.clone());
        self.enqueued.lock().unwrap().push(kind);
        self.scheduled.lock().unwrap().push((job.clone(), job.enqueued_at));
        Ok(JobHandle { id: job.id })
    }
}

#[async_trait]
impl JobBackend for RecordingQueue {
    async fn schedule(&self, job: &QueuedJob, ready_at: DateTime<Utc>) -> Result<(), QueueError> {
        self.scheduled.lock().unwrap().push((job.clone(), ready_at));
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>, QueueError> {
        let mut scheduled = self.scheduled.lock().unwrap();
        let position = scheduled.iter().position(|(_, ready_at)| *ready_at <= now);
        Ok(position.map(|index| scheduled.remove(index).0))
    }

    async fn bury(&self, job: &QueuedJob, reason: &str) -> Result<(), QueueError> {
        self.buried.lock().unwrap().push((job.clone(), reason.to_string()));
        Ok(())
    }
}

// =============================================================================
// Schedule store
// =============================================================================

/// Shared in-process store; every operation is atomic under one mutex
#[derive(Default)]
pub struct InMemoryScheduleStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    unavailable: AtomicBool,
    closed: AtomicUsize,
}

#[allow(dead_code)]
impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        Self::live(&mut entries, key).map(|(value, _)| value.clone())
    }

    pub fn put_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), None));
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, (String, Option<Instant>)>,
        key: &str,
    ) -> Option<&'a (String, Option<Instant>)> {
        let expired = matches!(entries.get(key), Some((_, Some(expires_at))) if *expires_at <= Instant::now());
        if expired {
            entries.remove(key);
        }
        entries.get(key)
    }

    fn deadline(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|ttl| Instant::now() + ttl)
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), Self::deadline(ttl)));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Self::deadline(Some(ttl))));
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let owned = matches!(Self::live(&mut entries, key), Some((current, _)) if current == value);
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}

/// Wraps a schedule store and suspends before every operation so that
/// concurrent schedulers interleave between their reads and writes
#[allow(dead_code)]
pub struct InterleavingStore {
    inner: Arc<InMemoryScheduleStore>,
    delay: Duration,
    after_lock: Mutex<Option<(String, String)>>,
}

#[allow(dead_code)]
impl InterleavingStore {
    pub fn new(inner: Arc<InMemoryScheduleStore>) -> Self {
        Self {
            inner,
            delay: Duration::ZERO,
            after_lock: Mutex::new(None),
        }
    }

    /// Sleep for `delay` before each operation instead of yielding
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Write `value` under `key` right after the next lock is acquired
    pub fn write_after_lock(&self, key: &str, value: &str) {
        *self.after_lock.lock().unwrap() = Some((key.to_string(), value.to_string()));
    }

    async fn pause(&self) {
        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl ScheduleStore for InterleavingStore {
    async fn close(&self) {
        self.inner.close().await;
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.pause().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.pause().await;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.pause().await;
        let acquired = self.inner.set_if_absent(key, value, ttl).await?;
        if acquired {
            let pending = self.after_lock.lock().unwrap().take();
            if let Some((key, value)) = pending {
                self.inner.put_raw(&key, &value);
            }
        }
        Ok(acquired)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.pause().await;
        self.inner.delete_if_equals(key, value).await
    }
}
