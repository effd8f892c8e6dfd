//! In-process document store.
//!
//! [`MemoryStore`] implements both store traits over a map of databases and
//! containers. Items are kept as JSON documents, get a fresh `uuid` version
//! tag on every write, and expire according to their `ttl` (or the container
//! default) measured against a wall clock that tests can move forward.
//!
//! Useful for local development and tests: it counts every call, can inject
//! replace conflicts, can delay container reads, and can be switched into an
//! unavailable mode where every call fails.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::session::StoredSession;
use crate::store::{
    ContainerSpec, ContainerStatus, CreateOutcome, DeleteOutcome, DocumentClient,
    DocumentContainer, ETag, ReadOutcome, ReplaceOutcome, SharedContainer,
};

/// Call counters for a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub database_creates: usize,
    pub container_reads: usize,
    pub container_creates: usize,
    pub item_reads: usize,
    pub item_replaces: usize,
    pub item_deletes: usize,
    pub item_upserts: usize,
    pub closes: usize,
}

#[derive(Debug, Clone)]
struct StoredItem {
    doc: Value,
    etag: ETag,
    written_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ContainerData {
    spec: ContainerSpec,
    items: HashMap<String, StoredItem>,
}

#[derive(Debug, Default)]
struct StoreState {
    databases: HashMap<String, HashMap<String, ContainerData>>,
    stats: MemoryStats,
    /// Scripted conflicts per key; `Some` content simulates a concurrent writer.
    conflicts: HashMap<String, VecDeque<Option<Vec<u8>>>>,
    clock_offset: TimeDelta,
    unavailable: bool,
    read_container_delay: Option<Duration>,
}

impl StoreState {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.clock_offset
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            Err(Error::StoreUnavailable(
                "memory store is unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn container_mut(&mut self, database: &str, container: &str) -> Result<&mut ContainerData> {
        self.databases
            .get_mut(database)
            .and_then(|containers| containers.get_mut(container))
            .ok_or_else(|| {
                Error::StoreUnavailable(format!(
                    "container '{container}' does not exist in database '{database}'"
                ))
            })
    }

    /// Drop the item if its time to live has elapsed; return it otherwise.
    fn live_item(
        &mut self,
        database: &str,
        container: &str,
        key: &str,
    ) -> Result<Option<StoredItem>> {
        let now = self.now();
        let data = self.container_mut(database, container)?;
        let Some(item) = data.items.get(key) else {
            return Ok(None);
        };

        let ttl = item
            .doc
            .get("ttl")
            .and_then(Value::as_i64)
            .unwrap_or(data.spec.default_ttl);
        // A ttl too large to land on the calendar never expires.
        let expires_at = TimeDelta::try_seconds(ttl.max(0))
            .and_then(|lifetime| item.written_at.checked_add_signed(lifetime));
        let expired = ttl != -1 && expires_at.is_some_and(|at| now >= at);
        if expired {
            data.items.remove(key);
            return Ok(None);
        }
        Ok(Some(item.clone()))
    }
}

/// In-process document store.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a database and container.
    pub fn with_container(database: &str, spec: ContainerSpec) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            state
                .databases
                .entry(database.to_string())
                .or_default()
                .insert(
                    spec.name.clone(),
                    ContainerData {
                        spec,
                        items: HashMap::new(),
                    },
                );
        }
        store
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats
    }

    /// Definition of an existing container.
    pub fn container_spec(&self, database: &str, container: &str) -> Option<ContainerSpec> {
        let state = self.state.lock();
        state
            .databases
            .get(database)?
            .get(container)
            .map(|data| data.spec.clone())
    }

    /// Raw JSON document of a live item, as the store holds it.
    pub fn document(&self, database: &str, container: &str, key: &str) -> Option<Value> {
        let mut state = self.state.lock();
        state
            .live_item(database, container, key)
            .ok()
            .flatten()
            .map(|item| item.doc)
    }

    /// Make the next replace of `key` fail with a version conflict.
    ///
    /// With `concurrent_write`, the item's content is overwritten (with a new
    /// version tag) before the conflict is reported.
    pub fn inject_conflict(&self, key: &str, concurrent_write: Option<Vec<u8>>) {
        self.state
            .lock()
            .conflicts
            .entry(key.to_string())
            .or_default()
            .push_back(concurrent_write);
    }

    /// Move the store's clock forward.
    pub fn advance(&self, by: TimeDelta) {
        self.state.lock().clock_offset += by;
    }

    /// Fail every call with `StoreUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Delay container reads, widening provisioning races.
    pub fn set_read_container_delay(&self, delay: Duration) {
        self.state.lock().read_container_delay = Some(delay);
    }
}

#[async_trait]
impl DocumentClient for MemoryStore {
    async fn create_database_if_not_exists(&self, database: &str) -> Result<CreateOutcome> {
        let mut state = self.state.lock();
        state.stats.database_creates += 1;
        state.check_available()?;

        if state.databases.contains_key(database) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.databases.insert(database.to_string(), HashMap::new());
        Ok(CreateOutcome::Created)
    }

    async fn read_container(&self, database: &str, container: &str) -> Result<ContainerStatus> {
        let delay = {
            let mut state = self.state.lock();
            state.stats.container_reads += 1;
            state.read_container_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        state.check_available()?;
        let exists = state
            .databases
            .get(database)
            .is_some_and(|containers| containers.contains_key(container));
        Ok(if exists {
            ContainerStatus::Exists
        } else {
            ContainerStatus::NotFound
        })
    }

    async fn create_container(
        &self,
        database: &str,
        spec: &ContainerSpec,
    ) -> Result<CreateOutcome> {
        let mut state = self.state.lock();
        state.stats.container_creates += 1;
        state.check_available()?;

        let containers = state.databases.get_mut(database).ok_or_else(|| {
            Error::StoreUnavailable(format!("database '{database}' does not exist"))
        })?;
        if containers.contains_key(&spec.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        containers.insert(
            spec.name.clone(),
            ContainerData {
                spec: spec.clone(),
                items: HashMap::new(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    fn container(&self, database: &str, container: &str) -> SharedContainer {
        Arc::new(MemoryContainer {
            state: Arc::clone(&self.state),
            database: database.to_string(),
            container: container.to_string(),
        })
    }

    fn close(&self) {
        self.state.lock().stats.closes += 1;
    }
}

/// Item operations on one container of a [`MemoryStore`].
struct MemoryContainer {
    state: Arc<Mutex<StoreState>>,
    database: String,
    container: String,
}

impl MemoryContainer {
    fn write(&self, state: &mut StoreState, key: &str, doc: Value) -> Result<ETag> {
        let etag = uuid::Uuid::new_v4().to_string();
        let now = state.now();
        let data = state.container_mut(&self.database, &self.container)?;
        data.items.insert(
            key.to_string(),
            StoredItem {
                doc,
                etag: etag.clone(),
                written_at: now,
            },
        );
        Ok(etag)
    }
}

#[async_trait]
impl DocumentContainer for MemoryContainer {
    async fn read_item(&self, key: &str) -> Result<ReadOutcome> {
        let mut state = self.state.lock();
        state.stats.item_reads += 1;
        state.check_available()?;

        match state.live_item(&self.database, &self.container, key)? {
            Some(item) => Ok(ReadOutcome::Found {
                session: StoredSession::from_json(&item.doc)?,
                etag: item.etag,
            }),
            None => Ok(ReadOutcome::NotFound),
        }
    }

    async fn replace_item(
        &self,
        key: &str,
        session: &StoredSession,
        if_match: &str,
    ) -> Result<ReplaceOutcome> {
        let mut state = self.state.lock();
        state.stats.item_replaces += 1;
        state.check_available()?;

        let Some(current) = state.live_item(&self.database, &self.container, key)? else {
            return Ok(ReplaceOutcome::NotFound);
        };

        let injected = state
            .conflicts
            .get_mut(key)
            .and_then(|queue| queue.pop_front());
        if let Some(concurrent_write) = injected {
            if let Some(content) = concurrent_write {
                let mut other = StoredSession::from_json(&current.doc)?;
                other.content = content;
                self.write(&mut state, key, other.to_json())?;
            }
            return Ok(ReplaceOutcome::Conflict);
        }

        if current.etag != if_match {
            return Ok(ReplaceOutcome::Conflict);
        }
        let etag = self.write(&mut state, key, session.to_json())?;
        Ok(ReplaceOutcome::Replaced(etag))
    }

    async fn delete_item(&self, key: &str) -> Result<DeleteOutcome> {
        let mut state = self.state.lock();
        state.stats.item_deletes += 1;
        state.check_available()?;

        if state.live_item(&self.database, &self.container, key)?.is_none() {
            return Ok(DeleteOutcome::NotFound);
        }
        state
            .container_mut(&self.database, &self.container)?
            .items
            .remove(key);
        Ok(DeleteOutcome::Deleted)
    }

    async fn upsert_item(&self, key: &str, session: &StoredSession) -> Result<ETag> {
        let mut state = self.state.lock();
        state.stats.item_upserts += 1;
        state.check_available()?;

        self.write(&mut state, key, session.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IndexingPolicy;

    fn spec(default_ttl: i64) -> ContainerSpec {
        ContainerSpec {
            name: "sessions".to_string(),
            partition_key_path: "/id".to_string(),
            default_ttl,
            throughput: None,
            indexing_policy: IndexingPolicy::key_value(),
        }
    }

    fn session(key: &str, ttl: Option<i64>) -> StoredSession {
        StoredSession {
            time_to_live: ttl,
            ..StoredSession::new(key, b"payload".to_vec())
        }
    }

    #[tokio::test]
    async fn test_upsert_read_delete() {
        let store = MemoryStore::with_container("db", spec(-1));
        let container = store.container("db", "sessions");

        container.upsert_item("k", &session("k", None)).await.unwrap();
        match container.read_item("k").await.unwrap() {
            ReadOutcome::Found { session, .. } => assert_eq!(session.content, b"payload"),
            ReadOutcome::NotFound => panic!("expected item"),
        }

        assert_eq!(
            container.delete_item("k").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            container.delete_item("k").await.unwrap(),
            DeleteOutcome::NotFound
        );
        assert_eq!(container.read_item("k").await.unwrap(), ReadOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_replace_requires_matching_etag() {
        let store = MemoryStore::with_container("db", spec(-1));
        let container = store.container("db", "sessions");

        let etag = container.upsert_item("k", &session("k", None)).await.unwrap();
        assert_eq!(
            container
                .replace_item("k", &session("k", None), "stale")
                .await
                .unwrap(),
            ReplaceOutcome::Conflict
        );
        assert!(matches!(
            container
                .replace_item("k", &session("k", None), &etag)
                .await
                .unwrap(),
            ReplaceOutcome::Replaced(new_etag) if new_etag != etag
        ));
        assert_eq!(
            container
                .replace_item("missing", &session("missing", None), &etag)
                .await
                .unwrap(),
            ReplaceOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_oversized_ttl_never_expires() {
        let store = MemoryStore::with_container("db", spec(-1));
        let container = store.container("db", "sessions");

        container.upsert_item("huge", &session("huge", Some(i64::MAX))).await.unwrap();
        container
            .upsert_item("far", &session("far", Some(365 * 1_000_000 * 86_400)))
            .await
            .unwrap();
        store.advance(TimeDelta::days(365));

        for key in ["huge", "far"] {
            assert!(matches!(
                container.read_item(key).await.unwrap(),
                ReadOutcome::Found { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_items_expire_by_ttl() {
        let store = MemoryStore::with_container("db", spec(-1));
        let container = store.container("db", "sessions");

        container.upsert_item("short", &session("short", Some(5))).await.unwrap();
        container.upsert_item("forever", &session("forever", None)).await.unwrap();
        container.upsert_item("zero", &session("zero", Some(0))).await.unwrap();

        assert_eq!(container.read_item("zero").await.unwrap(), ReadOutcome::NotFound);

        store.advance(TimeDelta::seconds(6));
        assert_eq!(container.read_item("short").await.unwrap(), ReadOutcome::NotFound);
        assert!(matches!(
            container.read_item("forever").await.unwrap(),
            ReadOutcome::Found { .. }
        ));
    }

    #[tokio::test]
    async fn test_container_default_ttl_applies() {
        let store = MemoryStore::with_container("db", spec(10));
        let container = store.container("db", "sessions");

        container.upsert_item("k", &session("k", None)).await.unwrap();
        store.advance(TimeDelta::seconds(11));
        assert_eq!(container.read_item("k").await.unwrap(), ReadOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_injected_conflict_with_concurrent_write() {
        let store = MemoryStore::with_container("db", spec(-1));
        let container = store.container("db", "sessions");

        let etag = container.upsert_item("k", &session("k", None)).await.unwrap();
        store.inject_conflict("k", Some(b"other".to_vec()));

        assert_eq!(
            container
                .replace_item("k", &session("k", None), &etag)
                .await
                .unwrap(),
            ReplaceOutcome::Conflict
        );
        let doc = store.document("db", "sessions", "k").unwrap();
        assert_eq!(StoredSession::from_json(&doc).unwrap().content, b"other");
    }

    #[tokio::test]
    async fn test_provisioning_calls() {
        let store = MemoryStore::new();

        assert_eq!(
            store.create_database_if_not_exists("db").await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            store.create_database_if_not_exists("db").await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert_eq!(
            store.read_container("db", "sessions").await.unwrap(),
            ContainerStatus::NotFound
        );
        assert_eq!(
            store.create_container("db", &spec(-1)).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            store.read_container("db", "sessions").await.unwrap(),
            ContainerStatus::Exists
        );
        assert_eq!(store.stats().container_creates, 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::with_container("db", spec(-1));
        store.set_unavailable(true);

        let err = store.container("db", "sessions").read_item("k").await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
