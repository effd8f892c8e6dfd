//! Document store abstraction used by the cache.
//!
//! The cache is decoupled from any particular database SDK. A
//! [`DocumentClient`] manages databases and containers; a
//! [`DocumentContainer`] performs per-item operations. Not-found and
//! version-conflict results are explicit outcome variants rather than
//! errors, so only genuine store failures travel through `Err`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::session::StoredSession;

/// Opaque version tag assigned by the store on every write.
pub type ETag = String;

/// Result of reading an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The item exists.
    Found { session: StoredSession, etag: ETag },
    /// No item with this key.
    NotFound,
}

/// Result of a conditional replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Replaced; carries the new version tag.
    Replaced(ETag),
    /// The item changed since the expected version was read.
    Conflict,
    /// The item no longer exists.
    NotFound,
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Existence of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Exists,
    NotFound,
}

/// Result of creating a database or container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Indexing policy for a created container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingPolicy {
    pub included_paths: Vec<String>,
    pub excluded_paths: Vec<String>,
}

impl IndexingPolicy {
    /// Index nothing; items are only ever addressed by key.
    pub fn key_value() -> Self {
        Self {
            included_paths: Vec::new(),
            excluded_paths: vec!["/*".to_string()],
        }
    }
}

/// Definition of a container to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub partition_key_path: String,
    /// Default TTL in seconds; `-1` lets items without `ttl` live forever.
    pub default_ttl: i64,
    pub throughput: Option<u32>,
    pub indexing_policy: IndexingPolicy,
}

/// Per-item operations on one container.
#[async_trait]
pub trait DocumentContainer: Send + Sync {
    /// Read an item by key.
    async fn read_item(&self, key: &str) -> Result<ReadOutcome>;

    /// Replace an item only if its current version matches `if_match`.
    async fn replace_item(
        &self,
        key: &str,
        session: &StoredSession,
        if_match: &str,
    ) -> Result<ReplaceOutcome>;

    /// Delete an item by key.
    async fn delete_item(&self, key: &str) -> Result<DeleteOutcome>;

    /// Insert or fully replace an item, unconditionally.
    async fn upsert_item(&self, key: &str, session: &StoredSession) -> Result<ETag>;
}

/// Shared handle to a container.
pub type SharedContainer = Arc<dyn DocumentContainer>;

/// Database and container management.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    /// Create the database unless it already exists.
    async fn create_database_if_not_exists(&self, database: &str) -> Result<CreateOutcome>;

    /// Check whether a container exists.
    async fn read_container(&self, database: &str, container: &str) -> Result<ContainerStatus>;

    /// Create a container.
    async fn create_container(&self, database: &str, spec: &ContainerSpec)
    -> Result<CreateOutcome>;

    /// Handle for item operations on a container.
    fn container(&self, database: &str, container: &str) -> SharedContainer;

    /// Release client resources. Called only for clients the cache built itself.
    fn close(&self) {}
}

/// Shared handle to a client.
pub type SharedClient = Arc<dyn DocumentClient>;

/// Builds a client when the cache provisions its container.
pub trait ClientFactory: Send + Sync {
    fn build(&self) -> Result<SharedClient>;
}

impl<F> ClientFactory for F
where
    F: Fn() -> Result<SharedClient> + Send + Sync,
{
    fn build(&self) -> Result<SharedClient> {
        self()
    }
}

/// Where the cache gets its client from.
#[derive(Clone)]
pub enum ClientSource {
    /// A caller-owned client. The cache never closes it.
    Shared(SharedClient),
    /// A factory; the cache owns and closes every client it builds.
    Factory(Arc<dyn ClientFactory>),
}

impl ClientSource {
    /// Whether clients from this source are owned by the cache.
    pub fn is_owned(&self) -> bool {
        matches!(self, ClientSource::Factory(_))
    }

    pub(crate) fn client(&self) -> Result<SharedClient> {
        match self {
            ClientSource::Shared(client) => Ok(Arc::clone(client)),
            ClientSource::Factory(factory) => factory.build(),
        }
    }
}

impl std::fmt::Debug for ClientSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientSource::Shared(_) => f.write_str("ClientSource::Shared"),
            ClientSource::Factory(_) => f.write_str("ClientSource::Factory"),
        }
    }
}
