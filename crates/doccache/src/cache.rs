//! Distributed cache over a document store.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::CacheOptions;
use crate::diagnostics::{
    DiagnosticsHandler, OperationDiagnostics, OperationOutcome, StoreOperation,
};
use crate::error::{Error, Result};
use crate::policy::{self, EntryOptions};
use crate::store::{
    ClientFactory, ClientSource, ContainerSpec, ContainerStatus, CreateOutcome, DeleteOutcome,
    ETag, IndexingPolicy, ReadOutcome, ReplaceOutcome, SharedClient, SharedContainer,
};

/// Re-reads allowed after a sliding renewal loses a replace race.
pub const MAX_SLIDING_RENEWAL_RETRIES: usize = 1;

/// Readiness of the backing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// No container handle yet; the next operation provisions.
    Uninitialized,
    /// One caller is provisioning; others wait on the gate.
    Initializing,
    /// Container handle cached; operations skip the gate.
    Ready,
}

enum ContainerState {
    Uninitialized,
    Initializing,
    Ready {
        client: SharedClient,
        container: SharedContainer,
        options: Arc<CacheOptions>,
    },
}

/// What an operation needs once the container is ready.
struct Connection {
    container: SharedContainer,
    options: Arc<CacheOptions>,
}

struct CacheInner {
    options: RwLock<Arc<CacheOptions>>,
    source: ClientSource,
    state: RwLock<ContainerState>,
    /// Serializes provisioning, reconfiguration and close.
    gate: Mutex<()>,
    diagnostics: Option<DiagnosticsHandler>,
}

impl CacheInner {
    fn ready(&self) -> Option<Connection> {
        match &*self.state.read() {
            ContainerState::Ready {
                container, options, ..
            } => Some(Connection {
                container: Arc::clone(container),
                options: Arc::clone(options),
            }),
            _ => None,
        }
    }

    /// Reset to `Uninitialized`, closing the client if the cache built it.
    fn release(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), ContainerState::Uninitialized);
        if let ContainerState::Ready { client, .. } = previous {
            if self.source.is_owned() {
                debug!("Closing document client built by the cache");
                client.close();
            }
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Puts the state back to `Uninitialized` if provisioning does not finish.
struct ProvisioningGuard<'a> {
    state: &'a RwLock<ContainerState>,
    armed: bool,
}

impl<'a> ProvisioningGuard<'a> {
    fn begin(state: &'a RwLock<ContainerState>) -> Self {
        *state.write() = ContainerState::Initializing;
        Self { state, armed: true }
    }

    fn complete(mut self, ready: ContainerState) {
        *self.state.write() = ready;
        self.armed = false;
    }
}

impl Drop for ProvisioningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.write() = ContainerState::Uninitialized;
        }
    }
}

/// Distributed cache storing one document per entry.
///
/// The cache provides:
/// - Lazy provisioning of the database and container, performed exactly once
///   even when many operations arrive concurrently
/// - Absolute and sliding expiration mapped onto the store's per-item TTL
/// - Sliding renewal on read, guarded by the entry's version tag
/// - Live reconfiguration, which forces the next operation to reprovision
///
/// Clones share the same connection state.
#[derive(Clone)]
pub struct DocumentCache {
    inner: Arc<CacheInner>,
}

impl DocumentCache {
    /// Start building a cache.
    pub fn builder() -> DocumentCacheBuilder {
        DocumentCacheBuilder::default()
    }

    /// Create a cache from options and a client source.
    pub fn new(options: CacheOptions, source: ClientSource) -> Result<Self> {
        Self::builder().options(options).source(source).build()
    }

    /// Current options.
    pub fn options(&self) -> Arc<CacheOptions> {
        Arc::clone(&self.inner.options.read())
    }

    /// Readiness of the backing container.
    pub fn readiness(&self) -> Readiness {
        match &*self.inner.state.read() {
            ContainerState::Uninitialized => Readiness::Uninitialized,
            ContainerState::Initializing => Readiness::Initializing,
            ContainerState::Ready { .. } => Readiness::Ready,
        }
    }

    /// Get an entry's content. Missing entries yield `None`.
    ///
    /// Reading a sliding entry renews its time to live.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_with_cancel(key, &CancellationToken::new()).await
    }

    /// [`get`](Self::get) honoring a cancellation signal.
    pub async fn get_with_cancel(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        check_cancelled(cancel)?;
        validate_key(key)?;

        let conn = self.connect(cancel).await?;
        self.read_and_renew(&conn, key, cancel).await
    }

    /// Renew a sliding entry's time to live without returning its content.
    ///
    /// Does nothing if the entry does not exist.
    pub async fn refresh(&self, key: &str) -> Result<()> {
        self.refresh_with_cancel(key, &CancellationToken::new()).await
    }

    /// [`refresh`](Self::refresh) honoring a cancellation signal.
    pub async fn refresh_with_cancel(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        validate_key(key)?;

        let conn = self.connect(cancel).await?;
        self.read_and_renew(&conn, key, cancel).await?;
        Ok(())
    }

    /// Remove an entry. Removing a missing entry succeeds.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.remove_with_cancel(key, &CancellationToken::new()).await
    }

    /// [`remove`](Self::remove) honoring a cancellation signal.
    pub async fn remove_with_cancel(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        validate_key(key)?;

        let conn = self.connect(cancel).await?;
        let outcome = self
            .round_trip(
                StoreOperation::DeleteItem,
                Some(key),
                Some(cancel),
                conn.container.delete_item(key),
            )
            .await?;

        if outcome == DeleteOutcome::NotFound {
            trace!(key = %key, "Entry already absent");
        }
        Ok(())
    }

    /// Store an entry, replacing any previous value for the key.
    pub async fn set(&self, key: &str, content: &[u8], options: &EntryOptions) -> Result<()> {
        self.set_with_cancel(key, content, options, &CancellationToken::new())
            .await
    }

    /// [`set`](Self::set) honoring a cancellation signal.
    pub async fn set_with_cancel(
        &self,
        key: &str,
        content: &[u8],
        options: &EntryOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        validate_key(key)?;

        let mut session = policy::build_session(key, content, options, Utc::now())?;
        let conn = self.connect(cancel).await?;
        session.partition_key_attribute = conn.options.partition_key_attribute.clone();

        self.round_trip(
            StoreOperation::UpsertItem,
            Some(key),
            Some(cancel),
            conn.container.upsert_item(key, &session),
        )
        .await?;

        trace!(
            key = %key,
            ttl = ?session.time_to_live,
            sliding = session.is_sliding(),
            "Entry stored"
        );
        Ok(())
    }

    /// Swap in new options.
    ///
    /// Waits for any in-flight provisioning, closes a client the cache built
    /// itself, and resets to [`Readiness::Uninitialized`] so the next
    /// operation provisions against the new options.
    pub async fn reconfigure(&self, options: CacheOptions) -> Result<()> {
        options.validate()?;

        let _gate = self.inner.gate.lock().await;
        self.inner.release();
        info!(
            database = %options.database_name,
            container = %options.container_name,
            "Cache reconfigured"
        );
        *self.inner.options.write() = Arc::new(options);
        Ok(())
    }

    /// Release the connection. A later operation reconnects.
    pub async fn close(&self) {
        let _gate = self.inner.gate.lock().await;
        self.inner.release();
    }

    /// Read an entry and, if it slides, renew its time to live.
    async fn read_and_renew(
        &self,
        conn: &Connection,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        let mut retries = 0;
        loop {
            let read = self
                .round_trip(
                    StoreOperation::ReadItem,
                    Some(key),
                    Some(cancel),
                    conn.container.read_item(key),
                )
                .await?;

            let (mut session, etag) = match read {
                ReadOutcome::Found { session, etag } => (session, etag),
                ReadOutcome::NotFound => return Ok(None),
            };

            if !session.is_sliding() {
                return Ok(Some(session.content));
            }

            session.time_to_live = policy::renewal_ttl(&session, Utc::now());
            session.partition_key_attribute = conn.options.partition_key_attribute.clone();

            let replaced = self
                .round_trip(
                    StoreOperation::ReplaceItem,
                    Some(key),
                    Some(cancel),
                    conn.container.replace_item(key, &session, &etag),
                )
                .await?;

            match replaced {
                ReplaceOutcome::Replaced(_) => {
                    trace!(key = %key, ttl = ?session.time_to_live, "Sliding expiration renewed");
                    return Ok(Some(session.content));
                }
                ReplaceOutcome::NotFound => {
                    debug!(key = %key, "Entry expired before its renewal");
                    return Ok(Some(session.content));
                }
                ReplaceOutcome::Conflict
                    if conn.options.retry_sliding_updates
                        && retries < MAX_SLIDING_RENEWAL_RETRIES =>
                {
                    retries += 1;
                    debug!(key = %key, attempt = retries, "Renewal conflict, re-reading entry");
                }
                ReplaceOutcome::Conflict => {
                    debug!(key = %key, "Renewal conflict, keeping previous time to live");
                    return Ok(Some(session.content));
                }
            }
        }
    }

    /// Return the ready container, provisioning it first if needed.
    async fn connect(&self, cancel: &CancellationToken) -> Result<Connection> {
        if let Some(conn) = self.inner.ready() {
            return Ok(conn);
        }

        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            gate = self.inner.gate.lock() => gate,
        };

        // Another caller may have finished provisioning while we waited.
        if let Some(conn) = self.inner.ready() {
            return Ok(conn);
        }

        let options = self.options();
        let guard = ProvisioningGuard::begin(&self.inner.state);
        let client = self.inner.source.client()?;

        let container = match self.provision(&client, &options).await {
            Ok(container) => container,
            Err(e) => {
                if self.inner.source.is_owned() {
                    client.close();
                }
                return Err(e);
            }
        };

        guard.complete(ContainerState::Ready {
            client,
            container: Arc::clone(&container),
            options: Arc::clone(&options),
        });
        debug!(
            database = %options.database_name,
            container = %options.container_name,
            "Cache container ready"
        );

        Ok(Connection { container, options })
    }

    async fn provision(
        &self,
        client: &SharedClient,
        options: &CacheOptions,
    ) -> Result<SharedContainer> {
        let database = options.database_name.as_str();
        let name = options.container_name.as_str();

        if options.create_if_missing {
            self.round_trip(
                StoreOperation::CreateDatabase,
                None,
                None,
                client.create_database_if_not_exists(database),
            )
            .await?;

            let status = self
                .round_trip(
                    StoreOperation::ReadContainer,
                    None,
                    None,
                    client.read_container(database, name),
                )
                .await?;

            if status == ContainerStatus::NotFound {
                let spec = ContainerSpec {
                    name: name.to_string(),
                    partition_key_path: options.partition_key_path(),
                    default_ttl: options.effective_default_ttl(),
                    throughput: options.container_throughput,
                    indexing_policy: IndexingPolicy::key_value(),
                };
                let created = self
                    .round_trip(
                        StoreOperation::CreateContainer,
                        None,
                        None,
                        client.create_container(database, &spec),
                    )
                    .await?;
                info!(
                    database = %database,
                    container = %name,
                    partition_key = %spec.partition_key_path,
                    default_ttl = spec.default_ttl,
                    outcome = ?created,
                    "Provisioned cache container"
                );
            }
        } else {
            let status = self
                .round_trip(
                    StoreOperation::ReadContainer,
                    None,
                    None,
                    client.read_container(database, name),
                )
                .await?;

            if status == ContainerStatus::NotFound {
                return Err(Error::ContainerNotFound {
                    database: database.to_string(),
                    container: name.to_string(),
                });
            }
        }

        Ok(client.container(database, name))
    }

    /// Run one store call, honoring cancellation and reporting diagnostics.
    async fn round_trip<T, F>(
        &self,
        operation: StoreOperation,
        key: Option<&str>,
        cancel: Option<&CancellationToken>,
        call: F,
    ) -> Result<T>
    where
        T: DiagnosticOutcome,
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = match cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    result = call => result,
                }
            }
            None => call.await,
        };
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(value) => value.outcome(),
            Err(Error::Cancelled) => OperationOutcome::Cancelled,
            Err(e) => OperationOutcome::Failed(e.to_string()),
        };

        match &outcome {
            OperationOutcome::Failed(error) => warn!(
                operation = %operation,
                key = ?key,
                error = %error,
                elapsed_ms = elapsed.as_millis() as u64,
                "Store operation failed"
            ),
            other => trace!(
                operation = %operation,
                key = ?key,
                outcome = ?other,
                elapsed_ms = elapsed.as_millis() as u64,
                "Store operation completed"
            ),
        }

        if let Some(handler) = &self.inner.diagnostics {
            handler(&OperationDiagnostics {
                operation,
                key: key.map(str::to_string),
                outcome,
                elapsed,
            });
        }

        result
    }
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("options", &self.options())
            .field("source", &self.inner.source)
            .field("readiness", &self.readiness())
            .finish()
    }
}

/// Builder for [`DocumentCache`].
#[derive(Default)]
pub struct DocumentCacheBuilder {
    options: Option<CacheOptions>,
    source: Option<ClientSource>,
    diagnostics: Option<DiagnosticsHandler>,
}

impl DocumentCacheBuilder {
    /// Set the cache options.
    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Set where the client comes from.
    pub fn source(mut self, source: ClientSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Use a caller-owned client.
    pub fn client(self, client: SharedClient) -> Self {
        self.source(ClientSource::Shared(client))
    }

    /// Build a client on first use; the cache owns and closes it.
    pub fn client_factory(self, factory: impl ClientFactory + 'static) -> Self {
        self.source(ClientSource::Factory(Arc::new(factory)))
    }

    /// Receive diagnostics for every store round-trip.
    pub fn diagnostics(
        mut self,
        handler: impl Fn(&OperationDiagnostics) + Send + Sync + 'static,
    ) -> Self {
        self.diagnostics = Some(Arc::new(handler));
        self
    }

    /// Validate the configuration and create the cache.
    ///
    /// Does not contact the store; provisioning happens on first use.
    pub fn build(self) -> Result<DocumentCache> {
        let options = self
            .options
            .ok_or_else(|| Error::Config("cache options are required".to_string()))?;
        options.validate()?;

        let source = self.source.ok_or_else(|| {
            Error::Config("a document client or client factory is required".to_string())
        })?;

        Ok(DocumentCache {
            inner: Arc::new(CacheInner {
                options: RwLock::new(Arc::new(options)),
                source,
                state: RwLock::new(ContainerState::Uninitialized),
                gate: Mutex::new(()),
                diagnostics: self.diagnostics,
            }),
        })
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        Err(Error::invalid_argument("key", "must not be empty"))
    } else {
        Ok(())
    }
}

/// Maps a store result onto the outcome reported in diagnostics.
trait DiagnosticOutcome {
    fn outcome(&self) -> OperationOutcome;
}

impl DiagnosticOutcome for ReadOutcome {
    fn outcome(&self) -> OperationOutcome {
        match self {
            ReadOutcome::Found { .. } => OperationOutcome::Success,
            ReadOutcome::NotFound => OperationOutcome::NotFound,
        }
    }
}

impl DiagnosticOutcome for ReplaceOutcome {
    fn outcome(&self) -> OperationOutcome {
        match self {
            ReplaceOutcome::Replaced(_) => OperationOutcome::Success,
            ReplaceOutcome::Conflict => OperationOutcome::Conflict,
            ReplaceOutcome::NotFound => OperationOutcome::NotFound,
        }
    }
}

impl DiagnosticOutcome for DeleteOutcome {
    fn outcome(&self) -> OperationOutcome {
        match self {
            DeleteOutcome::Deleted => OperationOutcome::Success,
            DeleteOutcome::NotFound => OperationOutcome::NotFound,
        }
    }
}

impl DiagnosticOutcome for ContainerStatus {
    fn outcome(&self) -> OperationOutcome {
        match self {
            ContainerStatus::Exists => OperationOutcome::Success,
            ContainerStatus::NotFound => OperationOutcome::NotFound,
        }
    }
}

impl DiagnosticOutcome for CreateOutcome {
    fn outcome(&self) -> OperationOutcome {
        OperationOutcome::Success
    }
}

impl DiagnosticOutcome for ETag {
    fn outcome(&self) -> OperationOutcome {
        OperationOutcome::Success
    }
}
