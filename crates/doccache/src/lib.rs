//! Distributed cache over a document database.
//!
//! This crate persists web-session state (or any opaque bytes) as one
//! document per key, with:
//! - Absolute and sliding expiration mapped onto the store's per-item TTL
//! - Sliding renewal on read under optimistic concurrency
//! - Lazy, exactly-once provisioning of the database and container
//! - A store abstraction ([`DocumentClient`], [`DocumentContainer`]) and an
//!   in-process implementation ([`MemoryStore`])
//!
//! # Example
//!
//! ```rust,ignore
//! use doccache::{CacheOptions, DocumentCache, EntryOptions, MemoryStore};
//!
//! let cache = DocumentCache::builder()
//!     .options(CacheOptions::new("sessions", "web").with_create_if_missing(true))
//!     .client(Arc::new(MemoryStore::new()))
//!     .build()?;
//!
//! cache
//!     .set("user-42", b"state", &EntryOptions::new().sliding(TimeDelta::minutes(20)))
//!     .await?;
//! let state = cache.get("user-42").await?;
//! ```

mod cache;
mod config;
mod diagnostics;
mod error;
mod memory;
mod policy;
mod session;
mod store;

pub use cache::{DocumentCache, DocumentCacheBuilder, MAX_SLIDING_RENEWAL_RETRIES, Readiness};
pub use config::{CacheOptions, DEFAULT_PARTITION_KEY_PATH, NO_DEFAULT_TTL, load_options};
pub use diagnostics::{DiagnosticsHandler, OperationDiagnostics, OperationOutcome, StoreOperation};
pub use error::{Error, Result};
pub use memory::{MemoryStats, MemoryStore};
pub use policy::{EntryOptions, absolute_deadline, build_session, renewal_ttl, time_to_live_seconds};
pub use session::StoredSession;
pub use store::{
    ClientFactory, ClientSource, ContainerSpec, ContainerStatus, CreateOutcome, DeleteOutcome,
    DocumentClient, DocumentContainer, ETag, IndexingPolicy, ReadOutcome, ReplaceOutcome,
    SharedClient, SharedContainer,
};
