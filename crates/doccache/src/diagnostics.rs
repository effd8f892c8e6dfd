//! Per-operation diagnostics for store round-trips.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A store round-trip performed by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    CreateDatabase,
    ReadContainer,
    CreateContainer,
    ReadItem,
    ReplaceItem,
    DeleteItem,
    UpsertItem,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::CreateDatabase => "create_database",
            StoreOperation::ReadContainer => "read_container",
            StoreOperation::CreateContainer => "create_container",
            StoreOperation::ReadItem => "read_item",
            StoreOperation::ReplaceItem => "replace_item",
            StoreOperation::DeleteItem => "delete_item",
            StoreOperation::UpsertItem => "upsert_item",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a round-trip ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    NotFound,
    Conflict,
    Failed(String),
    Cancelled,
}

/// Diagnostics captured for one round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDiagnostics {
    pub operation: StoreOperation,
    /// Item key, for item operations.
    pub key: Option<String>,
    pub outcome: OperationOutcome,
    pub elapsed: Duration,
}

/// Callback receiving diagnostics for every store round-trip.
pub type DiagnosticsHandler = Arc<dyn Fn(&OperationDiagnostics) + Send + Sync>;
