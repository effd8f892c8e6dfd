//! Error types for document cache operations.

/// Error type for document cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied argument was rejected at the API boundary.
    #[error("invalid argument '{argument}': {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: &'static str,
    },

    /// The explicit absolute expiration was not in the future at write time.
    #[error("absolute expiration must be in the future")]
    InvalidExpiration,

    /// Auto-provisioning is disabled and the container does not exist.
    #[error("cannot find an existing container named '{container}' within database '{database}'")]
    ContainerNotFound { database: String, container: String },

    /// A stored document violated the entry contract.
    #[error("malformed cache entry: {0}")]
    MalformedEntry(String),

    /// Any store-level failure other than not-found or version conflict.
    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid or incomplete cache configuration.
    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// Failed to read a configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ConfigFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("failed to parse cache config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The operation observed its cancellation signal.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn invalid_argument(argument: &'static str, reason: &'static str) -> Self {
        Self::InvalidArgument { argument, reason }
    }

    /// Returns true for failures that may succeed if the caller tries again.
    ///
    /// The cache itself never retries these.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }

    /// Returns true for configuration mistakes (bad options, missing container).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigFile { .. }
                | Error::ConfigParse(_)
                | Error::ContainerNotFound { .. }
        )
    }
}

/// Result type for document cache operations.
pub type Result<T> = std::result::Result<T, Error>;
