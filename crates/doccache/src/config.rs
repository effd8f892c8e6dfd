//! Configuration for the document cache.
//!
//! Options can be built in code with the `with_*` setters or loaded from TOML:
//!
//! ```toml
//! [cache]
//! database_name = "sessions"
//! container_name = "web"
//! create_if_missing = true
//! partition_key_attribute = "pk"
//! default_ttl_ms = 3600000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Partition key path used when no custom attribute is configured.
pub const DEFAULT_PARTITION_KEY_PATH: &str = "/id";

/// Container default TTL meaning "items expire only through their own ttl".
pub const NO_DEFAULT_TTL: i64 = -1;

/// Configuration for the document cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Database holding the cache container.
    pub database_name: String,

    /// Container storing one document per cache entry.
    pub container_name: String,

    /// Create the database and container on first use when missing.
    pub create_if_missing: bool,

    /// Name of the partition key property when it is not `id`.
    pub partition_key_attribute: Option<String>,

    /// Provisioned throughput used when the container is created.
    pub container_throughput: Option<u32>,

    /// Default time to live for a created container, in milliseconds.
    pub default_ttl_ms: Option<i64>,

    /// Re-read and retry once when a sliding renewal loses a replace race.
    pub retry_sliding_updates: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            database_name: String::new(),
            container_name: String::new(),
            create_if_missing: false,
            partition_key_attribute: None,
            container_throughput: None,
            default_ttl_ms: None,
            retry_sliding_updates: true,
        }
    }
}

impl CacheOptions {
    /// Create options for the given database and container.
    pub fn new(database_name: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            container_name: container_name.into(),
            ..Self::default()
        }
    }

    /// Parse from a TOML string.
    ///
    /// Accepts either a document with a `[cache]` table or the bare option keys.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut table: toml::Table = toml_str.parse()?;
        let section = match table.remove("cache") {
            Some(toml::Value::Table(cache)) => cache,
            Some(_) => return Err(Error::Config("'cache' must be a table".to_string())),
            None => table,
        };
        Ok(toml::Value::Table(section).try_into()?)
    }

    /// Enable or disable provisioning of missing database and container.
    pub fn with_create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    /// Use a custom partition key property.
    pub fn with_partition_key_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.partition_key_attribute = Some(attribute.into());
        self
    }

    /// Set the throughput used when creating the container.
    pub fn with_container_throughput(mut self, throughput: u32) -> Self {
        self.container_throughput = Some(throughput);
        self
    }

    /// Set the default container TTL in milliseconds.
    pub fn with_default_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.default_ttl_ms = Some(ttl_ms);
        self
    }

    /// Enable or disable the retry after a lost sliding renewal race.
    pub fn with_retry_sliding_updates(mut self, enabled: bool) -> Self {
        self.retry_sliding_updates = enabled;
        self
    }

    /// Check the options required to construct a cache.
    pub fn validate(&self) -> Result<()> {
        if self.database_name.trim().is_empty() {
            return Err(Error::Config("database_name is required".to_string()));
        }
        if self.container_name.trim().is_empty() {
            return Err(Error::Config("container_name is required".to_string()));
        }
        Ok(())
    }

    /// The configured custom partition attribute, ignoring blank values.
    pub fn custom_partition_attribute(&self) -> Option<&str> {
        self.partition_key_attribute
            .as_deref()
            .map(str::trim)
            .filter(|attr| !attr.is_empty())
    }

    /// Partition key path for a created container.
    pub fn partition_key_path(&self) -> String {
        match self.custom_partition_attribute() {
            Some(attr) => format!("/{attr}"),
            None => DEFAULT_PARTITION_KEY_PATH.to_string(),
        }
    }

    /// Default TTL in seconds for a created container.
    ///
    /// Non-positive or absent values map to [`NO_DEFAULT_TTL`]; a sub-second
    /// remainder rounds up so a positive setting never becomes zero.
    pub fn effective_default_ttl(&self) -> i64 {
        match self.default_ttl_ms {
            Some(ms) if ms > 0 => ms / 1000 + i64::from(ms % 1000 != 0),
            _ => NO_DEFAULT_TTL,
        }
    }
}

/// Load cache options from a TOML file.
pub fn load_options(path: impl AsRef<Path>) -> Result<CacheOptions> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
        path: path.display().to_string(),
        source,
    })?;
    CacheOptions::from_toml(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CacheOptions::default();
        assert!(!options.create_if_missing);
        assert!(options.retry_sliding_updates);
        assert_eq!(options.partition_key_path(), "/id");
        assert_eq!(options.effective_default_ttl(), NO_DEFAULT_TTL);
    }

    #[test]
    fn test_validate_requires_names() {
        assert!(matches!(
            CacheOptions::default().validate(),
            Err(Error::Config(_))
        ));
        assert!(CacheOptions::new("db", "").validate().is_err());
        assert!(CacheOptions::new("  ", "c").validate().is_err());
        assert!(CacheOptions::new("db", "c").validate().is_ok());
    }

    #[test]
    fn test_partition_key_path() {
        let options = CacheOptions::new("db", "c").with_partition_key_attribute("pk");
        assert_eq!(options.partition_key_path(), "/pk");

        let blank = CacheOptions::new("db", "c").with_partition_key_attribute("   ");
        assert_eq!(blank.custom_partition_attribute(), None);
        assert_eq!(blank.partition_key_path(), "/id");
    }

    #[test]
    fn test_effective_default_ttl() {
        let ttl = |ms| CacheOptions::new("db", "c").with_default_ttl_ms(ms);
        assert_eq!(ttl(60_000).effective_default_ttl(), 60);
        assert_eq!(ttl(1_500).effective_default_ttl(), 2);
        assert_eq!(ttl(1).effective_default_ttl(), 1);
        assert_eq!(ttl(0).effective_default_ttl(), NO_DEFAULT_TTL);
        assert_eq!(ttl(-5).effective_default_ttl(), NO_DEFAULT_TTL);
        assert_eq!(ttl(i64::MAX).effective_default_ttl(), i64::MAX / 1000 + 1);
    }

    #[test]
    fn test_parse_cache_section() {
        let options = CacheOptions::from_toml(
            r#"
            [cache]
            database_name = "sessions"
            container_name = "web"
            create_if_missing = true
            partition_key_attribute = "pk"
            container_throughput = 400
            retry_sliding_updates = false
            "#,
        )
        .unwrap();

        assert_eq!(options.database_name, "sessions");
        assert_eq!(options.container_name, "web");
        assert!(options.create_if_missing);
        assert_eq!(options.partition_key_attribute.as_deref(), Some("pk"));
        assert_eq!(options.container_throughput, Some(400));
        assert!(!options.retry_sliding_updates);
    }

    #[test]
    fn test_parse_bare_keys() {
        let options = CacheOptions::from_toml(
            r#"
            database_name = "db"
            container_name = "c"
            "#,
        )
        .unwrap();
        assert_eq!(options, CacheOptions::new("db", "c"));
    }

    #[test]
    fn test_parse_rejects_non_table_section() {
        let err = CacheOptions::from_toml("cache = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = CacheOptions::from_toml("database_name = ").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_options_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.toml");
        std::fs::write(&path, "[cache]\ndatabase_name = \"db\"\ncontainer_name = \"c\"\n").unwrap();

        let options = load_options(&path).unwrap();
        assert_eq!(options.database_name, "db");

        let missing = load_options(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, Error::ConfigFile { .. }));
    }
}
