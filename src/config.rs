//! Configuration for DataCopier
//!
//! Provides a builder pattern for configuring a copy run.

use std::time::Duration;

/// Default number of rows per fetch and per insert batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Configuration for a copy run
#[derive(Debug, Clone)]
pub struct CopyConfig {
    /// Source PostgreSQL database URL
    pub source_url: String,
    /// Target PostgreSQL database URL
    pub target_url: String,
    /// Maximum connections for each pool created by `DataCopier::connect`
    pub max_connections: u32,
    /// Batch size used by table specs that do not set one
    pub default_batch_size: usize,
    /// Minimum wall-clock time between two progress lines for one table
    pub progress_interval: Duration,
    /// Upper bound on concurrently copied tables within one level.
    /// `None` uses the smaller of the two pool sizes.
    pub max_parallel_tables: Option<usize>,
    /// Schemas read by the PostgreSQL metadata provider
    pub schemas: Vec<String>,
    /// Write every table into this schema instead of its source schema
    pub target_schema: Option<String>,
    /// Exclude tables caught in foreign-key cycles instead of failing
    pub skip_cyclic_tables: bool,
    /// Require a spec for every source table and every column of covered tables
    pub require_full_coverage: bool,
    /// Advance target sequences past the copied keys
    pub sync_sequences: bool,
}

impl CopyConfig {
    /// Create a new configuration builder
    pub fn builder(source_url: impl Into<String>, target_url: impl Into<String>) -> CopyConfigBuilder {
        CopyConfigBuilder::new(source_url, target_url)
    }
}

/// Builder for CopyConfig
#[derive(Debug)]
pub struct CopyConfigBuilder {
    config: CopyConfig,
}

impl CopyConfigBuilder {
    /// Create a new builder with the source and target URLs
    pub fn new(source_url: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            config: CopyConfig {
                source_url: source_url.into(),
                target_url: target_url.into(),
                max_connections: 10,
                default_batch_size: DEFAULT_BATCH_SIZE,
                progress_interval: Duration::from_secs(10),
                max_parallel_tables: None,
                schemas: vec!["public".to_string()],
                target_schema: None,
                skip_cyclic_tables: false,
                require_full_coverage: false,
                sync_sequences: true,
            },
        }
    }

    /// Set the pool size used for source and target (default: 10)
    pub fn max_connections(mut self, max: u32) -> Self {
        self.config.max_connections = max.max(1);
        self
    }

    /// Set the batch size for specs without one (default: 1000)
    pub fn default_batch_size(mut self, size: usize) -> Self {
        self.config.default_batch_size = size.max(1);
        self
    }

    /// Set the progress log interval (default: 10 seconds)
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Bound how many tables of one level are copied at once
    /// (default: the smaller pool's `max_connections`)
    pub fn max_parallel_tables(mut self, max: usize) -> Self {
        self.config.max_parallel_tables = Some(max.max(1));
        self
    }

    /// Replace the schemas read for metadata (default: `public`)
    pub fn schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.schemas = schemas.into_iter().map(Into::into).collect();
        self
    }

    /// Write all tables into the given target schema
    pub fn target_schema(mut self, schema: impl Into<String>) -> Self {
        self.config.target_schema = Some(schema.into());
        self
    }

    /// Log and drop tables in foreign-key cycles instead of failing (default: false)
    pub fn skip_cyclic_tables(mut self, enabled: bool) -> Self {
        self.config.skip_cyclic_tables = enabled;
        self
    }

    /// Require every table and column to be covered (default: false)
    pub fn require_full_coverage(mut self, enabled: bool) -> Self {
        self.config.require_full_coverage = enabled;
        self
    }

    /// Enable or disable target sequence synchronization (default: true)
    pub fn sync_sequences(mut self, enabled: bool) -> Self {
        self.config.sync_sequences = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CopyConfig {
        self.config
    }
}
