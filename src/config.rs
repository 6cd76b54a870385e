use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::env;
use std::time::Duration;

use crate::error::Error;

/// Environment variable holding the table name
pub const TABLE_NAME_ENV: &str = "DYNAMODB_TABLE_NAME";
/// Environment variable that disables provisioning when set to `true` or `1`
pub const SKIP_TABLE_CREATION_ENV: &str = "DYNAMODB_SKIP_TABLE_CREATION";
/// Environment variable holding the item lifetime in seconds
pub const TTL_SECONDS_ENV: &str = "DYNAMODB_TTL_SECONDS";
/// Environment variable toggling listing through the recency index
pub const RECENCY_INDEX_ENV: &str = "DYNAMODB_RECENCY_INDEX";

/// Time bounds applied to each repository operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Point reads, single puts and deletes
    pub single: Duration,
    /// Partition listings and batch reads
    pub listing: Duration,
    /// Batch writes and batch deletes
    pub batch: Duration,
    /// Table creation, activation wait and TTL enablement
    pub provisioning: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            single: Duration::from_secs(5),
            listing: Duration::from_secs(10),
            batch: Duration::from_secs(30),
            provisioning: Duration::from_secs(60),
        }
    }
}

/// Explicit repository configuration
///
/// Every repository receives its own copy; nothing is read from process-wide state
/// after construction.
///
/// ```
/// use dynamo_repository::RepositoryConfig;
/// use std::time::Duration;
///
/// let config = RepositoryConfig::new("sessions")
///     .with_ttl(Duration::from_secs(3600))
///     .with_skip_table_creation(true);
///
/// assert_eq!(config.table_name, "sessions");
/// assert_eq!(config.ttl, Some(Duration::from_secs(3600)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Physical table shared by every entity type
    pub table_name: String,
    /// Assume the table already exists and skip provisioning
    pub skip_table_creation: bool,
    /// Item lifetime; `None` writes no expiry attribute
    pub ttl: Option<Duration>,
    /// List partitions through the `(PK, CreatedAt)` index instead of the base table
    pub recency_index: bool,
    /// Per-operation time bounds
    pub timeouts: Timeouts,
}

impl RepositoryConfig {
    /// Configuration with defaults for the given table
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            skip_table_creation: false,
            ttl: None,
            recency_index: true,
            timeouts: Timeouts::default(),
        }
    }

    /// Read the configuration from `DYNAMODB_*` environment variables
    ///
    /// Only the table name is required.
    pub fn from_env() -> Result<Self, Error> {
        let table_name = env::var(TABLE_NAME_ENV).map_err(|_| {
            Error::Configuration(format!("{} is not set", TABLE_NAME_ENV))
        })?;

        let mut config = Self::new(table_name);

        if let Ok(value) = env::var(SKIP_TABLE_CREATION_ENV) {
            config.skip_table_creation = parse_flag(SKIP_TABLE_CREATION_ENV, &value)?;
        }

        if let Ok(value) = env::var(RECENCY_INDEX_ENV) {
            config.recency_index = parse_flag(RECENCY_INDEX_ENV, &value)?;
        }

        if let Ok(value) = env::var(TTL_SECONDS_ENV) {
            let seconds: u64 = value.trim().parse().map_err(|_| {
                Error::Configuration(format!("{} must be whole seconds, got {:?}", TTL_SECONDS_ENV, value))
            })?;
            config.ttl = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        config.validate()?;
        Ok(config)
    }

    /// Replace the table name
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Skip table creation and TTL enablement
    pub fn with_skip_table_creation(mut self, skip: bool) -> Self {
        self.skip_table_creation = skip;
        self
    }

    /// Expire items `ttl` after their last write
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    /// Choose between index-backed and base-table listings
    pub fn with_recency_index(mut self, enabled: bool) -> Self {
        self.recency_index = enabled;
        self
    }

    /// Override the per-operation time bounds
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Reject configurations no operation could succeed with
    pub fn validate(&self) -> Result<(), Error> {
        if self.table_name.trim().is_empty() {
            return Err(Error::Configuration("table name is empty".into()));
        }

        let timeouts = &self.timeouts;
        if [timeouts.single, timeouts.listing, timeouts.batch, timeouts.provisioning]
            .iter()
            .any(Duration::is_zero)
        {
            return Err(Error::Configuration("timeouts must be non-zero".into()));
        }

        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => Err(Error::Configuration(format!(
            "{} must be a boolean, got {:?}",
            name, other
        ))),
    }
}

/// Load an AWS SDK configuration suited to the repository
///
/// It configures:
/// - Retries disabled; failures surface to the caller
/// - Connect timeout: 3 seconds
/// - Read timeout: 20 seconds
/// - LocalStack via `AWS_PROFILE=localstack`, or any endpoint in `AWS_ENDPOINT_URL`
/// - Region from the environment, `us-east-1` when none is configured
pub async fn load_sdk_config() -> SdkConfig {
    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(3))
        .read_timeout(Duration::from_secs(20))
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .retry_config(RetryConfig::disabled())
        .timeout_config(timeout_config);

    if env::var("AWS_REGION").is_err() && env::var("AWS_DEFAULT_REGION").is_err() {
        loader = loader.region(Region::new("us-east-1"));
    }

    if env::var("AWS_PROFILE").unwrap_or_default() == "localstack" {
        loader = loader.endpoint_url("http://127.0.0.1:4566");
    } else if let Ok(endpoint) = env::var("AWS_ENDPOINT_URL") {
        loader = loader.endpoint_url(endpoint);
    }

    loader.load().await
}
