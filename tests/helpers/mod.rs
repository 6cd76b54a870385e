/// Test helpers and fixtures for repository integration tests
///
/// Every test builds its own [`MemoryEngine`], so tests never share state. The
/// live DynamoDB test uses the same fixtures against LocalStack.
pub mod fixtures;

pub use dynamo_repository::{
    Engine, Entity, Envelope, Error, Filter, Filters, MemoryEngine, PageRequest, Repository,
    RepositoryConfig, SortField,
};
pub use serde::{Deserialize, Serialize};

// Re-export common fixtures
pub use fixtures::{Note, Order};

use rusty_ulid::generate_ulid_string;
use tracing_subscriber::EnvFilter;

/// Table every in-memory test repository is provisioned on
pub const TABLE: &str = "repository_tests";

/// Route `tracing` output to the test harness (idempotent)
///
/// Honours `RUST_LOG`, e.g. `RUST_LOG=dynamo_repository=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Generate a unique scope for isolation
#[allow(dead_code)]
pub fn unique_scope(name: &str) -> String {
    format!("{}-{}", name, generate_ulid_string())
}

/// Repository on `engine` with the default configuration
#[allow(dead_code)]
pub async fn repository<T: Entity>(engine: &MemoryEngine) -> Repository<T, MemoryEngine> {
    repository_with(engine, RepositoryConfig::new(TABLE)).await
}

/// Repository on `engine` with a custom configuration
#[allow(dead_code)]
pub async fn repository_with<T: Entity>(
    engine: &MemoryEngine,
    config: RepositoryConfig,
) -> Repository<T, MemoryEngine> {
    init_tracing();
    Repository::new(engine.clone(), config)
        .await
        .expect("repository should provision on the memory engine")
}

/// Ids of `orders` in their current order
#[allow(dead_code)]
pub fn ids(orders: &[Order]) -> Vec<String> {
    orders.iter().map(|order| order.id.clone()).collect()
}
