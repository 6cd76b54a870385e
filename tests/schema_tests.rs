/// Table Provisioning Tests
///
/// Tests table creation, TTL enablement and configuration checks performed when a
/// repository is built.
use dynamo_repository::engine::TableState;
use dynamo_repository::Timeouts;
use std::time::Duration;

mod helpers;
use helpers::*;

/// Entity whose type name cannot be used as a key prefix
#[derive(Serialize, Deserialize, Debug, Clone)]
struct Tagged {
    id: String,
}

impl Entity for Tagged {
    const ENTITY_TYPE: &'static str = "Tag#ged";

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Test that building a repository creates its table
#[tokio::test]
async fn test_provisions_table() {
    let engine = MemoryEngine::new();
    assert_eq!(engine.describe_table(TABLE).await.unwrap(), None);

    let _orders = repository::<Order>(&engine).await;
    assert_eq!(
        engine.describe_table(TABLE).await.unwrap(),
        Some(TableState::Active)
    );
    assert_eq!(engine.ttl_attribute(TABLE).await, None);
}

/// Test that provisioning an existing table keeps its items
#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let engine = MemoryEngine::new();
    let orders = repository::<Order>(&engine).await;
    orders
        .save(&Order::new("o-1", "open", 1, 1_000), "scope")
        .await
        .unwrap();

    let again = repository::<Order>(&engine).await;
    let _notes = repository::<Note>(&engine).await;

    assert_eq!(again.find_by_id("o-1", "scope").await.unwrap().status, "open");
    assert_eq!(engine.item_count(TABLE).await, 1);
}

/// Test that TTL is enabled on the expiry attribute when a lifetime is configured
#[tokio::test]
async fn test_enables_ttl_when_configured() {
    let engine = MemoryEngine::new();
    let config = RepositoryConfig::new(TABLE).with_ttl(Duration::from_secs(60));

    let _first = repository_with::<Order>(&engine, config.clone()).await;
    let _second = repository_with::<Order>(&engine, config).await;

    assert_eq!(engine.ttl_attribute(TABLE).await.as_deref(), Some("TTL"));
}

/// Test that skipping creation leaves the engine untouched
#[tokio::test]
async fn test_skip_table_creation() {
    let engine = MemoryEngine::new();
    let config = RepositoryConfig::new(TABLE)
        .with_skip_table_creation(true)
        .with_ttl(Duration::from_secs(60));
    let orders = repository_with::<Order>(&engine, config).await;

    assert_eq!(engine.describe_table(TABLE).await.unwrap(), None);

    // Operations fail because nobody created the table
    let err = orders
        .save(&Order::new("o-1", "open", 1, 1_000), "scope")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ResourceNotFound(_)), "unexpected error: {:?}", err);
}

/// Test that unusable configurations are rejected before provisioning
#[tokio::test]
async fn test_rejects_invalid_configuration() {
    let engine = MemoryEngine::new();

    let err = Repository::<Order, MemoryEngine>::new(engine.clone(), RepositoryConfig::new("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));

    let timeouts = Timeouts {
        single: Duration::ZERO,
        ..Timeouts::default()
    };
    let err = Repository::<Order, MemoryEngine>::new(
        engine.clone(),
        RepositoryConfig::new(TABLE).with_timeouts(timeouts),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));

    let err = Repository::<Tagged, MemoryEngine>::new(engine.clone(), RepositoryConfig::new(TABLE))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));

    assert_eq!(engine.describe_table(TABLE).await.unwrap(), None);
}

/// Test that a failed table creation is reported as a provisioning failure
#[tokio::test]
async fn test_create_table_failure() {
    let engine = MemoryEngine::new();
    engine.fail_next_create_table().await;

    let err = Repository::<Order, MemoryEngine>::new(engine.clone(), RepositoryConfig::new(TABLE))
        .await
        .unwrap_err();
    match &err {
        Error::Provisioning { table, source } => {
            assert_eq!(table, TABLE);
            assert!(matches!(source.as_ref(), Error::Backend(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(engine.describe_table(TABLE).await.unwrap(), None);
}

/// Test that a failed TTL update is reported as a provisioning failure
#[tokio::test]
async fn test_enable_ttl_failure() {
    let engine = MemoryEngine::new();
    engine.fail_next_enable_ttl().await;

    let config = RepositoryConfig::new(TABLE).with_ttl(Duration::from_secs(60));
    let err = Repository::<Order, MemoryEngine>::new(engine.clone(), config)
        .await
        .unwrap_err();
    assert!(
        matches!(&err, Error::Provisioning { source, .. } if matches!(source.as_ref(), Error::Backend(_))),
        "unexpected error: {:?}",
        err
    );
    assert!(std::error::Error::source(&err).is_some());

    // The table itself was created before the TTL update failed
    assert_eq!(
        engine.describe_table(TABLE).await.unwrap(),
        Some(TableState::Active)
    );
    assert_eq!(engine.ttl_attribute(TABLE).await, None);
}

/// Test that slow provisioning is bounded by the provisioning timeout
#[tokio::test]
async fn test_provisioning_times_out() {
    let engine = MemoryEngine::new();
    engine.delay_next_request(Duration::from_millis(500)).await;

    let timeouts = Timeouts {
        provisioning: Duration::from_millis(20),
        ..Timeouts::default()
    };
    let config = RepositoryConfig::new(TABLE).with_timeouts(timeouts);
    let err = Repository::<Order, MemoryEngine>::new(engine.clone(), config)
        .await
        .unwrap_err();
    assert!(
        matches!(
            &err,
            Error::Provisioning { source, .. }
                if matches!(source.as_ref(), Error::Timeout { operation: "CreateTable", .. })
        ),
        "unexpected error: {:?}",
        err
    );
}
