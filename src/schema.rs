use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::engine::{Engine, TableState};
use crate::envelope::{CREATED_AT_ATTRIBUTE, ENTITY_ID_ATTRIBUTE, PK_ATTRIBUTE, SK_ATTRIBUTE};
use crate::error::Error;

/// Index on `EntityId`, for lookups by identifier across partitions
pub const ENTITY_ID_INDEX: &str = "EntityIdIndex";
/// Index on `(PK, CreatedAt)`, for newest-first partition listings
pub const CREATED_AT_INDEX: &str = "PK-CreatedAt-sort-index";

const DEFAULT_CAPACITY_UNITS: i64 = 5;
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Scalar type of a key attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// `S`
    String,
    /// `N`
    Number,
}

/// Key attribute name and type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAttribute {
    /// Attribute name
    pub name: &'static str,
    /// Scalar type
    pub kind: KeyKind,
}

impl KeyAttribute {
    const fn string(name: &'static str) -> Self {
        Self {
            name,
            kind: KeyKind::String,
        }
    }

    const fn number(name: &'static str) -> Self {
        Self {
            name,
            kind: KeyKind::Number,
        }
    }
}

/// Global secondary index projecting all attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    /// Index name
    pub name: &'static str,
    /// Hash key
    pub hash: KeyAttribute,
    /// Optional range key
    pub range: Option<KeyAttribute>,
}

/// Physical layout shared by every entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name
    pub table_name: String,
    /// Primary hash key
    pub hash: KeyAttribute,
    /// Primary range key
    pub range: KeyAttribute,
    /// Secondary indexes
    pub indexes: Vec<IndexSchema>,
    /// Provisioned read capacity for the table and each index
    pub read_capacity_units: i64,
    /// Provisioned write capacity for the table and each index
    pub write_capacity_units: i64,
}

impl TableSchema {
    /// The single-table layout: `(PK, SK)` plus the identifier and recency indexes
    pub fn for_table(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            hash: KeyAttribute::string(PK_ATTRIBUTE),
            range: KeyAttribute::string(SK_ATTRIBUTE),
            indexes: vec![
                IndexSchema {
                    name: ENTITY_ID_INDEX,
                    hash: KeyAttribute::string(ENTITY_ID_ATTRIBUTE),
                    range: None,
                },
                IndexSchema {
                    name: CREATED_AT_INDEX,
                    hash: KeyAttribute::string(PK_ATTRIBUTE),
                    range: Some(KeyAttribute::number(CREATED_AT_ATTRIBUTE)),
                },
            ],
            read_capacity_units: DEFAULT_CAPACITY_UNITS,
            write_capacity_units: DEFAULT_CAPACITY_UNITS,
        }
    }

    /// Look up an index by name
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Every key attribute of the table and its indexes, each listed once
    pub fn attribute_definitions(&self) -> Vec<KeyAttribute> {
        let mut attributes = vec![self.hash, self.range];
        for index in &self.indexes {
            for attribute in std::iter::once(index.hash).chain(index.range) {
                if !attributes.iter().any(|known| known.name == attribute.name) {
                    attributes.push(attribute);
                }
            }
        }
        attributes
    }
}

/// Create the table when missing and wait until it is active
///
/// Safe to call on every startup: an existing table is left untouched.
pub async fn ensure_table<E: Engine>(
    engine: &E,
    schema: &TableSchema,
    limit: Duration,
) -> Result<(), Error> {
    timeout(limit, create_and_wait(engine, schema))
        .await
        .map_err(|_| Error::Timeout {
            operation: "CreateTable",
            after: limit,
        })?
}

async fn create_and_wait<E: Engine>(engine: &E, schema: &TableSchema) -> Result<(), Error> {
    let table = schema.table_name.as_str();
    match engine.describe_table(table).await? {
        Some(TableState::Active) => {
            tracing::debug!(%table, "Table already exists");
            return Ok(());
        }
        Some(state) => tracing::info!(%table, ?state, "Waiting for existing table"),
        None => {
            tracing::info!(%table, "Creating table");
            engine.create_table(schema).await?;
        }
    }

    loop {
        match engine.describe_table(table).await? {
            Some(TableState::Active) => {
                tracing::info!(%table, "Table is active");
                return Ok(());
            }
            None => return Err(Error::ResourceNotFound(table.to_string())),
            Some(_) => sleep(ACTIVE_POLL_INTERVAL).await,
        }
    }
}

/// Turn on expiry for `attribute`; a no-op when it is already enabled
pub async fn enable_expiry<E: Engine>(
    engine: &E,
    table: &str,
    attribute: &str,
    limit: Duration,
) -> Result<(), Error> {
    let changed = timeout(limit, engine.enable_ttl(table, attribute))
        .await
        .map_err(|_| Error::Timeout {
            operation: "UpdateTimeToLive",
            after: limit,
        })??;

    if changed {
        tracing::info!(%table, %attribute, "Enabled time to live");
    } else {
        tracing::debug!(%table, %attribute, "Time to live already enabled");
    }
    Ok(())
}
