use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;

/// Separator between the entity type name and the partition scope
pub const KEY_DELIMITER: char = '#';

/// Capability every stored entity provides
///
/// The type name prefixes the partition key so several entity types can share one
/// physical table; the identifier becomes the sort key.
///
/// # Example
///
/// ```rust
/// use dynamo_repository::Entity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Order {
///     id: String,
///     total: u64,
///     created_at: i64,
/// }
///
/// impl Entity for Order {
///     const ENTITY_TYPE: &'static str = "Order";
///
///     fn id(&self) -> String {
///         self.id.clone()
///     }
///
///     fn created_at(&self) -> Option<i64> {
///         Some(self.created_at)
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Declared type name, used as the partition key prefix
    const ENTITY_TYPE: &'static str;

    /// Identifier, unique within a partition
    fn id(&self) -> String;

    /// Creation time in epoch milliseconds, when the entity tracks one
    ///
    /// Used only on the first write of an item; later writes keep the stored value.
    fn created_at(&self) -> Option<i64> {
        None
    }
}

/// Check that `T` can be mapped onto the single-table key scheme
pub fn validate_entity<T: Entity>() -> Result<(), Error> {
    if T::ENTITY_TYPE.is_empty() {
        return Err(Error::Configuration("entity type name is empty".into()));
    }
    if T::ENTITY_TYPE.contains(KEY_DELIMITER) {
        return Err(Error::Configuration(format!(
            "entity type name {:?} contains the key delimiter {:?}",
            T::ENTITY_TYPE,
            KEY_DELIMITER
        )));
    }
    Ok(())
}

/// Compose the physical partition key `<ENTITY_TYPE>#<scope>`
///
/// ```
/// # use dynamo_repository::{keys::partition_key, Entity};
/// # #[derive(serde::Serialize, serde::Deserialize)]
/// # struct Order { id: String }
/// # impl Entity for Order {
/// #     const ENTITY_TYPE: &'static str = "Order";
/// #     fn id(&self) -> String { self.id.clone() }
/// # }
/// assert_eq!(partition_key::<Order>("tenant-1").unwrap(), "Order#tenant-1");
/// ```
pub fn partition_key<T: Entity>(scope: &str) -> Result<String, Error> {
    validate_entity::<T>()?;
    Ok(format!("{}{}{}", T::ENTITY_TYPE, KEY_DELIMITER, scope))
}

/// Prefix shared by every partition key of `T`
pub(crate) fn partition_prefix<T: Entity>() -> String {
    format!("{}{}", T::ENTITY_TYPE, KEY_DELIMITER)
}

/// Identifier of `entity`, rejected when empty
pub fn entity_id<T: Entity>(entity: &T) -> Result<String, Error> {
    let id = entity.id();
    if id.is_empty() {
        return Err(Error::MissingId {
            entity: T::ENTITY_TYPE,
        });
    }
    Ok(id)
}
