use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_dynamo::{from_item, to_item};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::engine::{Item, PrimaryKey};
use crate::error::Error;
use crate::keys::Entity;

/// Partition key attribute
pub const PK_ATTRIBUTE: &str = "PK";
/// Sort key attribute
pub const SK_ATTRIBUTE: &str = "SK";
/// Identifier attribute, hash key of the identifier index
pub const ENTITY_ID_ATTRIBUTE: &str = "EntityId";
/// Encoded entity body
pub const PAYLOAD_ATTRIBUTE: &str = "Payload";
/// First-write time, range key of the recency index
pub const CREATED_AT_ATTRIBUTE: &str = "CreatedAt";
/// Last-write time
pub const UPDATED_AT_ATTRIBUTE: &str = "UpdatedAt";
/// Write counter
pub const VERSION_ATTRIBUTE: &str = "Version";
/// Expiry in epoch seconds
pub const TTL_ATTRIBUTE: &str = "TTL";

/// Stored record wrapping one entity
///
/// Timestamps are epoch milliseconds except `ttl`, which is epoch seconds as the
/// engine's expiry sweeper expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// `<ENTITY_TYPE>#<scope>`
    #[serde(rename = "PK")]
    pub pk: String,
    /// Entity identifier
    #[serde(rename = "SK")]
    pub sk: String,
    /// Copy of the identifier for cross-partition lookup
    #[serde(rename = "EntityId")]
    pub entity_id: String,
    /// JSON-encoded entity
    #[serde(rename = "Payload")]
    pub payload: String,
    /// Set once on the first write
    #[serde(rename = "CreatedAt")]
    pub created_at: i64,
    /// Refreshed on every write
    #[serde(rename = "UpdatedAt")]
    pub updated_at: i64,
    /// Starts at 1, incremented by each write
    #[serde(rename = "Version")]
    pub version: i64,
    /// Expiry instant, absent when the repository has no TTL
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl Envelope {
    /// Wrap `entity` for its next write
    ///
    /// A live `previous` envelope carries its `CreatedAt` forward and bumps its
    /// version. An absent or expired one starts the lifecycle over.
    pub fn next<T: Entity>(
        entity: &T,
        pk: String,
        sk: String,
        previous: Option<&Envelope>,
        now: SystemTime,
        ttl: Option<Duration>,
    ) -> Result<Self, Error> {
        let now_millis = epoch_millis(now);
        let now_seconds = epoch_seconds(now);
        let payload = serde_json::to_string(entity)?;

        let (created_at, version) = match previous.filter(|p| !p.is_expired(now_seconds)) {
            Some(previous) => (previous.created_at, previous.version + 1),
            None => (
                entity
                    .created_at()
                    .filter(|created_at| *created_at > 0)
                    .unwrap_or(now_millis),
                1,
            ),
        };

        Ok(Self {
            entity_id: sk.clone(),
            pk,
            sk,
            payload,
            created_at,
            updated_at: now_millis,
            version,
            // Lifetimes past the i64 range saturate instead of wrapping into the past
            ttl: ttl.map(|ttl| {
                now_seconds.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
            }),
        })
    }

    /// Parse a stored item
    pub fn from_item(item: Item) -> Result<Self, Error> {
        Ok(from_item(item)?)
    }

    /// Encode into a stored item
    pub fn to_item(&self) -> Result<Item, Error> {
        Ok(to_item(self)?)
    }

    /// Decode the payload into the entity type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Decode the payload into a JSON value for predicate evaluation
    pub fn decode_value(&self) -> Result<Value, Error> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Whether the expiry instant has passed
    pub fn is_expired(&self, now_seconds: i64) -> bool {
        matches!(self.ttl, Some(ttl) if now_seconds > ttl)
    }

    /// Primary key of the stored item
    pub fn key(&self) -> PrimaryKey {
        PrimaryKey::new(self.pk.clone(), self.sk.clone())
    }
}

/// Milliseconds since the Unix epoch, 0 for instants before it
pub fn epoch_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Seconds since the Unix epoch, 0 for instants before it
pub fn epoch_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::types::AttributeValue;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
        #[serde(rename = "createdAt")]
        created_at: i64,
    }

    impl Entity for Note {
        const ENTITY_TYPE: &'static str = "Note";

        fn id(&self) -> String {
            self.id.clone()
        }

        fn created_at(&self) -> Option<i64> {
            Some(self.created_at)
        }
    }

    fn note(created_at: i64) -> Note {
        Note {
            id: "n-1".into(),
            text: "hello".into(),
            created_at,
        }
    }

    fn at(seconds: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(seconds)
    }

    #[test]
    fn test_first_write_uses_entity_creation_time() {
        let envelope =
            Envelope::next(&note(42), "Note#a".into(), "n-1".into(), None, at(1_000), None)
                .unwrap();

        assert_eq!(envelope.version, 1);
        assert_eq!(envelope.created_at, 42);
        assert_eq!(envelope.updated_at, 1_000_000);
        assert_eq!(envelope.entity_id, "n-1");
        assert_eq!(envelope.ttl, None);
    }

    #[test]
    fn test_first_write_without_creation_time_uses_now() {
        let envelope =
            Envelope::next(&note(0), "Note#a".into(), "n-1".into(), None, at(7), None).unwrap();
        assert_eq!(envelope.created_at, 7_000);
    }

    #[test]
    fn test_rewrite_keeps_created_at_and_bumps_version() {
        let first =
            Envelope::next(&note(42), "Note#a".into(), "n-1".into(), None, at(10), None).unwrap();
        let second = Envelope::next(
            &note(99),
            "Note#a".into(),
            "n-1".into(),
            Some(&first),
            at(20),
            None,
        )
        .unwrap();

        assert_eq!(second.version, 2);
        assert_eq!(second.created_at, 42);
        assert_eq!(second.updated_at, 20_000);
    }

    #[test]
    fn test_expired_previous_restarts_lifecycle() {
        let ttl = Some(Duration::from_secs(5));
        let first =
            Envelope::next(&note(0), "Note#a".into(), "n-1".into(), None, at(10), ttl).unwrap();
        assert_eq!(first.ttl, Some(15));
        assert!(!first.is_expired(15));
        assert!(first.is_expired(16));

        let second = Envelope::next(
            &note(0),
            "Note#a".into(),
            "n-1".into(),
            Some(&first),
            at(30),
            ttl,
        )
        .unwrap();
        assert_eq!(second.version, 1);
        assert_eq!(second.created_at, 30_000);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let ttl = Some(Duration::from_secs(u64::MAX));
        let envelope =
            Envelope::next(&note(0), "Note#a".into(), "n-1".into(), None, at(10), ttl).unwrap();
        assert_eq!(envelope.ttl, Some(i64::MAX));
        assert!(!envelope.is_expired(epoch_seconds(SystemTime::now())));
    }

    #[test]
    fn test_item_uses_physical_attribute_names() {
        let envelope =
            Envelope::next(&note(42), "Note#a".into(), "n-1".into(), None, at(10), None).unwrap();
        let item = envelope.to_item().unwrap();

        assert_eq!(item.get(PK_ATTRIBUTE), Some(&AttributeValue::S("Note#a".into())));
        assert_eq!(item.get(ENTITY_ID_ATTRIBUTE), Some(&AttributeValue::S("n-1".into())));
        assert_eq!(item.get(CREATED_AT_ATTRIBUTE), Some(&AttributeValue::N("42".into())));
        assert_eq!(item.get(VERSION_ATTRIBUTE), Some(&AttributeValue::N("1".into())));
        assert!(item.contains_key(PAYLOAD_ATTRIBUTE));
        assert!(item.contains_key(UPDATED_AT_ATTRIBUTE));
        assert!(!item.contains_key(TTL_ATTRIBUTE));

        let back = Envelope::from_item(item).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.decode::<Note>().unwrap(), note(42));
    }

    #[test]
    fn test_malformed_payload_is_serialization_error() {
        let mut envelope =
            Envelope::next(&note(1), "Note#a".into(), "n-1".into(), None, at(10), None).unwrap();
        envelope.payload = "{not json".into();
        let err = envelope.decode::<Note>().unwrap_err();
        assert!(err.is_serialization_error());
    }
}
