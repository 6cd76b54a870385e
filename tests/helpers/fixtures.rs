/// Common test fixtures and data structures
///
/// Defines reusable entities that implement `Entity` for use across multiple
/// test files.
use super::{Deserialize, Entity, Serialize};

/// Entity with an explicit creation time, so listing order is deterministic
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub status: String,
    pub priority: i64,
    pub created_at: i64,
}

impl Order {
    pub fn new(id: impl Into<String>, status: &str, priority: i64, created_at: i64) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            priority,
            created_at,
        }
    }
}

impl Entity for Order {
    const ENTITY_TYPE: &'static str = "Order";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn created_at(&self) -> Option<i64> {
        Some(self.created_at)
    }
}

/// Entity without a creation time of its own
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Note {
    pub id: String,
    pub text: String,
}

impl Note {
    #[allow(dead_code)]
    pub fn new(id: impl Into<String>, text: &str) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

impl Entity for Note {
    const ENTITY_TYPE: &'static str = "Note";

    fn id(&self) -> String {
        self.id.clone()
    }
}
