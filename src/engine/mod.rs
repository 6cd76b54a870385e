//! Storage engine seam
//!
//! The repository speaks to the store only through [`Engine`]. Each batch method
//! carries a single request; chunking and sequencing belong to the caller.

use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::future::Future;

use crate::envelope::{PK_ATTRIBUTE, SK_ATTRIBUTE};
use crate::error::Error;
use crate::schema::TableSchema;

/// DynamoDB-backed engine
pub mod dynamo;

/// In-process engine
pub mod memory;

pub use dynamo::DynamoEngine;
pub use memory::MemoryEngine;

/// Raw stored item
pub type Item = HashMap<String, AttributeValue>;

/// Largest BatchWriteItem request
pub const BATCH_WRITE_SIZE: usize = 25;
/// Largest BatchGetItem request
pub const BATCH_READ_SIZE: usize = 100;

/// `(PK, SK)` of a stored item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimaryKey {
    /// Partition key
    pub pk: String,
    /// Sort key
    pub sk: String,
}

impl PrimaryKey {
    /// Key from its parts
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// Key attributes as an item fragment
    pub fn to_item(&self) -> Item {
        HashMap::from([
            (PK_ATTRIBUTE.to_string(), AttributeValue::S(self.pk.clone())),
            (SK_ATTRIBUTE.to_string(), AttributeValue::S(self.sk.clone())),
        ])
    }

    /// Extract the key attributes from an item
    pub fn from_item(item: &Item) -> Option<Self> {
        match (item.get(PK_ATTRIBUTE), item.get(SK_ATTRIBUTE)) {
            (Some(AttributeValue::S(pk)), Some(AttributeValue::S(sk))) => {
                Some(Self::new(pk.clone(), sk.clone()))
            }
            _ => None,
        }
    }
}

/// Condition attached to a single put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Unconditional overwrite
    Always,
    /// Succeeds only when no item has the key
    NotExists,
    /// Succeeds only when the stored `Version` equals the value
    VersionEquals(i64),
}

/// One entry of a batch write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Put the item
    Put(Item),
    /// Delete the item with the key
    Delete(PrimaryKey),
}

/// Result of one BatchGetItem request
#[derive(Debug, Default, Clone)]
pub struct BatchGetOutput {
    /// Items found, in no particular order
    pub items: Vec<Item>,
    /// Keys the engine did not process
    pub unprocessed: Vec<PrimaryKey>,
}

/// Table state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// Table is being created
    Creating,
    /// Table accepts reads and writes
    Active,
    /// Any other status (updating, deleting, archived)
    Other,
}

/// Key condition query on the table or one of its indexes
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Table name
    pub table: String,
    /// Secondary index, `None` for the base table
    pub index: Option<&'static str>,
    /// Hash key attribute of the table or index
    pub hash_attribute: &'static str,
    /// Hash key value to match
    pub hash_value: String,
    /// Ascending range key order when `true`
    pub scan_forward: bool,
    /// Maximum items per response
    pub limit: Option<i32>,
    /// Continuation cursor from a previous response
    pub exclusive_start_key: Option<Item>,
}

impl QueryRequest {
    /// Query the base table partition `pk`
    pub fn partition(table: impl Into<String>, pk: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            index: None,
            hash_attribute: PK_ATTRIBUTE,
            hash_value: pk.into(),
            scan_forward: true,
            limit: None,
            exclusive_start_key: None,
        }
    }

    /// Query `index` on its hash attribute
    pub fn index(
        table: impl Into<String>,
        index: &'static str,
        hash_attribute: &'static str,
        hash_value: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            index: Some(index),
            hash_attribute,
            hash_value: hash_value.into(),
            scan_forward: true,
            limit: None,
            exclusive_start_key: None,
        }
    }

    /// Set range key order
    pub fn scan_forward(mut self, forward: bool) -> Self {
        self.scan_forward = forward;
        self
    }

    /// Cap items per response
    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One query response
#[derive(Debug, Default, Clone)]
pub struct QueryPage {
    /// Items in index order
    pub items: Vec<Item>,
    /// Cursor for the next response, `None` when exhausted
    pub last_evaluated_key: Option<Item>,
}

/// Primitive operations of a DynamoDB-like store
pub trait Engine: Send + Sync {
    /// Current table state, `None` when the table does not exist
    fn describe_table(
        &self,
        table: &str,
    ) -> impl Future<Output = Result<Option<TableState>, Error>> + Send;

    /// Create the table with its indexes; an existing table is not an error
    fn create_table(&self, schema: &TableSchema) -> impl Future<Output = Result<(), Error>> + Send;

    /// Enable expiry on `attribute`; returns `false` when it already was
    fn enable_ttl(
        &self,
        table: &str,
        attribute: &str,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Strongly consistent point read
    fn get_item(
        &self,
        table: &str,
        key: &PrimaryKey,
    ) -> impl Future<Output = Result<Option<Item>, Error>> + Send;

    /// Single put; a failed condition is reported as a conditional check failure
    fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: PutCondition,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Single delete; deleting a missing item succeeds
    fn delete_item(
        &self,
        table: &str,
        key: &PrimaryKey,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// One BatchGetItem request of at most [`BATCH_READ_SIZE`] keys
    fn batch_get_item(
        &self,
        table: &str,
        keys: Vec<PrimaryKey>,
    ) -> impl Future<Output = Result<BatchGetOutput, Error>> + Send;

    /// One BatchWriteItem request of at most [`BATCH_WRITE_SIZE`] entries
    ///
    /// Returns the entries the engine left unprocessed.
    fn batch_write_item(
        &self,
        table: &str,
        ops: Vec<WriteOp>,
    ) -> impl Future<Output = Result<Vec<WriteOp>, Error>> + Send;

    /// One query response
    fn query(&self, request: &QueryRequest)
        -> impl Future<Output = Result<QueryPage, Error>> + Send;

    /// Every item matching `request`, following continuation cursors until exhausted
    fn query_all(
        &self,
        mut request: QueryRequest,
    ) -> impl Future<Output = Result<Vec<Item>, Error>> + Send {
        async move {
            let mut items = Vec::new();
            loop {
                let page = self.query(&request).await?;
                items.extend(page.items);
                match page.last_evaluated_key {
                    Some(cursor) => {
                        tracing::trace!(table = %request.table, fetched = items.len(), "Following query cursor");
                        request.exclusive_start_key = Some(cursor);
                    }
                    None => return Ok(items),
                }
            }
        }
    }
}
