use aws_sdk_dynamodb::types::AttributeValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::engine::{
    BatchGetOutput, Engine, Item, PrimaryKey, PutCondition, QueryPage, QueryRequest, TableState,
    WriteOp, BATCH_READ_SIZE, BATCH_WRITE_SIZE,
};
use crate::envelope::{PK_ATTRIBUTE, SK_ATTRIBUTE, VERSION_ATTRIBUTE};
use crate::error::Error;
use crate::schema::TableSchema;

/// Items returned per query response when no smaller limit is requested
pub const DEFAULT_PAGE_SIZE: usize = 1_000;

/// Requests observed by a [`MemoryEngine`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Key count of every BatchGetItem request, in issue order
    pub batch_get_sizes: Vec<usize>,
    /// Entry count of every BatchWriteItem request, in issue order
    pub batch_write_sizes: Vec<usize>,
    /// Query responses served
    pub query_pages: usize,
    /// Single puts accepted
    pub puts: usize,
}

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    ttl_attribute: Option<String>,
    items: BTreeMap<PrimaryKey, Item>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    stats: EngineStats,
    fail_batch_write_in: Option<(usize, ())>,
    unprocessed_batch_write_in: Option<(usize, usize)>,
    unprocessed_batch_get_in: Option<(usize, usize)>,
    fail_next_create_table: bool,
    fail_next_enable_ttl: bool,
    delay_next_request: Option<Duration>,
    write_before_next_put: Option<(String, Item)>,
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemoryTable, Error> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::ResourceNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, Error> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::ResourceNotFound(name.to_string()))
    }
}

/// In-process engine emulating the DynamoDB behaviour the repository relies on
///
/// Tables keep their items ordered by primary key. Queries honour the table's
/// secondary indexes, range key order, per-response limits and continuation cursors.
/// Batch requests above the service limits are rejected the way DynamoDB rejects
/// them. Expired items are never reclaimed; readers must check expiry themselves.
///
/// Clones share state, uses `Arc<RwLock<_>>` for thread-safe access.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    state: Arc<RwLock<MemoryState>>,
    page_size: usize,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Empty engine with no tables
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Cap every query response at `page_size` items, emulating the response size limit
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Snapshot of the requests served so far
    pub async fn stats(&self) -> EngineStats {
        self.state.read().await.stats.clone()
    }

    /// Number of stored items, expired ones included
    pub async fn item_count(&self, table: &str) -> usize {
        self.state
            .read()
            .await
            .tables
            .get(table)
            .map_or(0, |table| table.items.len())
    }

    /// Attribute expiry was enabled on, if any
    pub async fn ttl_attribute(&self, table: &str) -> Option<String> {
        self.state
            .read()
            .await
            .tables
            .get(table)
            .and_then(|table| table.ttl_attribute.clone())
    }

    /// Make the `call`-th BatchWriteItem request from now fail without applying
    pub async fn fail_batch_write_in(&self, call: usize) {
        self.state.write().await.fail_batch_write_in = Some((call.max(1), ()));
    }

    /// Make the `call`-th BatchWriteItem request from now skip its last `count`
    /// entries and hand them back as unprocessed
    pub async fn unprocessed_batch_write_in(&self, call: usize, count: usize) {
        self.state.write().await.unprocessed_batch_write_in = Some((call.max(1), count));
    }

    /// Make the `call`-th BatchGetItem request from now hand back its last `count`
    /// keys as unprocessed
    pub async fn unprocessed_batch_get_in(&self, call: usize, count: usize) {
        self.state.write().await.unprocessed_batch_get_in = Some((call.max(1), count));
    }

    /// Make the next CreateTable request fail
    pub async fn fail_next_create_table(&self) {
        self.state.write().await.fail_next_create_table = true;
    }

    /// Make the next UpdateTimeToLive request fail
    pub async fn fail_next_enable_ttl(&self) {
        self.state.write().await.fail_next_enable_ttl = true;
    }

    /// Stall the next request of any kind for `delay` before it is served
    pub async fn delay_next_request(&self, delay: Duration) {
        self.state.write().await.delay_next_request = Some(delay);
    }

    async fn stall(&self) {
        let delay = self.state.write().await.delay_next_request.take();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
    }

    /// Store `item` right before the next single put is evaluated
    ///
    /// Emulates a concurrent writer slipping in between a read and a write.
    pub async fn write_before_next_put(&self, table: &str, item: Item) {
        self.state.write().await.write_before_next_put = Some((table.to_string(), item));
    }
}

/// Step a one-shot countdown; yields its payload on the call it targets
fn countdown<T>(slot: &mut Option<(usize, T)>) -> Option<T> {
    match slot.take() {
        Some((1, payload)) => Some(payload),
        Some((remaining, payload)) => {
            *slot = Some((remaining - 1, payload));
            None
        }
        None => None,
    }
}

fn primary_key(item: &Item) -> Result<PrimaryKey, Error> {
    PrimaryKey::from_item(item).ok_or_else(|| {
        Error::Backend(format!(
            "item is missing string key attributes {} and {}",
            PK_ATTRIBUTE, SK_ATTRIBUTE
        ))
    })
}

fn version(item: &Item) -> Option<i64> {
    match item.get(VERSION_ATTRIBUTE) {
        Some(AttributeValue::N(version)) => version.parse().ok(),
        _ => None,
    }
}

fn check_condition(existing: Option<&Item>, condition: PutCondition) -> Result<(), Error> {
    let satisfied = match condition {
        PutCondition::Always => true,
        PutCondition::NotExists => existing.is_none(),
        PutCondition::VersionEquals(expected) => existing.and_then(version) == Some(expected),
    };
    if satisfied {
        Ok(())
    } else {
        Err(Error::ConditionFailed)
    }
}

#[derive(Debug, Clone, PartialEq, PartialOrd)]
enum RangeValue {
    Missing,
    Number(f64),
    Text(String),
}

fn range_value(item: &Item, attribute: Option<&str>) -> RangeValue {
    match attribute.and_then(|attribute| item.get(attribute)) {
        Some(AttributeValue::N(number)) => number
            .parse()
            .map(RangeValue::Number)
            .unwrap_or(RangeValue::Missing),
        Some(AttributeValue::S(text)) => RangeValue::Text(text.clone()),
        _ => RangeValue::Missing,
    }
}

/// Position of an item in index order: range value, then primary key
fn index_order(item: &Item, range_attribute: Option<&str>) -> (RangeValue, Option<PrimaryKey>) {
    (range_value(item, range_attribute), PrimaryKey::from_item(item))
}

fn compare_positions(
    a: &(RangeValue, Option<PrimaryKey>),
    b: &(RangeValue, Option<PrimaryKey>),
) -> Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

fn cursor(item: &Item, attributes: &[&str]) -> Item {
    attributes
        .iter()
        .filter_map(|attribute| {
            item.get(*attribute)
                .map(|value| (attribute.to_string(), value.clone()))
        })
        .collect()
}

impl Engine for MemoryEngine {
    async fn describe_table(&self, table: &str) -> Result<Option<TableState>, Error> {
        self.stall().await;
        let state = self.state.read().await;
        Ok(state.tables.get(table).map(|_| TableState::Active))
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), Error> {
        self.stall().await;
        let mut state = self.state.write().await;
        if std::mem::take(&mut state.fail_next_create_table) {
            return Err(Error::Backend("injected CreateTable failure".into()));
        }
        let _ = state
            .tables
            .entry(schema.table_name.clone())
            .or_insert_with(|| MemoryTable {
                schema: schema.clone(),
                ttl_attribute: None,
                items: BTreeMap::new(),
            });
        Ok(())
    }

    async fn enable_ttl(&self, table: &str, attribute: &str) -> Result<bool, Error> {
        self.stall().await;
        let mut state = self.state.write().await;
        if std::mem::take(&mut state.fail_next_enable_ttl) {
            return Err(Error::Backend("injected UpdateTimeToLive failure".into()));
        }
        let table = state.table_mut(table)?;
        if table.ttl_attribute.as_deref() == Some(attribute) {
            return Ok(false);
        }
        table.ttl_attribute = Some(attribute.to_string());
        Ok(true)
    }

    async fn get_item(&self, table: &str, key: &PrimaryKey) -> Result<Option<Item>, Error> {
        self.stall().await;
        let state = self.state.read().await;
        Ok(state.table(table)?.items.get(key).cloned())
    }

    async fn put_item(&self, table: &str, item: Item, condition: PutCondition) -> Result<(), Error> {
        self.stall().await;
        let key = primary_key(&item)?;
        let mut state = self.state.write().await;

        if let Some((interleaved_table, interleaved)) = state.write_before_next_put.take() {
            let interleaved_key = primary_key(&interleaved)?;
            let _ = state
                .table_mut(&interleaved_table)?
                .items
                .insert(interleaved_key, interleaved);
        }

        let stored = state.table_mut(table)?;
        check_condition(stored.items.get(&key), condition)?;
        let _ = stored.items.insert(key, item);
        state.stats.puts += 1;
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: &PrimaryKey) -> Result<(), Error> {
        self.stall().await;
        let mut state = self.state.write().await;
        let _ = state.table_mut(table)?.items.remove(key);
        Ok(())
    }

    async fn batch_get_item(&self, table: &str, keys: Vec<PrimaryKey>) -> Result<BatchGetOutput, Error> {
        self.stall().await;
        if keys.len() > BATCH_READ_SIZE {
            return Err(Error::Backend(format!(
                "BatchGetItem accepts at most {} keys, got {}",
                BATCH_READ_SIZE,
                keys.len()
            )));
        }
        if keys.iter().collect::<HashSet<_>>().len() != keys.len() {
            return Err(Error::Backend("BatchGetItem keys contain duplicates".into()));
        }

        let mut state = self.state.write().await;
        state.stats.batch_get_sizes.push(keys.len());
        let skipped = countdown(&mut state.unprocessed_batch_get_in).unwrap_or(0);

        let mut keys = keys;
        let unprocessed = keys.split_off(keys.len().saturating_sub(skipped));

        let stored = state.table(table)?;
        let items = keys
            .iter()
            .filter_map(|key| stored.items.get(key).cloned())
            .collect();

        Ok(BatchGetOutput { items, unprocessed })
    }

    async fn batch_write_item(&self, table: &str, ops: Vec<WriteOp>) -> Result<Vec<WriteOp>, Error> {
        self.stall().await;
        if ops.len() > BATCH_WRITE_SIZE {
            return Err(Error::Backend(format!(
                "BatchWriteItem accepts at most {} requests, got {}",
                BATCH_WRITE_SIZE,
                ops.len()
            )));
        }

        let keys = ops
            .iter()
            .map(|op| match op {
                WriteOp::Put(item) => primary_key(item),
                WriteOp::Delete(key) => Ok(key.clone()),
            })
            .collect::<Result<Vec<_>, Error>>()?;
        if keys.iter().collect::<HashSet<_>>().len() != keys.len() {
            return Err(Error::Backend("BatchWriteItem requests contain duplicate keys".into()));
        }

        let mut state = self.state.write().await;
        state.stats.batch_write_sizes.push(ops.len());

        if countdown(&mut state.fail_batch_write_in).is_some() {
            return Err(Error::Backend("injected BatchWriteItem failure".into()));
        }
        let skipped = countdown(&mut state.unprocessed_batch_write_in).unwrap_or(0);

        let mut ops = ops;
        let unprocessed = ops.split_off(ops.len().saturating_sub(skipped));

        let stored = state.table_mut(table)?;
        for (op, key) in ops.into_iter().zip(keys) {
            match op {
                WriteOp::Put(item) => {
                    let _ = stored.items.insert(key, item);
                }
                WriteOp::Delete(_) => {
                    let _ = stored.items.remove(&key);
                }
            }
        }

        Ok(unprocessed)
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryPage, Error> {
        self.stall().await;
        let mut state = self.state.write().await;
        state.stats.query_pages += 1;
        let stored = state.table(&request.table)?;

        let (hash_attribute, range_attribute) = match request.index {
            None => (stored.schema.hash.name, Some(stored.schema.range.name)),
            Some(name) => {
                let index = stored.schema.index(name).ok_or_else(|| {
                    Error::Backend(format!("table {} has no index {}", request.table, name))
                })?;
                (index.hash.name, index.range.map(|range| range.name))
            }
        };
        if hash_attribute != request.hash_attribute {
            return Err(Error::Backend(format!(
                "query must match on {}, got {}",
                hash_attribute, request.hash_attribute
            )));
        }

        let hash_value = AttributeValue::S(request.hash_value.clone());
        let mut matching: Vec<&Item> = stored
            .items
            .values()
            .filter(|item| item.get(hash_attribute) == Some(&hash_value))
            // Index entries exist only for items carrying the range attribute
            .filter(|item| range_attribute.map_or(true, |range| item.contains_key(range)))
            .collect();

        matching.sort_by(|a, b| {
            compare_positions(
                &index_order(a, range_attribute),
                &index_order(b, range_attribute),
            )
        });
        if !request.scan_forward {
            matching.reverse();
        }

        if let Some(start) = &request.exclusive_start_key {
            let start = index_order(start, range_attribute);
            matching.retain(|item| {
                let position = compare_positions(&index_order(item, range_attribute), &start);
                if request.scan_forward {
                    position == Ordering::Greater
                } else {
                    position == Ordering::Less
                }
            });
        }

        let limit = request
            .limit
            .and_then(|limit| usize::try_from(limit).ok())
            .filter(|limit| *limit > 0)
            .map_or(self.page_size, |limit| limit.min(self.page_size));

        let has_more = matching.len() > limit;
        matching.truncate(limit);

        let mut cursor_attributes = vec![PK_ATTRIBUTE, SK_ATTRIBUTE, hash_attribute];
        cursor_attributes.extend(range_attribute);
        let last_evaluated_key = if has_more {
            matching.last().map(|item| cursor(item, &cursor_attributes))
        } else {
            None
        };

        Ok(QueryPage {
            items: matching.into_iter().cloned().collect(),
            last_evaluated_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CREATED_AT_ATTRIBUTE, ENTITY_ID_ATTRIBUTE};
    use crate::schema::{CREATED_AT_INDEX, ENTITY_ID_INDEX};

    const TABLE: &str = "memory_engine_tests";

    fn item(pk: &str, sk: &str, created_at: i64, version: i64) -> Item {
        HashMap::from([
            (PK_ATTRIBUTE.to_string(), AttributeValue::S(pk.into())),
            (SK_ATTRIBUTE.to_string(), AttributeValue::S(sk.into())),
            (ENTITY_ID_ATTRIBUTE.to_string(), AttributeValue::S(sk.into())),
            (CREATED_AT_ATTRIBUTE.to_string(), AttributeValue::N(created_at.to_string())),
            (VERSION_ATTRIBUTE.to_string(), AttributeValue::N(version.to_string())),
        ])
    }

    async fn engine() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .create_table(&TableSchema::for_table(TABLE))
            .await
            .unwrap();
        engine
    }

    fn sort_keys(items: &[Item]) -> Vec<String> {
        items
            .iter()
            .filter_map(PrimaryKey::from_item)
            .map(|key| key.sk)
            .collect()
    }

    #[tokio::test]
    async fn test_missing_table() {
        let engine = MemoryEngine::new();
        assert_eq!(engine.describe_table(TABLE).await.unwrap(), None);
        let err = engine
            .get_item(TABLE, &PrimaryKey::new("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_conditional_put() {
        let engine = engine().await;
        engine
            .put_item(TABLE, item("p", "1", 1, 1), PutCondition::NotExists)
            .await
            .unwrap();

        let err = engine
            .put_item(TABLE, item("p", "1", 1, 1), PutCondition::NotExists)
            .await
            .unwrap_err();
        assert!(err.is_conditional_check_failed());

        let err = engine
            .put_item(TABLE, item("p", "1", 1, 3), PutCondition::VersionEquals(2))
            .await
            .unwrap_err();
        assert!(err.is_conditional_check_failed());

        engine
            .put_item(TABLE, item("p", "1", 1, 2), PutCondition::VersionEquals(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recency_index_order_and_cursor() {
        let engine = engine().await.with_page_size(2);
        for (sk, created_at) in [("a", 30), ("b", 10), ("c", 20), ("d", 40)] {
            engine
                .put_item(TABLE, item("p", sk, created_at, 1), PutCondition::Always)
                .await
                .unwrap();
        }
        engine
            .put_item(TABLE, item("other", "z", 50, 1), PutCondition::Always)
            .await
            .unwrap();

        let request =
            QueryRequest::index(TABLE, CREATED_AT_INDEX, PK_ATTRIBUTE, "p").scan_forward(false);

        let first = engine.query(&request).await.unwrap();
        assert_eq!(sort_keys(&first.items), vec!["d", "a"]);
        assert!(first.last_evaluated_key.is_some());

        let all = engine.query_all(request).await.unwrap();
        assert_eq!(sort_keys(&all), vec!["d", "a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_entity_id_index_spans_partitions() {
        let engine = engine().await;
        engine
            .put_item(TABLE, item("p1", "shared", 1, 1), PutCondition::Always)
            .await
            .unwrap();
        engine
            .put_item(TABLE, item("p2", "shared", 2, 1), PutCondition::Always)
            .await
            .unwrap();

        let request = QueryRequest::index(TABLE, ENTITY_ID_INDEX, ENTITY_ID_ATTRIBUTE, "shared");
        assert_eq!(engine.query_all(request).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let engine = engine().await;
        let ops: Vec<_> = (0..26)
            .map(|i| WriteOp::Put(item("p", &i.to_string(), i, 1)))
            .collect();
        assert!(matches!(
            engine.batch_write_item(TABLE, ops).await,
            Err(Error::Backend(_))
        ));

        let keys: Vec<_> = (0..101)
            .map(|i| PrimaryKey::new("p", i.to_string()))
            .collect();
        assert!(matches!(
            engine.batch_get_item(TABLE, keys).await,
            Err(Error::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_batch_write_failure() {
        let engine = engine().await;
        engine.fail_batch_write_in(2).await;

        let batch = |sk: &str| vec![WriteOp::Put(item("p", sk, 1, 1))];
        engine.batch_write_item(TABLE, batch("1")).await.unwrap();
        assert!(engine.batch_write_item(TABLE, batch("2")).await.is_err());
        engine.batch_write_item(TABLE, batch("3")).await.unwrap();

        assert_eq!(engine.item_count(TABLE).await, 2);
        assert_eq!(engine.stats().await.batch_write_sizes, vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_injected_unprocessed_entries() {
        let engine = engine().await;
        engine.unprocessed_batch_write_in(1, 2).await;

        let ops: Vec<_> = (0..5)
            .map(|i| WriteOp::Put(item("p", &i.to_string(), i, 1)))
            .collect();
        let unprocessed = engine.batch_write_item(TABLE, ops).await.unwrap();
        assert_eq!(unprocessed.len(), 2);
        assert_eq!(engine.item_count(TABLE).await, 3);

        engine.unprocessed_batch_get_in(1, 1).await;
        let keys: Vec<_> = (0..3).map(|i| PrimaryKey::new("p", i.to_string())).collect();
        let output = engine.batch_get_item(TABLE, keys).await.unwrap();
        assert_eq!(output.items.len(), 2);
        assert_eq!(output.unprocessed, vec![PrimaryKey::new("p", "2")]);

        // One-shot: the next call is served in full
        let keys: Vec<_> = (0..3).map(|i| PrimaryKey::new("p", i.to_string())).collect();
        assert!(engine.batch_get_item(TABLE, keys).await.unwrap().unprocessed.is_empty());
    }

    #[tokio::test]
    async fn test_injected_provisioning_failures() {
        let engine = MemoryEngine::new();
        let schema = TableSchema::for_table(TABLE);

        engine.fail_next_create_table().await;
        assert!(matches!(engine.create_table(&schema).await, Err(Error::Backend(_))));
        assert_eq!(engine.describe_table(TABLE).await.unwrap(), None);
        engine.create_table(&schema).await.unwrap();

        engine.fail_next_enable_ttl().await;
        assert!(matches!(engine.enable_ttl(TABLE, "TTL").await, Err(Error::Backend(_))));
        assert_eq!(engine.ttl_attribute(TABLE).await, None);
        assert!(engine.enable_ttl(TABLE, "TTL").await.unwrap());
    }

    #[tokio::test]
    async fn test_delayed_request() {
        let engine = engine().await;
        engine.delay_next_request(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        assert_eq!(engine.get_item(TABLE, &PrimaryKey::new("p", "1")).await.unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(50));

        let started = std::time::Instant::now();
        assert_eq!(engine.get_item(TABLE, &PrimaryKey::new("p", "1")).await.unwrap(), None);
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
