use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::query::builders::QueryFluentBuilder;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, DeleteRequest, GlobalSecondaryIndex, KeySchemaElement,
    KeyType, KeysAndAttributes, Projection, ProjectionType, ProvisionedThroughput, PutRequest,
    ReturnConsumedCapacity, ReturnValue, ScalarAttributeType, Select, TableStatus,
    TimeToLiveSpecification, TimeToLiveStatus, WriteRequest,
};
use aws_sdk_dynamodb::Client;
use aws_config::SdkConfig;
use aws_smithy_types_convert::stream::PaginationStreamExt;
use futures_util::TryStreamExt;

use crate::config::load_sdk_config;
use crate::engine::{
    BatchGetOutput, Engine, Item, PrimaryKey, PutCondition, QueryPage, QueryRequest, TableState,
    WriteOp,
};
use crate::envelope::{PK_ATTRIBUTE, VERSION_ATTRIBUTE};
use crate::error::Error;
use crate::schema::{KeyAttribute, KeyKind, TableSchema};

/// Engine backed by an `aws_sdk_dynamodb::Client`
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct DynamoEngine {
    client: Client,
}

impl DynamoEngine {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an SDK configuration
    pub fn from_config(config: &SdkConfig) -> Self {
        Self::new(Client::new(config))
    }

    /// Build a client from the environment with [`load_sdk_config`]
    pub async fn from_env() -> Self {
        Self::from_config(&load_sdk_config().await)
    }

    /// The wrapped client, for operations outside the repository
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn query_builder(&self, request: &QueryRequest) -> QueryFluentBuilder {
        // Secondary indexes only expose projected attributes
        let select = if request.index.is_some() {
            Select::AllProjectedAttributes
        } else {
            Select::AllAttributes
        };

        self.client
            .query()
            .table_name(&request.table)
            .set_index_name(request.index.map(str::to_string))
            .select(select)
            .set_return_consumed_capacity(None)
            .key_condition_expression("#hash = :hash_value")
            .expression_attribute_names("#hash", request.hash_attribute)
            .expression_attribute_values(":hash_value", AttributeValue::S(request.hash_value.clone()))
            .scan_index_forward(request.scan_forward)
            .set_limit(request.limit)
            .set_exclusive_start_key(request.exclusive_start_key.clone())
    }
}

fn attribute_definition(attribute: KeyAttribute) -> Result<AttributeDefinition, Error> {
    let attribute_type = match attribute.kind {
        KeyKind::String => ScalarAttributeType::S,
        KeyKind::Number => ScalarAttributeType::N,
    };
    Ok(AttributeDefinition::builder()
        .attribute_name(attribute.name)
        .attribute_type(attribute_type)
        .build()?)
}

fn key_schema_element(attribute: KeyAttribute, key_type: KeyType) -> Result<KeySchemaElement, Error> {
    Ok(KeySchemaElement::builder()
        .attribute_name(attribute.name)
        .key_type(key_type)
        .build()?)
}

fn throughput(schema: &TableSchema) -> Result<ProvisionedThroughput, Error> {
    Ok(ProvisionedThroughput::builder()
        .read_capacity_units(schema.read_capacity_units)
        .write_capacity_units(schema.write_capacity_units)
        .build()?)
}

fn write_request(op: WriteOp) -> Result<WriteRequest, Error> {
    Ok(match op {
        WriteOp::Put(item) => WriteRequest::builder()
            .put_request(PutRequest::builder().set_item(Some(item)).build()?)
            .build(),
        WriteOp::Delete(key) => WriteRequest::builder()
            .delete_request(DeleteRequest::builder().set_key(Some(key.to_item())).build()?)
            .build(),
    })
}

fn write_op(request: WriteRequest) -> Option<WriteOp> {
    if let Some(put_request) = request.put_request {
        return Some(WriteOp::Put(put_request.item));
    }
    request
        .delete_request
        .and_then(|delete_request| PrimaryKey::from_item(&delete_request.key))
        .map(WriteOp::Delete)
}

impl Engine for DynamoEngine {
    async fn describe_table(&self, table: &str) -> Result<Option<TableState>, Error> {
        match self.client.describe_table().table_name(table).send().await {
            Ok(output) => {
                let status = output.table.and_then(|description| description.table_status);
                Ok(Some(match status {
                    Some(TableStatus::Active) => TableState::Active,
                    Some(TableStatus::Creating) => TableState::Creating,
                    _ => TableState::Other,
                }))
            }
            Err(e) => {
                if let Some(DescribeTableError::ResourceNotFoundException(_)) = e.as_service_error() {
                    return Ok(None);
                }
                Err(e.into())
            }
        }
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), Error> {
        let mut builder = self
            .client
            .create_table()
            .table_name(&schema.table_name)
            .key_schema(key_schema_element(schema.hash, KeyType::Hash)?)
            .key_schema(key_schema_element(schema.range, KeyType::Range)?)
            .provisioned_throughput(throughput(schema)?);

        for attribute in schema.attribute_definitions() {
            builder = builder.attribute_definitions(attribute_definition(attribute)?);
        }

        for index in &schema.indexes {
            let mut global_secondary_index = GlobalSecondaryIndex::builder()
                .index_name(index.name)
                .key_schema(key_schema_element(index.hash, KeyType::Hash)?)
                .projection(
                    Projection::builder()
                        .projection_type(ProjectionType::All)
                        .build(),
                )
                .provisioned_throughput(throughput(schema)?);

            if let Some(range) = index.range {
                global_secondary_index =
                    global_secondary_index.key_schema(key_schema_element(range, KeyType::Range)?);
            }

            builder = builder.global_secondary_indexes(global_secondary_index.build()?);
        }

        // Another process may have created the table since it was described
        match builder.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(CreateTableError::ResourceInUseException(_)) = e.as_service_error() {
                    return Ok(());
                }
                Err(e.into())
            }
        }
    }

    async fn enable_ttl(&self, table: &str, attribute: &str) -> Result<bool, Error> {
        let current = self
            .client
            .describe_time_to_live()
            .table_name(table)
            .send()
            .await?;

        if let Some(description) = current.time_to_live_description {
            let enabled = matches!(
                description.time_to_live_status,
                Some(TimeToLiveStatus::Enabled | TimeToLiveStatus::Enabling)
            );
            if enabled && description.attribute_name.as_deref() == Some(attribute) {
                return Ok(false);
            }
        }

        let specification = TimeToLiveSpecification::builder()
            .attribute_name(attribute)
            .enabled(true)
            .build()?;

        let _ = self
            .client
            .update_time_to_live()
            .table_name(table)
            .time_to_live_specification(specification)
            .send()
            .await?;

        Ok(true)
    }

    async fn get_item(&self, table: &str, key: &PrimaryKey) -> Result<Option<Item>, Error> {
        let result = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key.to_item()))
            .consistent_read(true)
            .set_return_consumed_capacity(None)
            .send()
            .await?;

        Ok(result.item)
    }

    async fn put_item(&self, table: &str, item: Item, condition: PutCondition) -> Result<(), Error> {
        let mut builder = self
            .client
            .put_item()
            .table_name(table)
            .return_values(ReturnValue::None)
            .return_consumed_capacity(ReturnConsumedCapacity::None)
            .set_item(Some(item));

        builder = match condition {
            PutCondition::Always => builder,
            PutCondition::NotExists => builder
                .condition_expression("attribute_not_exists(#pk)")
                .expression_attribute_names("#pk", PK_ATTRIBUTE),
            PutCondition::VersionEquals(version) => builder
                .condition_expression("#version = :expected_version")
                .expression_attribute_names("#version", VERSION_ATTRIBUTE)
                .expression_attribute_values(
                    ":expected_version",
                    AttributeValue::N(version.to_string()),
                ),
        };

        match builder.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(PutItemError::ConditionalCheckFailedException(_)) = e.as_service_error() {
                    return Err(Error::ConditionFailed);
                }
                Err(e.into())
            }
        }
    }

    async fn delete_item(&self, table: &str, key: &PrimaryKey) -> Result<(), Error> {
        let _ = self
            .client
            .delete_item()
            .table_name(table)
            .set_key(Some(key.to_item()))
            .return_values(ReturnValue::None)
            .send()
            .await?;

        Ok(())
    }

    async fn batch_get_item(&self, table: &str, keys: Vec<PrimaryKey>) -> Result<BatchGetOutput, Error> {
        if keys.is_empty() {
            return Ok(BatchGetOutput::default());
        }

        let keys_and_attributes = KeysAndAttributes::builder()
            .set_keys(Some(keys.iter().map(PrimaryKey::to_item).collect()))
            .consistent_read(true)
            .build()?;

        let output = self
            .client
            .batch_get_item()
            .request_items(table, keys_and_attributes)
            .send()
            .await?;

        let items = output
            .responses
            .and_then(|mut responses| responses.remove(table))
            .unwrap_or_default();

        let unprocessed = output
            .unprocessed_keys
            .and_then(|mut unprocessed| unprocessed.remove(table))
            .map(|keys_and_attributes| {
                keys_and_attributes
                    .keys
                    .iter()
                    .filter_map(PrimaryKey::from_item)
                    .collect()
            })
            .unwrap_or_default();

        Ok(BatchGetOutput { items, unprocessed })
    }

    async fn batch_write_item(&self, table: &str, ops: Vec<WriteOp>) -> Result<Vec<WriteOp>, Error> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let requests = ops
            .into_iter()
            .map(write_request)
            .collect::<Result<Vec<_>, Error>>()?;

        let output = self
            .client
            .batch_write_item()
            .request_items(table, requests)
            .send()
            .await?;

        Ok(output
            .unprocessed_items
            .and_then(|mut unprocessed| unprocessed.remove(table))
            .unwrap_or_default()
            .into_iter()
            .filter_map(write_op)
            .collect())
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryPage, Error> {
        let output = self.query_builder(request).send().await?;

        Ok(QueryPage {
            items: output.items.unwrap_or_default(),
            last_evaluated_key: output.last_evaluated_key,
        })
    }

    async fn query_all(&self, request: QueryRequest) -> Result<Vec<Item>, Error> {
        self.query_builder(&request)
            .into_paginator()
            .items()
            .send()
            .into_stream_03x()
            .map_err(Into::<Error>::into)
            .try_collect()
            .await
    }
}
