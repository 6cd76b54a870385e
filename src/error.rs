use aws_sdk_dynamodb::error::BuildError;
use aws_sdk_dynamodb::operation::batch_get_item::BatchGetItemError;
use aws_sdk_dynamodb::operation::batch_write_item::BatchWriteItemError;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
use aws_sdk_dynamodb::operation::describe_time_to_live::DescribeTimeToLiveError;
use aws_sdk_dynamodb::operation::get_item::GetItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::query::QueryError;
use aws_sdk_dynamodb::operation::update_time_to_live::UpdateTimeToLiveError;
use aws_sdk_dynamodb::types::error::ConditionalCheckFailedException;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use serde_dynamo::Error as SerdeDynamoError;
use serde_json::Error as PayloadError;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

type DynamoPutError = SdkError<PutItemError, Response>;
type DynamoGetError = SdkError<GetItemError, Response>;
type DynamoQueryError = SdkError<QueryError, Response>;
type DynamoDeleteItemError = SdkError<DeleteItemError, Response>;
type DynamoCreateTableError = SdkError<CreateTableError, Response>;
type DynamoDescribeTableError = SdkError<DescribeTableError, Response>;
type DynamoDescribeTimeToLiveError = SdkError<DescribeTimeToLiveError, Response>;
type DynamoUpdateTimeToLiveError = SdkError<UpdateTimeToLiveError, Response>;
type DynamoBatchWriteItemError = SdkError<BatchWriteItemError, Response>;
type DynamoBatchGetItemError = SdkError<BatchGetItemError, Response>;
type DynamoDbError = SdkError<aws_sdk_dynamodb::Error, Response>;

/// Repository operation error
#[derive(Debug)]
pub enum Error {
    /// No live item exists for the requested key
    NotFound {
        /// Declared entity type name
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },
    /// No live item in a partition satisfied a filtered lookup
    NoMatch {
        /// Declared entity type name
        entity: &'static str,
        /// Scope that was searched
        scope: String,
    },
    /// Entity or repository configuration is unusable
    Configuration(String),
    /// The entity returned an empty identifier
    MissingId {
        /// Declared entity type name
        entity: &'static str,
    },
    /// Optimistic write lost against a concurrent writer
    Conflict {
        /// Partition key of the contested item
        pk: String,
        /// Sort key of the contested item
        sk: String,
        /// Version the write expected to replace, `None` when it expected no item
        expected_version: Option<i64>,
    },
    /// Engine-level write condition failed
    ConditionFailed,
    /// Batch request left entries unprocessed; they are not retried
    Unprocessed {
        /// Operation that returned the entries
        operation: &'static str,
        /// Number of entries left unprocessed
        count: usize,
    },
    /// Operation exceeded its time bound
    Timeout {
        /// Operation name
        operation: &'static str,
        /// Bound that elapsed
        after: Duration,
    },
    /// Table provisioning failed at startup
    Provisioning {
        /// Table being provisioned
        table: String,
        /// Underlying failure
        source: Box<Error>,
    },
    /// Malformed page request
    InvalidPageRequest(String),
    /// Table does not exist (in-memory engine)
    ResourceNotFound(String),
    /// Engine failure not originating from the AWS SDK
    Backend(String),
    /// Entity payload JSON encoding or decoding error
    Payload(PayloadError),
    /// Serde DynamoDB serialization/deserialization error
    SerdeDynamo(SerdeDynamoError),
    /// Generic DynamoDB SDK error
    DynamoDB(DynamoDbError),
    /// DynamoDB request builder error
    BuildError(BuildError),
    /// DynamoDB PutItem operation error
    DynamoPutError(DynamoPutError),
    /// DynamoDB GetItem operation error
    DynamoGetError(DynamoGetError),
    /// DynamoDB Query operation error
    DynamoQueryError(DynamoQueryError),
    /// DynamoDB DeleteItem operation error
    DynamoDeleteItemError(DynamoDeleteItemError),
    /// DynamoDB CreateTable operation error
    DynamoCreateTableError(DynamoCreateTableError),
    /// DynamoDB DescribeTable operation error
    DynamoDescribeTableError(DynamoDescribeTableError),
    /// DynamoDB DescribeTimeToLive operation error
    DynamoDescribeTimeToLiveError(DynamoDescribeTimeToLiveError),
    /// DynamoDB UpdateTimeToLive operation error
    DynamoUpdateTimeToLiveError(DynamoUpdateTimeToLiveError),
    /// DynamoDB BatchWriteItem operation error
    DynamoBatchWriteItemError(DynamoBatchWriteItemError),
    /// DynamoDB BatchGetItem operation error
    DynamoBatchGetItemError(DynamoBatchGetItemError),
}

impl Error {
    /// Check if the error is an empty read, by key or by filter
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::NoMatch { .. })
    }

    /// Check if the error is an optimistic concurrency conflict
    ///
    /// The caller may re-read the entity and retry the write.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if the error is a failed write condition
    ///
    /// Covers the DynamoDB `ConditionalCheckFailedException` on PutItem and the
    /// equivalent failure reported by the in-memory engine.
    ///
    /// # Example
    /// ```no_run
    /// # use dynamo_repository::Error;
    /// # async fn example(error: Error) {
    /// if error.is_conditional_check_failed() {
    ///     println!("Item was modified by another process");
    /// }
    /// # }
    /// ```
    pub fn is_conditional_check_failed(&self) -> bool {
        match self {
            Error::ConditionFailed => true,
            Error::DynamoPutError(dynamo_err) => matches!(
                dynamo_err.as_service_error(),
                Some(PutItemError::ConditionalCheckFailedException(
                    ConditionalCheckFailedException { .. }
                ))
            ),
            _ => false,
        }
    }

    /// Check if the error is a serialization/deserialization error
    ///
    /// Returns `true` for envelope and payload encoding errors.
    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Error::SerdeDynamo(_) | Error::Payload(_))
    }

    /// Check if the error came from the DynamoDB SDK
    pub fn is_dynamodb_error(&self) -> bool {
        matches!(
            self,
            Error::DynamoDB(_)
                | Error::BuildError(_)
                | Error::DynamoPutError(_)
                | Error::DynamoGetError(_)
                | Error::DynamoQueryError(_)
                | Error::DynamoDeleteItemError(_)
                | Error::DynamoCreateTableError(_)
                | Error::DynamoDescribeTableError(_)
                | Error::DynamoDescribeTimeToLiveError(_)
                | Error::DynamoUpdateTimeToLiveError(_)
                | Error::DynamoBatchWriteItemError(_)
                | Error::DynamoBatchGetItemError(_)
        )
    }
}

macro_rules! impl_from_error {
    ($name:ident, $variant:ident) => {
        impl From<$name> for Error {
            fn from(e: $name) -> Self {
                Error::$variant(e)
            }
        }
    };
    ($name:ident) => {
        impl From<$name> for Error {
            fn from(e: $name) -> Self {
                Error::$name(e)
            }
        }
    };
}

impl_from_error!(SerdeDynamoError, SerdeDynamo);
impl_from_error!(PayloadError, Payload);
impl_from_error!(DynamoDbError, DynamoDB);
impl_from_error!(BuildError);
impl_from_error!(DynamoPutError);
impl_from_error!(DynamoGetError);
impl_from_error!(DynamoQueryError);
impl_from_error!(DynamoDeleteItemError);
impl_from_error!(DynamoCreateTableError);
impl_from_error!(DynamoDescribeTableError);
impl_from_error!(DynamoDescribeTimeToLiveError);
impl_from_error!(DynamoUpdateTimeToLiveError);
impl_from_error!(DynamoBatchWriteItemError);
impl_from_error!(DynamoBatchGetItemError);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            Error::NoMatch { entity, scope } => {
                write!(f, "No {} in scope {} matches the filters", entity, scope)
            }
            Error::Configuration(msg) => write!(f, "Repository configuration error: {}", msg),
            Error::MissingId { entity } => write!(f, "{} has an empty identifier", entity),
            Error::Conflict {
                pk,
                sk,
                expected_version,
            } => match expected_version {
                Some(version) => write!(
                    f,
                    "Conflicting write on {}/{}: expected version {}",
                    pk, sk, version
                ),
                None => write!(f, "Conflicting write on {}/{}: item already exists", pk, sk),
            },
            Error::ConditionFailed => write!(f, "Write condition failed"),
            Error::Unprocessed { operation, count } => {
                write!(f, "{} left {} entries unprocessed", operation, count)
            }
            Error::Timeout { operation, after } => {
                write!(f, "{} timed out after {:?}", operation, after)
            }
            Error::Provisioning { table, source } => {
                write!(f, "Provisioning table {} failed: {}", table, source)
            }
            Error::InvalidPageRequest(msg) => write!(f, "Invalid page request: {}", msg),
            Error::ResourceNotFound(table) => write!(f, "Table not found: {}", table),
            Error::Backend(msg) => write!(f, "Storage engine error: {}", msg),
            Error::Payload(e) => write!(f, "Payload encoding error: {}", e),
            Error::SerdeDynamo(e) => write!(f, "DynamoDB serialization error: {}", e),
            Error::DynamoDB(e) => write!(f, "DynamoDB operation error: {}", e),
            Error::BuildError(e) => write!(f, "DynamoDB request builder error: {}", e),
            Error::DynamoPutError(e) => {
                write!(f, "DynamoDB PutItem operation failed: {}", e)
            }
            Error::DynamoGetError(e) => {
                write!(f, "DynamoDB GetItem operation failed: {}", e)
            }
            Error::DynamoQueryError(e) => {
                write!(f, "DynamoDB Query operation failed: {}", e)
            }
            Error::DynamoDeleteItemError(e) => {
                write!(f, "DynamoDB DeleteItem operation failed: {}", e)
            }
            Error::DynamoCreateTableError(e) => {
                write!(f, "DynamoDB CreateTable operation failed: {}", e)
            }
            Error::DynamoDescribeTableError(e) => {
                write!(f, "DynamoDB DescribeTable operation failed: {}", e)
            }
            Error::DynamoDescribeTimeToLiveError(e) => {
                write!(f, "DynamoDB DescribeTimeToLive operation failed: {}", e)
            }
            Error::DynamoUpdateTimeToLiveError(e) => {
                write!(f, "DynamoDB UpdateTimeToLive operation failed: {}", e)
            }
            Error::DynamoBatchWriteItemError(e) => {
                write!(f, "DynamoDB BatchWriteItem operation failed: {}", e)
            }
            Error::DynamoBatchGetItemError(e) => {
                write!(f, "DynamoDB BatchGetItem operation failed: {}", e)
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Provisioning { source, .. } => Some(source.as_ref()),
            Error::Payload(e) => Some(e),
            Error::SerdeDynamo(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_serialization_error() {
        let err = Error::BuildError(BuildError::other("test"));
        assert!(!err.is_serialization_error());

        let payload = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(Error::from(payload).is_serialization_error());
    }

    #[test]
    fn test_is_dynamodb_error() {
        let err = Error::BuildError(BuildError::other("test"));
        assert!(err.is_dynamodb_error());
        assert!(!Error::ConditionFailed.is_dynamodb_error());
    }

    #[test]
    fn test_error_conversion() {
        let build_err = BuildError::other("test");
        let err: Error = build_err.into();
        assert!(matches!(err, Error::BuildError(_)));
    }

    #[test]
    fn test_condition_failed_is_conditional_check() {
        assert!(Error::ConditionFailed.is_conditional_check_failed());
        assert!(!Error::Backend("boom".into()).is_conditional_check_failed());
    }

    #[test]
    fn test_conflict_display() {
        let err = Error::Conflict {
            pk: "Order#tenant".into(),
            sk: "o-1".into(),
            expected_version: Some(3),
        };
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "Conflicting write on Order#tenant/o-1: expected version 3"
        );
    }

    #[test]
    fn test_no_match_display() {
        let err = Error::NoMatch {
            entity: "Order",
            scope: "tenant".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "No Order in scope tenant matches the filters");
    }

    #[test]
    fn test_provisioning_exposes_source() {
        let err = Error::Provisioning {
            table: "entities".into(),
            source: Box::new(Error::ResourceNotFound("entities".into())),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("Table not found: entities"));
    }
}
