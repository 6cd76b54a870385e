//! # DynamoDB Partitioned Repository
//!
//! A typed repository that maps entities of many types onto one DynamoDB table with
//! support for:
//! - Partitioned keys: `PK = <ENTITY_TYPE>#<scope>`, `SK = <id>`
//! - Optimistic versioning with conditional writes
//! - Batch reads and writes chunked to the service limits
//! - Field filters evaluated over the stored payload
//! - Page/size pagination over cursor-based queries
//! - TTL-based expiry, honoured on every read
//!
//! ## Features
//!
//! - **Type-safe**: entities implement [`Entity`] and are stored with `serde`
//! - **Async-first**: built on `tokio` and `aws-sdk-dynamodb`
//! - **No global state**: each repository owns its engine and [`RepositoryConfig`]
//! - **Pluggable engine**: [`DynamoEngine`] for DynamoDB, [`MemoryEngine`] for tests
//! - **Self-provisioning**: creates the table, its indexes and TTL on startup
//!
//! ## Quick Start
//!
//! ```rust
//! use dynamo_repository::{Entity, Error, Filter, MemoryEngine, PageRequest, Repository, RepositoryConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Task {
//!     id: String,
//!     title: String,
//!     done: bool,
//! }
//!
//! impl Entity for Task {
//!     const ENTITY_TYPE: &'static str = "Task";
//!
//!     fn id(&self) -> String {
//!         self.id.clone()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let tasks: Repository<Task, MemoryEngine> =
//!         Repository::new(MemoryEngine::new(), RepositoryConfig::new("app")).await?;
//!
//!     let task = Task { id: "t-1".into(), title: "Write docs".into(), done: false };
//!     let stored = tasks.save(&task, "alice").await?;
//!     assert_eq!(stored.pk, "Task#alice");
//!     assert_eq!(stored.version, 1);
//!
//!     assert_eq!(tasks.find_by_id("t-1", "alice").await?, task);
//!     assert!(tasks.exists_by(Filter::eq("done", false), "alice").await?);
//!
//!     let page = tasks.find_all_paginated(&PageRequest::new(1, 10), "alice").await?;
//!     assert_eq!(page.total_elements, 1);
//!     Ok(())
//! }
//! ```
#![deny(
    bad_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    unknown_lints,
    unreachable_code
)]
#![warn(
    dead_code,
    unused,
    unused_mut,
    deprecated,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]

mod error;
pub use error::Error;

/// Repository configuration and AWS client settings
pub mod config;

/// Storage engines
pub mod engine;

/// Stored record layout
pub mod envelope;

/// Field predicates
pub mod filter;

/// Entity capability and key mapping
pub mod keys;

/// Page requests and responses
pub mod page;

/// Table layout and provisioning
pub mod schema;

mod repository;

// Re-export main types for convenience
pub use config::{load_sdk_config, RepositoryConfig, Timeouts};
pub use engine::{DynamoEngine, Engine, MemoryEngine};
pub use envelope::Envelope;
pub use filter::{Filter, Filters, Operator};
pub use keys::Entity;
pub use page::{PageRequest, PageResponse, SortField};
pub use repository::Repository;

// Re-export aws-config types for configuration
pub use aws_config::{BehaviorVersion, Region, SdkConfig};
