//! fdkv-core: a relational query engine with functional-dependency
//! enforcement, layered over a Redis-compatible key-value store.
//!
//! ## Key Components
//!
//! - [`Core`]: the embedding API — insert, delete, select, clean_store.
//! - [`MetadataStore`]/[`TableDefinition`]: the schema catalog and its
//!   declared functional dependencies.
//! - [`KeyPolicy`]: canonicalizes a field valuation into a key-space
//!   identifier (plain JSON, or a SHA-256 digest of it).
//! - [`Selector`]: a projection/join/predicate query, with its derived
//!   fields computed once at construction.
//! - [`KvConnection`]: the backend — a real connection, or an in-memory
//!   fake for tests that don't need a live server.

mod backend;
mod condition;
mod config;
mod core;
mod delete;
mod error;
mod insert;
mod iterator;
mod key_policy;
mod query;
mod record;
mod schema;
mod scripts;
mod selector;

pub use backend::KvConnection;
pub use condition::Condition;
pub use config::{CoreConfiguration, DeleteType, InsertType, JoiningAlgorithm, KeyPolicyType, ListRecordsType};
pub use core::Core;
pub use error::{CoreError, Result};
pub use key_policy::KeyPolicy;
pub use record::TableRecord;
pub use schema::{FieldDefinition, FieldDescriptor, FunctionalDependency, MetadataStore, TableDefinition, TableDescriptor};
pub use selector::{JoinStatement, ResultRow, Selector};
