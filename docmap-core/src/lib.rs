//! An object-document mapping layer that turns plain serde structs into queryable,
//! mutable documents without a persistence base type.
//!
//! This crate is the core of the docmap project and provides:
//!
//! - **Schema introspection** ([`schema`]) - Field descriptor tables built once per model type
//! - **Field proxies** ([`field`]) - Attribute access that yields comparisons, sort keys and mutations
//! - **Expression trees** ([`expr`]) - Logical filter trees compiled to canonical filter documents
//! - **Mutation tracking** ([`mutation`]) - Scope-local update accumulation compiled to update documents
//! - **Index declarations** ([`index`]) - Field-level index definitions materialized lazily
//! - **Driver abstraction** ([`driver`]) - Blocking and async traits that execute raw documents
//! - **Collection workers** ([`collection`]) - Query builders with terminal operations
//! - **Document workers** ([`document`]) - Model instances with primary-key tracking
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docmap::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Model)]
//! pub struct User {
//!     pub name: String,
//!     pub age: i32,
//!     pub tags: Vec<String>,
//! }
//!
//! let driver = MockDriver::new();
//! let users = as_collection::<User, _>(&driver);
//!
//! let adults = users
//!     .find(users.field("age")?.gte(18) & users.array("tags")?.contains("staff"))
//!     .sort(-users.field("age")?)
//!     .limit(10)
//!     .all()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_core;

pub mod collection;
pub mod document;
pub mod driver;
pub mod error;
pub mod expr;
pub mod field;
pub mod index;
pub mod mutation;
pub mod schema;
