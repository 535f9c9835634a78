//! Main docmap crate providing object-document mapping over plain serde structs.
//!
//! This crate is the primary entry point for users of the docmap framework. It
//! re-exports the core types from `docmap-core`, the `#[derive(Model)]` macro and
//! the in-memory mock drivers.
//!
//! # Features
//!
//! - **No base type** - Any `Serialize + Deserialize` struct becomes a model with one derive
//! - **Field proxies** - Build filters with `users.field("age")?.gte(18)` and combine them with `&`, `|`, `!`
//! - **Tracked mutations** - `age += 1` records `$inc` in the current scope; `mutate()` sends it
//! - **Blocking and async** - Every worker exists over [`driver::Driver`] and [`driver::AsyncDriver`]
//! - **Mock drivers** - In-memory drivers with an operation log for tests
//!
//! # Quick Start
//!
//! ```ignore
//! use docmap::{prelude::*, memory::MockDriver};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Model)]
//! pub struct User {
//!     pub name: String,
//!     pub age: i32,
//! }
//!
//! fn main() -> DocMapResult<()> {
//!     let driver = MockDriver::new();
//!
//!     // Insert a document
//!     let mut alice = as_document(User { name: "Alice".into(), age: 30 }, &driver);
//!     alice.save()?;
//!
//!     // Query it back
//!     let users = as_collection::<User, _>(&driver);
//!     let found = users.find(users.field("name")?.eq("Alice")).first()?;
//!
//!     // Increment every adult's age
//!     let mut age = users.field("age")?;
//!     age += 1;
//!     users.find(age.gte(18)).scoped().mutate()?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Mutation Scopes
//!
//! Pending mutations belong to the current thread, or to the current task inside
//! [`mutation::task_scope`]. Every builder created in a scope shares them, so
//! mutations recorded for one query are sent by the next `mutate()` in the same
//! scope unless they are cleared first. Use `.scoped()` on a builder, or
//! [`mutation::scope`], to clear them automatically.
//!
//! ```ignore
//! use docmap::{prelude::*, memory::AsyncMockDriver};
//!
//! let driver = AsyncMockDriver::new();
//!
//! task_scope(async {
//!     let users = as_async_collection::<User, _>(&driver);
//!     users.field("age")?.inc(1)?;
//!     users.find_all().scoped().mutate().await
//! })
//! .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap;

pub mod prelude;

pub use docmap_core::{collection, document, driver, error, expr, field, index, mutation, schema};

pub use docmap_core::document::Model;
pub use docmap_macros::Model;

// Re-export BSON types for convenience
pub use bson;

pub use async_trait::async_trait;

/// In-memory mock drivers.
pub mod memory {
    pub use docmap_memory::{
        AsyncMockDriver, AsyncMockDriverBuilder, DriverOp, MemoryStore, MockDriver, MockDriverBuilder,
    };
}
