//! In-memory mock drivers for docmap.
//!
//! This crate provides [`MockDriver`] and [`AsyncMockDriver`], complete
//! implementations of the docmap driver traits backed by a process-local
//! [`MemoryStore`]. They evaluate the same compiled filter and update documents
//! a database would receive, and they log every call for inspection.
//!
//! # Features
//!
//! - **Query evaluation** - comparison, membership, array, existence, regex and logical operators
//! - **Update operators** - `$set`, `$unset`, `$inc`, `$mul`, `$max`, `$min`, `$push`,
//!   `$addToSet`, `$pull` and `$pop` with upsert seeding
//! - **Sorting and paging** - multi-key sorts, skip and limit
//! - **Unique indexes** - enforced on insert and update
//! - **Operation log** - every call recorded as a [`DriverOp`]
//!
//! # Quick Start
//!
//! ```ignore
//! use docmap::{collection::as_collection, memory::MockDriver};
//!
//! let driver = MockDriver::new();
//! let users = as_collection::<User, _>(&driver);
//!
//! let adults = users.find(users.field("age")?.gte(18)).all()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_memory;

pub mod driver;
mod evaluator;
pub mod store;
mod update;

pub use driver::{AsyncMockDriver, AsyncMockDriverBuilder, DriverOp, MockDriver, MockDriverBuilder};
pub use store::MemoryStore;
