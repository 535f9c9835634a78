//! Driver abstraction executing compiled filter and update documents.
//!
//! This module defines the traits the mapping layer talks to. A driver receives
//! raw documents only: compiled filters, compiled updates and serialized models.
//! It never sees expression trees or mutation contexts.
//!
//! # Traits
//!
//! - [`Driver`]: blocking driver interface
//! - [`AsyncDriver`]: async driver interface with the same operations
//! - [`DriverBuilder`] / [`AsyncDriverBuilder`]: factory traits for driver instances
//!
//! # Examples
//!
//! ```ignore
//! use docmap::driver::{Driver, FindOptions};
//! use bson::doc;
//!
//! let driver = MyDriver::new();
//!
//! let inserted = driver.insert_one("users", doc! { "name": "Alice", "age": 30 })?;
//! let adults = driver.find_many(
//!     "users",
//!     doc! { "age": { "$gte": 18 } },
//!     &FindOptions::default(),
//! )?;
//! # Ok::<(), docmap::error::DocMapError>(())
//! ```

use std::fmt::Debug;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::{error::DocMapResult, index::Index};

/// Result of inserting one document.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// The primary key assigned to the inserted document.
    pub inserted_id: Bson,
}

/// Result of inserting several documents.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    /// Primary keys in insertion order.
    pub inserted_ids: Vec<Bson>,
}

/// Result of an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    /// The primary key of a document inserted by an upsert.
    pub upserted_id: Option<Bson>,
}

/// Result of a delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Options of a multi-document find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort document such as `{"age": -1}`; empty means natural order.
    pub sort: Document,
    /// Number of matching documents to skip.
    pub skip: u64,
    /// Maximum number of documents to return; `0` means unbounded.
    pub limit: u64,
}

/// Options of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document built from the filter and update when nothing matches.
    pub upsert: bool,
    /// Update every matching document instead of only the first.
    pub multi: bool,
}

/// Blocking interface to a document database.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; workers borrow a driver and may be
/// used from several threads at once.
///
/// # Error Handling
///
/// Failures are reported as [`DocMapError::Driver`](crate::error::DocMapError::Driver)
/// and propagated to callers unmodified. The mapping layer never retries.
pub trait Driver: Send + Sync + Debug {
    /// Opens the connection. Returns whether the driver is usable.
    fn connect(&self) -> DocMapResult<bool>;

    /// Closes the connection.
    fn close(&self) -> DocMapResult<()>;

    /// Inserts one document into a collection.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection name. Created on first insert.
    /// * `document` - The serialized model. A primary key is generated when absent.
    ///
    /// # Returns
    ///
    /// The primary key of the stored document.
    fn insert_one(&self, collection: &str, document: Document) -> DocMapResult<InsertOneResult>;

    /// Inserts several documents into a collection.
    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocMapResult<InsertManyResult>;

    /// Returns the first document matching `filter`, if any.
    fn find_one(&self, collection: &str, filter: Document) -> DocMapResult<Option<Document>>;

    /// Returns every document matching `filter`, sorted, skipped and limited per `options`.
    fn find_many(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> DocMapResult<Vec<Document>>;

    /// Applies an update document to the first (or, with `multi`, every) matching document.
    ///
    /// # Arguments
    ///
    /// * `filter` - The compiled filter document
    /// * `update` - An update document made only of operators (`$set`, `$inc`, ...)
    /// * `options` - Upsert and multi-document flags
    fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocMapResult<UpdateResult>;

    /// Deletes the first document matching `filter`.
    fn delete_one(&self, collection: &str, filter: Document) -> DocMapResult<DeleteResult>;

    /// Counts the documents matching `filter`.
    fn count(&self, collection: &str, filter: Document) -> DocMapResult<u64>;

    /// Returns whether any document matches `filter`.
    fn exists(&self, collection: &str, filter: Document) -> DocMapResult<bool>;

    /// Creates an index. Creating an index that already exists is not an error.
    fn create_index(&self, collection: &str, index: &Index) -> DocMapResult<()>;
}

impl<D> Driver for &D
where
    D: Driver,
{
    fn connect(&self) -> DocMapResult<bool> {
        (*self).connect()
    }

    fn close(&self) -> DocMapResult<()> {
        (*self).close()
    }

    fn insert_one(&self, collection: &str, document: Document) -> DocMapResult<InsertOneResult> {
        (*self).insert_one(collection, document)
    }

    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocMapResult<InsertManyResult> {
        (*self).insert_many(collection, documents)
    }

    fn find_one(&self, collection: &str, filter: Document) -> DocMapResult<Option<Document>> {
        (*self).find_one(collection, filter)
    }

    fn find_many(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> DocMapResult<Vec<Document>> {
        (*self).find_many(collection, filter, options)
    }

    fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocMapResult<UpdateResult> {
        (*self).update_one(collection, filter, update, options)
    }

    fn delete_one(&self, collection: &str, filter: Document) -> DocMapResult<DeleteResult> {
        (*self).delete_one(collection, filter)
    }

    fn count(&self, collection: &str, filter: Document) -> DocMapResult<u64> {
        (*self).count(collection, filter)
    }

    fn exists(&self, collection: &str, filter: Document) -> DocMapResult<bool> {
        (*self).exists(collection, filter)
    }

    fn create_index(&self, collection: &str, index: &Index) -> DocMapResult<()> {
        (*self).create_index(collection, index)
    }
}

/// Async interface to a document database.
///
/// Mirrors [`Driver`] operation for operation; driver calls are the only
/// suspension points of the async workers.
#[async_trait]
pub trait AsyncDriver: Send + Sync + Debug {
    async fn connect(&self) -> DocMapResult<bool>;

    async fn close(&self) -> DocMapResult<()>;

    async fn insert_one(&self, collection: &str, document: Document) -> DocMapResult<InsertOneResult>;

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocMapResult<InsertManyResult>;

    async fn find_one(&self, collection: &str, filter: Document) -> DocMapResult<Option<Document>>;

    async fn find_many(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> DocMapResult<Vec<Document>>;

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocMapResult<UpdateResult>;

    async fn delete_one(&self, collection: &str, filter: Document) -> DocMapResult<DeleteResult>;

    async fn count(&self, collection: &str, filter: Document) -> DocMapResult<u64>;

    async fn exists(&self, collection: &str, filter: Document) -> DocMapResult<bool>;

    async fn create_index(&self, collection: &str, index: &Index) -> DocMapResult<()>;
}

#[async_trait]
impl<D> AsyncDriver for &D
where
    D: AsyncDriver,
{
    async fn connect(&self) -> DocMapResult<bool> {
        (*self).connect().await
    }

    async fn close(&self) -> DocMapResult<()> {
        (*self).close().await
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocMapResult<InsertOneResult> {
        (*self)
            .insert_one(collection, document)
            .await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocMapResult<InsertManyResult> {
        (*self)
            .insert_many(collection, documents)
            .await
    }

    async fn find_one(&self, collection: &str, filter: Document) -> DocMapResult<Option<Document>> {
        (*self)
            .find_one(collection, filter)
            .await
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> DocMapResult<Vec<Document>> {
        (*self)
            .find_many(collection, filter, options)
            .await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocMapResult<UpdateResult> {
        (*self)
            .update_one(collection, filter, update, options)
            .await
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocMapResult<DeleteResult> {
        (*self)
            .delete_one(collection, filter)
            .await
    }

    async fn count(&self, collection: &str, filter: Document) -> DocMapResult<u64> {
        (*self)
            .count(collection, filter)
            .await
    }

    async fn exists(&self, collection: &str, filter: Document) -> DocMapResult<bool> {
        (*self)
            .exists(collection, filter)
            .await
    }

    async fn create_index(&self, collection: &str, index: &Index) -> DocMapResult<()> {
        (*self)
            .create_index(collection, index)
            .await
    }
}

/// Factory for blocking drivers.
pub trait DriverBuilder {
    type Driver: Driver;

    fn build(self) -> DocMapResult<Self::Driver>;
}

/// Factory for async drivers.
#[async_trait]
pub trait AsyncDriverBuilder {
    type Driver: AsyncDriver;

    async fn build(self) -> DocMapResult<Self::Driver>;
}
