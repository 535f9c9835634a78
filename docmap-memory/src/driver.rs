//! Blocking and async mock drivers over a [`MemoryStore`].
//!
//! Both drivers record every call in an operation log so tests can assert on
//! exactly what the mapping layer sent, e.g. that `save()` on a persisted
//! document issued an update filtered by `_id`.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock as AsyncRwLock;
use parking_lot::{Mutex, RwLock};

use docmap_core::{
    driver::{
        AsyncDriver, AsyncDriverBuilder, DeleteResult, Driver, DriverBuilder, FindOptions,
        InsertManyResult, InsertOneResult, UpdateOptions, UpdateResult,
    },
    error::DocMapResult,
    index::Index,
};

use crate::store::MemoryStore;

/// One recorded driver call, with the documents exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverOp {
    Connect,
    Close,
    InsertOne {
        collection: String,
        document: Document,
    },
    InsertMany {
        collection: String,
        documents: Vec<Document>,
    },
    FindOne {
        collection: String,
        filter: Document,
    },
    FindMany {
        collection: String,
        filter: Document,
        options: FindOptions,
    },
    UpdateOne {
        collection: String,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    },
    DeleteOne {
        collection: String,
        filter: Document,
    },
    Count {
        collection: String,
        filter: Document,
    },
    Exists {
        collection: String,
        filter: Document,
    },
    CreateIndex {
        collection: String,
        index: Index,
    },
}

impl DriverOp {
    /// The collection the call targeted, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            DriverOp::Connect | DriverOp::Close => None,
            DriverOp::InsertOne { collection, .. }
            | DriverOp::InsertMany { collection, .. }
            | DriverOp::FindOne { collection, .. }
            | DriverOp::FindMany { collection, .. }
            | DriverOp::UpdateOne { collection, .. }
            | DriverOp::DeleteOne { collection, .. }
            | DriverOp::Count { collection, .. }
            | DriverOp::Exists { collection, .. }
            | DriverOp::CreateIndex { collection, .. } => Some(collection),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct OperationLog(Arc<Mutex<Vec<DriverOp>>>);

impl OperationLog {
    fn record(&self, op: DriverOp) {
        tracing::trace!(?op, "mock driver call");
        self.0.lock().push(op);
    }

    fn snapshot(&self) -> Vec<DriverOp> {
        self.0.lock().clone()
    }

    fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Documents and indexes a mock driver starts with.
#[derive(Debug, Clone, Default)]
struct Seed {
    documents: Vec<(String, Document)>,
    indexes: Vec<(String, Index)>,
}

impl Seed {
    fn into_store(self) -> DocMapResult<MemoryStore> {
        let mut store = MemoryStore::new();

        for (collection, index) in &self.indexes {
            store.create_index(collection, index)?;
        }
        for (collection, document) in self.documents {
            store.insert(&collection, document)?;
        }

        Ok(store)
    }
}

/// In-memory implementation of the blocking [`Driver`].
///
/// Clones share the same store and operation log.
///
/// ```ignore
/// use docmap::{memory::MockDriver, driver::DriverBuilder};
/// use bson::doc;
///
/// let driver = MockDriver::builder()
///     .with_document("users", doc! { "name": "Alice", "age": 30 })
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    store: Arc<RwLock<MemoryStore>>,
    log: OperationLog,
    connected: Arc<AtomicBool>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::default()
    }

    /// Every call received so far, oldest first.
    pub fn operations(&self) -> Vec<DriverOp> {
        self.log.snapshot()
    }

    pub fn clear_operations(&self) {
        self.log.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stored documents of a collection, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.store.read().documents(collection)
    }

    pub fn indexes(&self, collection: &str) -> Vec<Index> {
        self.store.read().indexes(collection)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.store.read().collection_names()
    }
}

impl Driver for MockDriver {
    fn connect(&self) -> DocMapResult<bool> {
        self.log.record(DriverOp::Connect);
        self.connected.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn close(&self) -> DocMapResult<()> {
        self.log.record(DriverOp::Close);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn insert_one(&self, collection: &str, document: Document) -> DocMapResult<InsertOneResult> {
        self.log.record(DriverOp::InsertOne {
            collection: collection.to_string(),
            document: document.clone(),
        });

        let inserted_id = self.store.write().insert(collection, document)?;
        Ok(InsertOneResult { inserted_id })
    }

    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocMapResult<InsertManyResult> {
        self.log.record(DriverOp::InsertMany {
            collection: collection.to_string(),
            documents: documents.clone(),
        });

        let mut store = self.store.write();
        let inserted_ids = documents
            .into_iter()
            .map(|document| store.insert(collection, document))
            .collect::<DocMapResult<Vec<Bson>>>()?;

        Ok(InsertManyResult { inserted_ids })
    }

    fn find_one(&self, collection: &str, filter: Document) -> DocMapResult<Option<Document>> {
        self.log.record(DriverOp::FindOne {
            collection: collection.to_string(),
            filter: filter.clone(),
        });

        self.store.read().find_one(collection, &filter)
    }

    fn find_many(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> DocMapResult<Vec<Document>> {
        self.log.record(DriverOp::FindMany {
            collection: collection.to_string(),
            filter: filter.clone(),
            options: options.clone(),
        });

        self.store.read().find(collection, &filter, options)
    }

    fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocMapResult<UpdateResult> {
        self.log.record(DriverOp::UpdateOne {
            collection: collection.to_string(),
            filter: filter.clone(),
            update: update.clone(),
            options,
        });

        self.store.write().update(collection, &filter, &update, options)
    }

    fn delete_one(&self, collection: &str, filter: Document) -> DocMapResult<DeleteResult> {
        self.log.record(DriverOp::DeleteOne {
            collection: collection.to_string(),
            filter: filter.clone(),
        });

        self.store.write().delete_one(collection, &filter)
    }

    fn count(&self, collection: &str, filter: Document) -> DocMapResult<u64> {
        self.log.record(DriverOp::Count {
            collection: collection.to_string(),
            filter: filter.clone(),
        });

        self.store.read().count(collection, &filter)
    }

    fn exists(&self, collection: &str, filter: Document) -> DocMapResult<bool> {
        self.log.record(DriverOp::Exists {
            collection: collection.to_string(),
            filter: filter.clone(),
        });

        Ok(self.store.read().find_one(collection, &filter)?.is_some())
    }

    fn create_index(&self, collection: &str, index: &Index) -> DocMapResult<()> {
        self.log.record(DriverOp::CreateIndex {
            collection: collection.to_string(),
            index: index.clone(),
        });

        tracing::debug!(collection, index = %index.name(), "creating index");
        self.store.write().create_index(collection, index)
    }
}

/// Builder for [`MockDriver`] with seeded documents and indexes.
#[derive(Debug, Clone, Default)]
pub struct MockDriverBuilder {
    seed: Seed,
}

impl MockDriverBuilder {
    pub fn with_document(mut self, collection: impl Into<String>, document: Document) -> Self {
        self.seed.documents.push((collection.into(), document));
        self
    }

    pub fn with_documents(
        mut self,
        collection: impl Into<String>,
        documents: impl IntoIterator<Item = Document>,
    ) -> Self {
        let collection = collection.into();
        self.seed
            .documents
            .extend(documents.into_iter().map(|document| (collection.clone(), document)));
        self
    }

    pub fn with_index(mut self, collection: impl Into<String>, index: impl Into<Index>) -> Self {
        self.seed.indexes.push((collection.into(), index.into()));
        self
    }
}

impl DriverBuilder for MockDriverBuilder {
    type Driver = MockDriver;

    fn build(self) -> DocMapResult<MockDriver> {
        Ok(MockDriver {
            store: Arc::new(RwLock::new(self.seed.into_store()?)),
            ..MockDriver::default()
        })
    }
}

/// In-memory implementation of [`AsyncDriver`].
///
/// An optional per-call latency is awaited before each call reaches the store,
/// which makes cancellation observable: a call dropped during the delay is
/// neither logged nor applied.
#[derive(Debug, Clone, Default)]
pub struct AsyncMockDriver {
    store: Arc<AsyncRwLock<MemoryStore>>,
    log: OperationLog,
    connected: Arc<AtomicBool>,
    latency: Option<Duration>,
}

impl AsyncMockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> AsyncMockDriverBuilder {
        AsyncMockDriverBuilder::default()
    }

    pub fn operations(&self) -> Vec<DriverOp> {
        self.log.snapshot()
    }

    pub fn clear_operations(&self) {
        self.log.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.store.read().await.documents(collection)
    }

    pub async fn indexes(&self, collection: &str) -> Vec<Index> {
        self.store.read().await.indexes(collection)
    }

    async fn call(&self, op: DriverOp) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.log.record(op);
    }
}

#[async_trait]
impl AsyncDriver for AsyncMockDriver {
    async fn connect(&self) -> DocMapResult<bool> {
        self.call(DriverOp::Connect).await;
        self.connected.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn close(&self) -> DocMapResult<()> {
        self.call(DriverOp::Close).await;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocMapResult<InsertOneResult> {
        self.call(DriverOp::InsertOne {
            collection: collection.to_string(),
            document: document.clone(),
        })
        .await;

        let inserted_id = self
            .store
            .write()
            .await
            .insert(collection, document)?;
        Ok(InsertOneResult { inserted_id })
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocMapResult<InsertManyResult> {
        self.call(DriverOp::InsertMany {
            collection: collection.to_string(),
            documents: documents.clone(),
        })
        .await;

        let mut store = self.store.write().await;
        let inserted_ids = documents
            .into_iter()
            .map(|document| store.insert(collection, document))
            .collect::<DocMapResult<Vec<Bson>>>()?;

        Ok(InsertManyResult { inserted_ids })
    }

    async fn find_one(&self, collection: &str, filter: Document) -> DocMapResult<Option<Document>> {
        self.call(DriverOp::FindOne {
            collection: collection.to_string(),
            filter: filter.clone(),
        })
        .await;

        self.store
            .read()
            .await
            .find_one(collection, &filter)
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> DocMapResult<Vec<Document>> {
        self.call(DriverOp::FindMany {
            collection: collection.to_string(),
            filter: filter.clone(),
            options: options.clone(),
        })
        .await;

        self.store
            .read()
            .await
            .find(collection, &filter, options)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocMapResult<UpdateResult> {
        self.call(DriverOp::UpdateOne {
            collection: collection.to_string(),
            filter: filter.clone(),
            update: update.clone(),
            options,
        })
        .await;

        self.store
            .write()
            .await
            .update(collection, &filter, &update, options)
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocMapResult<DeleteResult> {
        self.call(DriverOp::DeleteOne {
            collection: collection.to_string(),
            filter: filter.clone(),
        })
        .await;

        self.store
            .write()
            .await
            .delete_one(collection, &filter)
    }

    async fn count(&self, collection: &str, filter: Document) -> DocMapResult<u64> {
        self.call(DriverOp::Count {
            collection: collection.to_string(),
            filter: filter.clone(),
        })
        .await;

        self.store
            .read()
            .await
            .count(collection, &filter)
    }

    async fn exists(&self, collection: &str, filter: Document) -> DocMapResult<bool> {
        self.call(DriverOp::Exists {
            collection: collection.to_string(),
            filter: filter.clone(),
        })
        .await;

        Ok(self
            .store
            .read()
            .await
            .find_one(collection, &filter)?
            .is_some())
    }

    async fn create_index(&self, collection: &str, index: &Index) -> DocMapResult<()> {
        self.call(DriverOp::CreateIndex {
            collection: collection.to_string(),
            index: index.clone(),
        })
        .await;

        tracing::debug!(collection, index = %index.name(), "creating index");
        self.store
            .write()
            .await
            .create_index(collection, index)
    }
}

/// Builder for [`AsyncMockDriver`].
#[derive(Debug, Clone, Default)]
pub struct AsyncMockDriverBuilder {
    seed: Seed,
    latency: Option<Duration>,
}

impl AsyncMockDriverBuilder {
    pub fn with_document(mut self, collection: impl Into<String>, document: Document) -> Self {
        self.seed.documents.push((collection.into(), document));
        self
    }

    pub fn with_documents(
        mut self,
        collection: impl Into<String>,
        documents: impl IntoIterator<Item = Document>,
    ) -> Self {
        let collection = collection.into();
        self.seed
            .documents
            .extend(documents.into_iter().map(|document| (collection.clone(), document)));
        self
    }

    pub fn with_index(mut self, collection: impl Into<String>, index: impl Into<Index>) -> Self {
        self.seed.indexes.push((collection.into(), index.into()));
        self
    }

    /// Delays every call by `latency` before it reaches the store.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl AsyncDriverBuilder for AsyncMockDriverBuilder {
    type Driver = AsyncMockDriver;

    async fn build(self) -> DocMapResult<AsyncMockDriver> {
        Ok(AsyncMockDriver {
            store: Arc::new(AsyncRwLock::new(self.seed.into_store()?)),
            latency: self.latency,
            ..AsyncMockDriver::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn builder_seeds_documents_and_indexes() {
        let driver = MockDriver::builder()
            .with_index("users", Index::builder("name").unique())
            .with_documents("users", [doc! { "name": "a" }, doc! { "name": "b" }])
            .build()
            .unwrap();

        assert_eq!(driver.documents("users").len(), 2);
        assert_eq!(driver.indexes("users").len(), 1);
        assert!(driver.operations().is_empty());
    }

    #[test]
    fn seeding_duplicates_fails() {
        let result = MockDriver::builder()
            .with_index("users", Index::builder("name").unique())
            .with_documents("users", [doc! { "name": "a" }, doc! { "name": "a" }])
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn calls_are_logged_in_order() {
        let driver = MockDriver::new();

        assert!(driver.connect().unwrap());
        driver.insert_one("users", doc! { "name": "a" }).unwrap();
        driver.count("users", doc! {}).unwrap();
        driver.close().unwrap();

        assert_eq!(
            driver.operations(),
            vec![
                DriverOp::Connect,
                DriverOp::InsertOne {
                    collection: "users".to_string(),
                    document: doc! { "name": "a" },
                },
                DriverOp::Count {
                    collection: "users".to_string(),
                    filter: doc! {},
                },
                DriverOp::Close,
            ],
        );
        assert!(!driver.is_connected());
    }

    #[test]
    fn clones_share_state() {
        let driver = MockDriver::new();
        let clone = driver.clone();

        clone.insert_one("users", doc! { "name": "a" }).unwrap();

        assert!(driver.exists("users", doc! { "name": "a" }).unwrap());
        assert_eq!(driver.operations().len(), 2);
    }

    #[tokio::test]
    async fn async_driver_round_trip() {
        let driver = AsyncMockDriver::builder()
            .with_document("users", doc! { "_id": 1, "name": "a", "age": 3 })
            .build()
            .await
            .unwrap();

        driver
            .update_one(
                "users",
                doc! { "_id": 1 },
                doc! { "$inc": { "age": 2 } },
                UpdateOptions::default(),
            )
            .await
            .unwrap();

        let stored = driver.find_one("users", doc! { "_id": 1 }).await.unwrap().unwrap();
        assert_eq!(stored.get_i32("age").unwrap(), 5);
        assert_eq!(driver.operations().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_calls_are_not_applied() {
        let driver = AsyncMockDriver::builder()
            .latency(Duration::from_millis(200))
            .build()
            .await
            .unwrap();

        let insert = driver.insert_one("users", doc! { "name": "a" });
        let outcome = tokio::time::timeout(Duration::from_millis(10), insert).await;

        assert!(outcome.is_err());
        assert!(driver.operations().is_empty());
        assert!(driver.documents("users").await.is_empty());
    }
}
