//! Collection workers and query builders.
//!
//! A [`CollectionWorker`] binds a model type to a collection and a driver. It
//! hands out field proxies and creates [`QueryBuilder`]s, whose terminal
//! operations (`all`, `first`, `count`, `exists`, `mutate`) run against the
//! driver. [`AsyncCollectionWorker`] and [`AsyncQueryBuilder`] are the same over
//! an [`AsyncDriver`].
//!
//! # Example
//!
//! ```ignore
//! let users = as_collection::<User, _>(&driver);
//! let age = users.field("age")?;
//!
//! let oldest = users
//!     .find(age.gte(18))
//!     .sort(-age.clone())
//!     .limit(2)
//!     .all()?;
//!
//! age.inc(1)?;
//! users.find(age.lt(18)).scoped().mutate()?;
//! ```
//!
//! Filter, sort, skip and limit belong to one builder. Pending mutations do not:
//! they live in the scope's [`MutationHandle`] and are shared by every builder
//! created in that scope.

use std::{marker::PhantomData, sync::Arc};

use bson::Document;
use parking_lot::Mutex;

use crate::{
    document::{hydrate, AsyncDocumentWorker, DocumentWorker, Model},
    driver::{AsyncDriver, Driver, FindOptions, UpdateOptions, UpdateResult},
    error::{DocMapError, DocMapResult},
    expr::{sort_document, Expr, SortKey},
    field::{ArrayFieldProxy, FieldProxy},
    index::Index,
    mutation::{MutationHandle, Scoped},
    schema::Schema,
};

/// Indexes declared on a worker and not yet sent to the driver.
#[derive(Debug, Default)]
struct PendingIndexes(Mutex<Vec<Index>>);

impl PendingIndexes {
    fn push(&self, index: Index) {
        self.0.lock().push(index);
    }

    fn take(&self) -> Vec<Index> {
        std::mem::take(&mut *self.0.lock())
    }

    /// Puts back indexes whose creation did not happen.
    fn restore(&self, mut indexes: Vec<Index>) {
        let mut pending = self.0.lock();
        indexes.append(&mut pending);
        *pending = indexes;
    }

    fn materialize<D: Driver>(&self, driver: &D, collection: &str) -> DocMapResult<()> {
        let mut indexes = self.take().into_iter();

        while let Some(index) = indexes.next() {
            tracing::debug!(collection, index = %index.name(), "creating index");

            if let Err(err) = driver.create_index(collection, &index) {
                self.restore(std::iter::once(index).chain(indexes).collect());
                return Err(err);
            }
        }

        Ok(())
    }

    async fn materialize_async<D: AsyncDriver>(&self, driver: &D, collection: &str) -> DocMapResult<()> {
        let mut indexes = self.take().into_iter();

        while let Some(index) = indexes.next() {
            tracing::debug!(collection, index = %index.name(), "creating index");

            if let Err(err) = driver.create_index(collection, &index).await {
                self.restore(std::iter::once(index).chain(indexes).collect());
                return Err(err);
            }
        }

        Ok(())
    }
}

/// Builder-local query state shared by the blocking and async builders.
#[derive(Debug, Clone)]
struct QueryState {
    filter: Option<Expr>,
    sort: Vec<SortKey>,
    skip: u64,
    limit: u64,
}

impl QueryState {
    fn new(filter: Option<Expr>) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            skip: 0,
            limit: 0,
        }
    }

    fn filter_document(&self) -> Document {
        self.filter
            .as_ref()
            .map(Expr::to_document)
            .unwrap_or_default()
    }

    fn find_options(&self) -> FindOptions {
        FindOptions {
            sort: sort_document(&self.sort),
            skip: self.skip,
            limit: self.limit,
        }
    }

}

fn compile_update(mutations: &MutationHandle) -> DocMapResult<Document> {
    let update = mutations.compile()?;

    if update.is_empty() {
        return Err(DocMapError::invalid_mutation("*", "no pending mutations"));
    }

    Ok(update)
}

fn multi_update() -> UpdateOptions {
    UpdateOptions { upsert: false, multi: true }
}

/// Binds a model type to a collection on a blocking driver.
#[derive(Debug)]
pub struct CollectionWorker<'a, M: Model, D: Driver> {
    driver: &'a D,
    collection: String,
    indexes: Arc<PendingIndexes>,
    _marker: PhantomData<M>,
}

/// Creates a collection worker using the model's collection name.
pub fn as_collection<M: Model, D: Driver>(driver: &D) -> CollectionWorker<'_, M, D> {
    CollectionWorker::new(driver, None)
}

/// Creates a collection worker on an explicitly named collection.
pub fn as_collection_named<'a, M: Model, D: Driver>(name: &str, driver: &'a D) -> CollectionWorker<'a, M, D> {
    CollectionWorker::new(driver, Some(name))
}

impl<'a, M: Model, D: Driver> CollectionWorker<'a, M, D> {
    pub fn new(driver: &'a D, collection: Option<&str>) -> Self {
        Self {
            driver,
            collection: M::schema().collection_name(collection),
            indexes: Arc::default(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &'static Schema {
        M::schema()
    }

    /// Proxy for a top-level field.
    pub fn field(&self, name: &str) -> DocMapResult<FieldProxy> {
        FieldProxy::root(M::schema(), name, MutationHandle::current())
    }

    /// Proxy for a dotted path such as `address.city`.
    pub fn path(&self, path: &str) -> DocMapResult<FieldProxy> {
        FieldProxy::at_path(M::schema(), path, MutationHandle::current())
    }

    /// Proxy for an array field.
    pub fn array(&self, name: &str) -> DocMapResult<ArrayFieldProxy> {
        self.field(name)?.into_array()
    }

    /// Declares an index, created before the next terminal query call.
    pub fn use_index(self, index: impl Into<Index>) -> Self {
        self.indexes.push(index.into());
        self
    }

    /// Starts a query filtered by `expr`.
    pub fn find(&self, expr: Expr) -> QueryBuilder<'a, M, D> {
        QueryBuilder::new(self, Some(expr))
    }

    /// Starts an unfiltered query.
    pub fn find_all(&self) -> QueryBuilder<'a, M, D> {
        QueryBuilder::new(self, None)
    }

    /// Returns the first document matching `expr`.
    pub fn find_one(&self, expr: Expr) -> DocMapResult<Option<DocumentWorker<'a, M, D>>> {
        self.indexes.materialize(self.driver, &self.collection)?;

        let filter = expr.to_document();
        tracing::debug!(collection = %self.collection, filter = %filter, "find_one");

        self.driver
            .find_one(&self.collection, filter)?
            .map(|document| -> DocMapResult<_> {
                let (instance, primary_key) = hydrate::<M>(document)?;
                Ok(DocumentWorker::persisted(instance, primary_key, self.driver, self.collection.clone()))
            })
            .transpose()
    }
}

/// A fluent query over one collection on a blocking driver.
#[derive(Debug)]
pub struct QueryBuilder<'a, M: Model, D: Driver> {
    driver: &'a D,
    collection: String,
    indexes: Arc<PendingIndexes>,
    state: QueryState,
    mutations: MutationHandle,
    _marker: PhantomData<M>,
}

impl<M: Model, D: Driver> Clone for QueryBuilder<'_, M, D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver,
            collection: self.collection.clone(),
            indexes: self.indexes.clone(),
            state: self.state.clone(),
            mutations: self.mutations.clone(),
            _marker: PhantomData,
        }
    }
}

impl<'a, M: Model, D: Driver> QueryBuilder<'a, M, D> {
    fn new(worker: &CollectionWorker<'a, M, D>, filter: Option<Expr>) -> Self {
        Self {
            driver: worker.driver,
            collection: worker.collection.clone(),
            indexes: worker.indexes.clone(),
            state: QueryState::new(filter),
            mutations: MutationHandle::current(),
            _marker: PhantomData,
        }
    }

    /// Replaces the filter of this query.
    pub fn find(mut self, expr: Expr) -> Self {
        self.state.filter = Some(expr);
        self
    }

    /// Appends a sort key; pass `-proxy` for descending order.
    pub fn sort(mut self, key: impl Into<SortKey>) -> Self {
        self.state.sort.push(key.into());
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.state.skip = skip;
        self
    }

    /// Caps the number of results; `0` means unbounded.
    pub fn limit(mut self, limit: u64) -> Self {
        self.state.limit = limit;
        self
    }

    /// Proxy for a top-level field, recording into this builder's scope.
    pub fn field(&self, name: &str) -> DocMapResult<FieldProxy> {
        FieldProxy::root(M::schema(), name, self.mutations.clone())
    }

    /// The mutation context this builder sends on [`mutate`](Self::mutate).
    pub fn mutations(&self) -> &MutationHandle {
        &self.mutations
    }

    pub fn clear_mutations(&self) {
        self.mutations.clear();
    }

    /// Compiled filter document; `{}` when unfiltered.
    pub fn filter_document(&self) -> Document {
        self.state.filter_document()
    }

    pub fn find_options(&self) -> FindOptions {
        self.state.find_options()
    }

    /// Compiled update document of the pending mutations.
    pub fn update_document(&self) -> DocMapResult<Document> {
        compile_update(&self.mutations)
    }

    /// Clears the scope's mutation context when the returned guard is dropped.
    pub fn scoped(self) -> Scoped<Self> {
        let handle = self.mutations.clone();
        Scoped::new(self, handle)
    }

    /// Runs the query and wraps every result in a document worker.
    ///
    /// Each call queries the driver again.
    pub fn all(&self) -> DocMapResult<Vec<DocumentWorker<'a, M, D>>> {
        self.indexes.materialize(self.driver, &self.collection)?;

        let filter = self.filter_document();
        let options = self.find_options();
        tracing::debug!(collection = %self.collection, filter = %filter, sort = %options.sort, "find_many");

        self.driver
            .find_many(&self.collection, filter, &options)?
            .into_iter()
            .map(|document| -> DocMapResult<_> {
                let (instance, primary_key) = hydrate::<M>(document)?;
                Ok(DocumentWorker::persisted(instance, primary_key, self.driver, self.collection.clone()))
            })
            .collect()
    }

    /// Runs the query limited to one result.
    pub fn first(&self) -> DocMapResult<Option<DocumentWorker<'a, M, D>>> {
        Ok(self.clone().limit(1).all()?.into_iter().next())
    }

    /// Counts matching documents, ignoring sort, skip and limit.
    pub fn count(&self) -> DocMapResult<u64> {
        self.indexes.materialize(self.driver, &self.collection)?;
        self.driver.count(&self.collection, self.filter_document())
    }

    pub fn exists(&self) -> DocMapResult<bool> {
        self.indexes.materialize(self.driver, &self.collection)?;
        self.driver.exists(&self.collection, self.filter_document())
    }

    /// Sends the scope's pending mutations as one multi-document update.
    ///
    /// The mutation context is left as is; clear it or use [`scoped`](Self::scoped).
    ///
    /// # Errors
    ///
    /// [`DocMapError::InvalidMutation`] when nothing is pending and
    /// [`DocMapError::ConflictingMutation`] on unset conflicts; nothing is sent
    /// in either case.
    pub fn mutate(&self) -> DocMapResult<UpdateResult> {
        let update = self.update_document()?;
        self.indexes.materialize(self.driver, &self.collection)?;

        let filter = self.filter_document();
        tracing::debug!(collection = %self.collection, filter = %filter, update = %update, "update_many");

        self.driver
            .update_one(&self.collection, filter, update, multi_update())
    }
}

/// Binds a model type to a collection on an async driver.
#[derive(Debug)]
pub struct AsyncCollectionWorker<'a, M: Model, D: AsyncDriver> {
    driver: &'a D,
    collection: String,
    indexes: Arc<PendingIndexes>,
    _marker: PhantomData<M>,
}

/// Creates an async collection worker using the model's collection name.
pub fn as_async_collection<M: Model, D: AsyncDriver>(driver: &D) -> AsyncCollectionWorker<'_, M, D> {
    AsyncCollectionWorker::new(driver, None)
}

/// Creates an async collection worker on an explicitly named collection.
pub fn as_async_collection_named<'a, M: Model, D: AsyncDriver>(
    name: &str,
    driver: &'a D,
) -> AsyncCollectionWorker<'a, M, D> {
    AsyncCollectionWorker::new(driver, Some(name))
}

impl<'a, M: Model, D: AsyncDriver> AsyncCollectionWorker<'a, M, D> {
    pub fn new(driver: &'a D, collection: Option<&str>) -> Self {
        Self {
            driver,
            collection: M::schema().collection_name(collection),
            indexes: Arc::default(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &'static Schema {
        M::schema()
    }

    /// Proxy for a top-level field.
    ///
    /// # Errors
    ///
    /// [`DocMapError::NoTaskScope`] outside [`task_scope`](crate::mutation::task_scope).
    pub fn field(&self, name: &str) -> DocMapResult<FieldProxy> {
        FieldProxy::root(M::schema(), name, MutationHandle::task()?)
    }

    pub fn path(&self, path: &str) -> DocMapResult<FieldProxy> {
        FieldProxy::at_path(M::schema(), path, MutationHandle::task()?)
    }

    pub fn array(&self, name: &str) -> DocMapResult<ArrayFieldProxy> {
        self.field(name)?.into_array()
    }

    pub fn use_index(self, index: impl Into<Index>) -> Self {
        self.indexes.push(index.into());
        self
    }

    pub fn find(&self, expr: Expr) -> AsyncQueryBuilder<'a, M, D> {
        AsyncQueryBuilder::new(self, Some(expr))
    }

    pub fn find_all(&self) -> AsyncQueryBuilder<'a, M, D> {
        AsyncQueryBuilder::new(self, None)
    }

    pub async fn find_one(&self, expr: Expr) -> DocMapResult<Option<AsyncDocumentWorker<'a, M, D>>> {
        self.indexes
            .materialize_async(self.driver, &self.collection)
            .await?;

        let filter = expr.to_document();
        tracing::debug!(collection = %self.collection, filter = %filter, "find_one");

        self.driver
            .find_one(&self.collection, filter)
            .await?
            .map(|document| -> DocMapResult<_> {
                let (instance, primary_key) = hydrate::<M>(document)?;
                Ok(AsyncDocumentWorker::persisted(instance, primary_key, self.driver, self.collection.clone()))
            })
            .transpose()
    }
}

/// A fluent query over one collection on an async driver.
#[derive(Debug)]
pub struct AsyncQueryBuilder<'a, M: Model, D: AsyncDriver> {
    driver: &'a D,
    collection: String,
    indexes: Arc<PendingIndexes>,
    state: QueryState,
    mutations: Option<MutationHandle>,
    _marker: PhantomData<M>,
}

impl<M: Model, D: AsyncDriver> Clone for AsyncQueryBuilder<'_, M, D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver,
            collection: self.collection.clone(),
            indexes: self.indexes.clone(),
            state: self.state.clone(),
            mutations: self.mutations.clone(),
            _marker: PhantomData,
        }
    }
}

impl<'a, M: Model, D: AsyncDriver> AsyncQueryBuilder<'a, M, D> {
    fn new(worker: &AsyncCollectionWorker<'a, M, D>, filter: Option<Expr>) -> Self {
        Self {
            driver: worker.driver,
            collection: worker.collection.clone(),
            indexes: worker.indexes.clone(),
            state: QueryState::new(filter),
            mutations: MutationHandle::task().ok(),
            _marker: PhantomData,
        }
    }

    pub fn find(mut self, expr: Expr) -> Self {
        self.state.filter = Some(expr);
        self
    }

    pub fn sort(mut self, key: impl Into<SortKey>) -> Self {
        self.state.sort.push(key.into());
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.state.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.state.limit = limit;
        self
    }

    pub fn field(&self, name: &str) -> DocMapResult<FieldProxy> {
        FieldProxy::root(M::schema(), name, self.mutations()?.clone())
    }

    /// The task scope's mutation context, captured when the builder was created.
    ///
    /// Reads (`all`, `first`, `count`, `exists`) work without one.
    pub fn mutations(&self) -> DocMapResult<&MutationHandle> {
        self.mutations.as_ref().ok_or(DocMapError::NoTaskScope)
    }

    pub fn clear_mutations(&self) {
        if let Some(mutations) = &self.mutations {
            mutations.clear();
        }
    }

    pub fn filter_document(&self) -> Document {
        self.state.filter_document()
    }

    pub fn find_options(&self) -> FindOptions {
        self.state.find_options()
    }

    pub fn update_document(&self) -> DocMapResult<Document> {
        compile_update(self.mutations()?)
    }

    pub fn scoped(self) -> Scoped<Self> {
        let handle = self.mutations.clone().unwrap_or_default();
        Scoped::new(self, handle)
    }

    pub async fn all(&self) -> DocMapResult<Vec<AsyncDocumentWorker<'a, M, D>>> {
        self.indexes
            .materialize_async(self.driver, &self.collection)
            .await?;

        let filter = self.filter_document();
        let options = self.find_options();
        tracing::debug!(collection = %self.collection, filter = %filter, sort = %options.sort, "find_many");

        self.driver
            .find_many(&self.collection, filter, &options)
            .await?
            .into_iter()
            .map(|document| -> DocMapResult<_> {
                let (instance, primary_key) = hydrate::<M>(document)?;
                Ok(AsyncDocumentWorker::persisted(instance, primary_key, self.driver, self.collection.clone()))
            })
            .collect()
    }

    pub async fn first(&self) -> DocMapResult<Option<AsyncDocumentWorker<'a, M, D>>> {
        Ok(self
            .clone()
            .limit(1)
            .all()
            .await?
            .into_iter()
            .next())
    }

    pub async fn count(&self) -> DocMapResult<u64> {
        self.indexes
            .materialize_async(self.driver, &self.collection)
            .await?;
        self.driver
            .count(&self.collection, self.filter_document())
            .await
    }

    pub async fn exists(&self) -> DocMapResult<bool> {
        self.indexes
            .materialize_async(self.driver, &self.collection)
            .await?;
        self.driver
            .exists(&self.collection, self.filter_document())
            .await
    }

    /// Sends the scope's pending mutations as one multi-document update.
    ///
    /// Mutations are compiled before the first suspension point, so a cancelled
    /// call leaves the context exactly as it was.
    pub async fn mutate(&self) -> DocMapResult<UpdateResult> {
        let update = self.update_document()?;
        self.indexes
            .materialize_async(self.driver, &self.collection)
            .await?;

        let filter = self.filter_document();
        tracing::debug!(collection = %self.collection, filter = %filter, update = %update, "update_many");

        self.driver
            .update_one(&self.collection, filter, update, multi_update())
            .await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use bson::doc;

    use super::*;
    use crate::schema::fixtures::User;

    #[derive(Debug, Default)]
    struct NullDriver;

    impl Driver for NullDriver {
        fn connect(&self) -> DocMapResult<bool> {
            Ok(true)
        }

        fn close(&self) -> DocMapResult<()> {
            Ok(())
        }

        fn insert_one(&self, _: &str, _: Document) -> DocMapResult<crate::driver::InsertOneResult> {
            Err(DocMapError::Driver("read only".to_string()))
        }

        fn insert_many(&self, _: &str, _: Vec<Document>) -> DocMapResult<crate::driver::InsertManyResult> {
            Err(DocMapError::Driver("read only".to_string()))
        }

        fn find_one(&self, _: &str, _: Document) -> DocMapResult<Option<Document>> {
            Ok(None)
        }

        fn find_many(&self, _: &str, _: Document, _: &FindOptions) -> DocMapResult<Vec<Document>> {
            Ok(vec![])
        }

        fn update_one(&self, _: &str, _: Document, _: Document, _: UpdateOptions) -> DocMapResult<UpdateResult> {
            Ok(UpdateResult::default())
        }

        fn delete_one(&self, _: &str, _: Document) -> DocMapResult<crate::driver::DeleteResult> {
            Ok(Default::default())
        }

        fn count(&self, _: &str, _: Document) -> DocMapResult<u64> {
            Ok(0)
        }

        fn exists(&self, _: &str, _: Document) -> DocMapResult<bool> {
            Ok(false)
        }

        fn create_index(&self, _: &str, _: &Index) -> DocMapResult<()> {
            Ok(())
        }
    }

    #[test]
    fn builder_state_is_local() {
        let driver = NullDriver;
        let users = as_collection::<User, _>(&driver);
        let age = users.field("age").unwrap();

        let query = users
            .find(age.gt(18))
            .sort(-age.clone())
            .sort(users.field("name").unwrap())
            .skip(5)
            .limit(10);
        let other = users.find_all();

        assert_eq!(query.filter_document(), doc! { "age": { "$gt": 18 } });
        assert_eq!(
            query.find_options(),
            FindOptions {
                sort: doc! { "age": -1, "name": 1 },
                skip: 5,
                limit: 10,
            },
        );
        assert_eq!(other.filter_document(), Document::new());
        assert_eq!(other.find_options(), FindOptions::default());
    }

    #[test]
    fn find_on_builder_replaces_filter() {
        let driver = NullDriver;
        let users = as_collection::<User, _>(&driver);
        let age = users.field("age").unwrap();

        let query = users.find(age.gt(18)).find(age.lt(65));
        assert_eq!(query.filter_document(), doc! { "age": { "$lt": 65 } });
    }

    #[test]
    fn mutate_without_pending_mutations_fails() {
        let driver = NullDriver;
        let users = as_collection::<User, _>(&driver);
        let query = users.find_all().scoped();

        assert!(matches!(query.mutate(), Err(DocMapError::InvalidMutation { .. })));
    }

    #[test]
    fn collection_name_override() {
        let driver = NullDriver;

        assert_eq!(as_collection::<User, _>(&driver).name(), "users");
        assert_eq!(as_collection_named::<User, _>("members", &driver).name(), "members");
    }
}
