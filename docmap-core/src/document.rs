//! Model traits and document workers.
//!
//! A [`Model`] is any serde struct with a [`Schema`]. Wrapping an instance in a
//! [`DocumentWorker`] (or [`AsyncDocumentWorker`]) adds primary-key tracking:
//! the first `save()` inserts and remembers the assigned key, later saves update
//! the stored document by that key.

use std::ops::Deref;

use bson::{de::deserialize_from_bson, doc, ser::serialize_to_bson, Bson, Document};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{to_value, Value};

use crate::{
    driver::{AsyncDriver, Driver, UpdateOptions},
    error::{DocMapError, DocMapResult},
    schema::Schema,
};

const ID_FIELD: &str = "_id";

/// Core trait of every mapped type.
///
/// Usually implemented with `#[derive(Model)]`, which builds the schema from the
/// struct's fields:
///
/// ```ignore
/// use docmap::Model;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Model)]
/// #[model(collection = "people")]
/// pub struct User {
///     pub name: String,
///     pub age: i32,
///     pub address: Option<Address>,
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the schema of this model, built once per type.
    fn schema() -> &'static Schema;

    /// Returns the default collection name of this model.
    fn collection_name() -> String {
        Self::schema().collection_name(None)
    }
}

/// Serialization helpers available on every [`Model`].
pub trait ModelExt: Model {
    /// Converts this model to a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the model does not serialize to a document.
    fn to_document(&self) -> DocMapResult<Document>;

    /// Creates a model from a BSON document.
    fn from_document(document: Document) -> DocMapResult<Self>;

    /// Converts this model to a JSON value.
    fn to_json(&self) -> DocMapResult<Value>;
}

impl<M: Model> ModelExt for M {
    fn to_document(&self) -> DocMapResult<Document> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocMapError::Serialization(format!(
                "{} serialized to {:?}, expected a document",
                Self::schema().model_name(),
                other.element_type(),
            ))),
        }
    }

    fn from_document(document: Document) -> DocMapResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }

    fn to_json(&self) -> DocMapResult<Value> {
        Ok(to_value(self)?)
    }
}

/// Field the stored document is keyed on: the schema's primary key when the
/// model declares it, the driver-assigned `_id` otherwise.
pub(crate) fn key_field<M: Model>() -> &'static str {
    let schema = M::schema();
    if schema.resolve(schema.primary_key()).is_ok() {
        schema.primary_key()
    } else {
        ID_FIELD
    }
}

/// Splits a stored document into a model instance and its primary key.
pub(crate) fn hydrate<M: Model>(mut document: Document) -> DocMapResult<(M, Option<Bson>)> {
    let schema = M::schema();
    let field = key_field::<M>();
    let primary_key = if schema.resolve(field).is_ok() {
        document.get(field).cloned()
    } else {
        document.remove(ID_FIELD)
    };

    let instance = M::from_document(document)
        .map_err(|err| DocMapError::InvalidDocument(format!("{}: {err}", schema.model_name())))?;

    Ok((instance, primary_key.filter(|key| *key != Bson::Null)))
}

/// Serializes `instance` for insertion, returning the key it will be stored
/// under when the model carries one itself.
fn insert_payload<M: Model>(instance: &M) -> DocMapResult<(Document, Option<Bson>)> {
    let mut document = instance.to_document()?;
    let field = key_field::<M>();

    match document.get(field) {
        Some(key) if *key != Bson::Null => {
            let key = key.clone();
            Ok((document, Some(key)))
        }
        _ if field == ID_FIELD => {
            document.remove(ID_FIELD);
            Ok((document, None))
        }
        _ => Err(DocMapError::InvalidDocument(format!(
            "{}: primary key '{field}' must be set before saving",
            M::schema().model_name(),
        ))),
    }
}

/// Serialized model without its primary key, used as a `$set` payload.
fn update_payload<M: Model>(instance: &M) -> DocMapResult<Document> {
    let mut payload = instance.to_document()?;
    payload.remove(key_field::<M>());
    Ok(payload)
}

fn primary_key_filter<M: Model>(primary_key: &Bson) -> Document {
    let key = key_field::<M>();
    doc! { key: primary_key.clone() }
}

/// Wraps `instance` for persistence through `driver`.
pub fn as_document<M: Model, D: Driver>(instance: M, driver: &D) -> DocumentWorker<'_, M, D> {
    DocumentWorker::new(instance, driver, None)
}

/// Wraps `instance` for persistence through an async `driver`.
pub fn as_async_document<M: Model, D: AsyncDriver>(instance: M, driver: &D) -> AsyncDocumentWorker<'_, M, D> {
    AsyncDocumentWorker::new(instance, driver, None)
}

/// A model instance bound to a blocking driver.
///
/// Dereferences to the model for reads; use [`instance_mut`](Self::instance_mut)
/// to change fields before the next [`save`](Self::save).
#[derive(Debug)]
pub struct DocumentWorker<'a, M: Model, D: Driver> {
    instance: M,
    primary_key: Option<Bson>,
    driver: &'a D,
    collection: String,
}

impl<'a, M: Model, D: Driver> DocumentWorker<'a, M, D> {
    /// Creates an unsaved worker. `collection` overrides the model's collection name.
    pub fn new(instance: M, driver: &'a D, collection: Option<&str>) -> Self {
        Self {
            instance,
            primary_key: None,
            driver,
            collection: M::schema().collection_name(collection),
        }
    }

    pub(crate) fn persisted(instance: M, primary_key: Option<Bson>, driver: &'a D, collection: String) -> Self {
        Self {
            instance,
            primary_key,
            driver,
            collection,
        }
    }

    pub fn primary_key(&self) -> Option<&Bson> {
        self.primary_key.as_ref()
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn instance(&self) -> &M {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut M {
        &mut self.instance
    }

    pub fn into_inner(self) -> M {
        self.instance
    }

    /// Inserts the instance on first call, then updates it by primary key.
    ///
    /// # Errors
    ///
    /// Serialization and driver errors are returned unmodified.
    pub fn save(&mut self) -> DocMapResult<()> {
        match &self.primary_key {
            None => {
                let (document, key) = insert_payload(&self.instance)?;

                tracing::debug!(collection = %self.collection, "inserting document");

                let inserted = self.driver.insert_one(&self.collection, document)?;
                self.primary_key = Some(key.unwrap_or(inserted.inserted_id));
            }
            Some(primary_key) => {
                let filter = primary_key_filter::<M>(primary_key);
                let update = doc! { "$set": update_payload(&self.instance)? };

                tracing::debug!(collection = %self.collection, filter = %filter, "updating document");

                let result = self.driver.update_one(
                    &self.collection,
                    filter,
                    update,
                    UpdateOptions { upsert: false, multi: false },
                )?;

                if result.matched_count == 0 {
                    tracing::warn!(collection = %self.collection, "saved document no longer exists");
                    self.primary_key = None;
                    return Err(DocMapError::NotPersisted);
                }
            }
        }

        Ok(())
    }

    /// Deletes the stored document and forgets the primary key.
    ///
    /// # Errors
    ///
    /// [`DocMapError::NotPersisted`] if the instance was never saved.
    pub fn delete(&mut self) -> DocMapResult<()> {
        let primary_key = self.primary_key.as_ref().ok_or(DocMapError::NotPersisted)?;
        let filter = primary_key_filter::<M>(primary_key);

        tracing::debug!(collection = %self.collection, filter = %filter, "deleting document");

        let result = self.driver.delete_one(&self.collection, filter)?;
        if result.deleted_count == 0 {
            tracing::warn!(collection = %self.collection, "deleted document was already gone");
        }
        self.primary_key = None;

        Ok(())
    }
}

impl<M: Model, D: Driver> Deref for DocumentWorker<'_, M, D> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.instance
    }
}

/// A model instance bound to an async driver.
#[derive(Debug)]
pub struct AsyncDocumentWorker<'a, M: Model, D: AsyncDriver> {
    instance: M,
    primary_key: Option<Bson>,
    driver: &'a D,
    collection: String,
}

impl<'a, M: Model, D: AsyncDriver> AsyncDocumentWorker<'a, M, D> {
    pub fn new(instance: M, driver: &'a D, collection: Option<&str>) -> Self {
        Self {
            instance,
            primary_key: None,
            driver,
            collection: M::schema().collection_name(collection),
        }
    }

    pub(crate) fn persisted(instance: M, primary_key: Option<Bson>, driver: &'a D, collection: String) -> Self {
        Self {
            instance,
            primary_key,
            driver,
            collection,
        }
    }

    pub fn primary_key(&self) -> Option<&Bson> {
        self.primary_key.as_ref()
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn instance(&self) -> &M {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut M {
        &mut self.instance
    }

    pub fn into_inner(self) -> M {
        self.instance
    }

    /// Inserts the instance on first call, then updates it by primary key.
    pub async fn save(&mut self) -> DocMapResult<()> {
        match &self.primary_key {
            None => {
                let (document, key) = insert_payload(&self.instance)?;

                tracing::debug!(collection = %self.collection, "inserting document");

                let inserted = self
                    .driver
                    .insert_one(&self.collection, document)
                    .await?;
                self.primary_key = Some(key.unwrap_or(inserted.inserted_id));
            }
            Some(primary_key) => {
                let filter = primary_key_filter::<M>(primary_key);
                let update = doc! { "$set": update_payload(&self.instance)? };

                tracing::debug!(collection = %self.collection, filter = %filter, "updating document");

                let result = self
                    .driver
                    .update_one(
                        &self.collection,
                        filter,
                        update,
                        UpdateOptions { upsert: false, multi: false },
                    )
                    .await?;

                if result.matched_count == 0 {
                    tracing::warn!(collection = %self.collection, "saved document no longer exists");
                    self.primary_key = None;
                    return Err(DocMapError::NotPersisted);
                }
            }
        }

        Ok(())
    }

    /// Deletes the stored document and forgets the primary key.
    pub async fn delete(&mut self) -> DocMapResult<()> {
        let primary_key = self.primary_key.as_ref().ok_or(DocMapError::NotPersisted)?;
        let filter = primary_key_filter::<M>(primary_key);

        tracing::debug!(collection = %self.collection, filter = %filter, "deleting document");

        let result = self
            .driver
            .delete_one(&self.collection, filter)
            .await?;
        if result.deleted_count == 0 {
            tracing::warn!(collection = %self.collection, "deleted document was already gone");
        }
        self.primary_key = None;

        Ok(())
    }
}

impl<M: Model, D: AsyncDriver> Deref for AsyncDocumentWorker<'_, M, D> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.instance
    }
}
