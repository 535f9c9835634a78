use std::{cmp::Ordering, collections::HashMap};

use bson::{oid::ObjectId, Bson, Document};

use docmap_core::{
    driver::{DeleteResult, FindOptions, UpdateOptions, UpdateResult},
    error::{DocMapError, DocMapResult},
    index::Index,
};

use crate::{
    evaluator::{filter_documents, lookup, sort_cmp, FilterEvaluator},
    update::{apply_update, seed_from_filter},
};

/// Key under which the in-memory store keeps document identities.
pub const ID_FIELD: &str = "_id";

/// Collections and index registrations of an in-memory database.
///
/// The store itself is not synchronized; [`MockDriver`](crate::MockDriver) and
/// [`AsyncMockDriver`](crate::AsyncMockDriver) wrap it in their own locks.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: HashMap<String, Vec<Document>>,
    indexes: HashMap<String, Vec<Index>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document, generating an `ObjectId` when it carries no `_id`.
    pub fn insert(&mut self, collection: &str, mut document: Document) -> DocMapResult<Bson> {
        let id = match document.get(ID_FIELD) {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert(ID_FIELD, id.clone());
                id
            }
        };

        let documents = self.collections.entry(collection.to_string()).or_default();
        let indexes = self.indexes.get(collection).map(Vec::as_slice).unwrap_or_default();

        if documents.iter().any(|stored| stored.get(ID_FIELD) == Some(&id)) {
            return Err(DocMapError::Driver(format!(
                "duplicate key in {collection}: {ID_FIELD} {id}"
            )));
        }
        check_unique(collection, documents, indexes, &document, None)?;

        documents.push(document);
        Ok(id)
    }

    pub fn find(&self, collection: &str, filter: &Document, options: &FindOptions) -> DocMapResult<Vec<Document>> {
        let Some(documents) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched = filter_documents(documents, filter)?;

        if !options.sort.is_empty() {
            let keys = sort_keys(&options.sort)?;
            matched.sort_by(|left, right| compare_by(&keys, left, right));
        }

        let limit = match options.limit {
            0 => usize::MAX,
            limit => limit as usize,
        };

        Ok(matched
            .into_iter()
            .skip(options.skip as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn find_one(&self, collection: &str, filter: &Document) -> DocMapResult<Option<Document>> {
        let Some(documents) = self.collections.get(collection) else {
            return Ok(None);
        };

        for document in documents {
            if FilterEvaluator::new(document).matches(filter)? {
                return Ok(Some(document.clone()));
            }
        }

        Ok(None)
    }

    /// Applies `update` to the first matching document, or to all of them with
    /// `options.multi`. With `options.upsert`, a miss inserts a document seeded
    /// from the filter's equality clauses.
    pub fn update(
        &mut self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> DocMapResult<UpdateResult> {
        let documents = self.collections.entry(collection.to_string()).or_default();
        let indexes = self.indexes.get(collection).map(Vec::as_slice).unwrap_or_default();

        let mut targets = Vec::new();
        for (position, document) in documents.iter().enumerate() {
            if FilterEvaluator::new(document).matches(filter)? {
                targets.push(position);
                if !options.multi {
                    break;
                }
            }
        }

        if targets.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult::default());
            }

            let mut seeded = seed_from_filter(filter)?;
            apply_update(&mut seeded, update)?;

            let upserted_id = self.insert(collection, seeded)?;
            return Ok(UpdateResult {
                matched_count: 0,
                modified_count: 0,
                upserted_id: Some(upserted_id),
            });
        }

        let mut result = UpdateResult {
            matched_count: targets.len() as u64,
            ..UpdateResult::default()
        };

        for position in targets {
            let mut candidate = documents[position].clone();
            if !apply_update(&mut candidate, update)? {
                continue;
            }

            if candidate.get(ID_FIELD) != documents[position].get(ID_FIELD) {
                return Err(DocMapError::Driver(format!(
                    "the {ID_FIELD} field of a stored document is immutable"
                )));
            }
            check_unique(collection, documents, indexes, &candidate, Some(position))?;

            documents[position] = candidate;
            result.modified_count += 1;
        }

        Ok(result)
    }

    pub fn delete_one(&mut self, collection: &str, filter: &Document) -> DocMapResult<DeleteResult> {
        let Some(documents) = self.collections.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };

        let mut position = None;
        for (candidate, document) in documents.iter().enumerate() {
            if FilterEvaluator::new(document).matches(filter)? {
                position = Some(candidate);
                break;
            }
        }

        Ok(match position {
            Some(position) => {
                documents.remove(position);
                DeleteResult { deleted_count: 1 }
            }
            None => DeleteResult::default(),
        })
    }

    pub fn count(&self, collection: &str, filter: &Document) -> DocMapResult<u64> {
        match self.collections.get(collection) {
            Some(documents) => Ok(filter_documents(documents, filter)?.len() as u64),
            None => Ok(0),
        }
    }

    /// Registers an index. An index with the same name is replaced.
    ///
    /// Unique indexes are checked against the stored documents first, so a
    /// collection that already holds duplicates rejects the index.
    pub fn create_index(&mut self, collection: &str, index: &Index) -> DocMapResult<()> {
        if index.options().unique {
            let documents = self.collections.get(collection).map(Vec::as_slice).unwrap_or_default();
            for (position, document) in documents.iter().enumerate() {
                check_unique(collection, documents, std::slice::from_ref(index), document, Some(position))?;
            }
        }

        let registered = self.indexes.entry(collection.to_string()).or_default();
        registered.retain(|existing| existing.name() != index.name());
        registered.push(index.clone());

        Ok(())
    }

    pub fn indexes(&self, collection: &str) -> Vec<Index> {
        self.indexes.get(collection).cloned().unwrap_or_default()
    }

    /// Snapshot of a collection in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections.get(collection).cloned().unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names = self.collections.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn clear(&mut self) {
        self.collections.clear();
        self.indexes.clear();
    }
}

fn sort_keys(sort: &Document) -> DocMapResult<Vec<(&str, bool)>> {
    sort.iter()
        .map(|(path, direction)| {
            let descending = match direction {
                Bson::Int32(value) => *value < 0,
                Bson::Int64(value) => *value < 0,
                Bson::Double(value) => *value < 0.0,
                other => {
                    return Err(DocMapError::Driver(format!(
                        "invalid sort direction {other} for '{path}'"
                    )));
                }
            };
            Ok((path.as_str(), descending))
        })
        .collect()
}

fn compare_by(keys: &[(&str, bool)], left: &Document, right: &Document) -> Ordering {
    for (path, descending) in keys {
        let left = lookup(left, path).into_iter().next().unwrap_or(&Bson::Null);
        let right = lookup(right, path).into_iter().next().unwrap_or(&Bson::Null);

        let ordering = match sort_cmp(left, right) {
            ordering if *descending => ordering.reverse(),
            ordering => ordering,
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Rejects `candidate` if it collides with another stored document on any
/// unique index. Sparse indexes ignore documents missing every indexed field.
fn check_unique(
    collection: &str,
    documents: &[Document],
    indexes: &[Index],
    candidate: &Document,
    skip: Option<usize>,
) -> DocMapResult<()> {
    for index in indexes.iter().filter(|index| index.options().unique) {
        let key_of = |document: &Document| -> Vec<Bson> {
            index
                .keys()
                .iter()
                .map(|(path, _)| {
                    lookup(document, path.as_str())
                        .into_iter()
                        .next()
                        .cloned()
                        .unwrap_or(Bson::Null)
                })
                .collect()
        };

        let key = key_of(candidate);
        if index.options().sparse && key.iter().all(|value| matches!(value, Bson::Null)) {
            continue;
        }

        let collides = documents
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip)
            .any(|(_, stored)| key_of(stored) == key);

        if collides {
            return Err(DocMapError::Driver(format!(
                "duplicate key in {collection} for unique index {}",
                index.name(),
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        for (id, name, age) in [(1, "a", 30), (2, "b", 20), (3, "c", 40), (4, "d", 20)] {
            store
                .insert("users", doc! { "_id": id, "name": name, "age": age })
                .unwrap();
        }
        store
    }

    fn names(documents: &[Document]) -> Vec<&str> {
        documents
            .iter()
            .map(|document| document.get_str("name").unwrap())
            .collect()
    }

    #[test]
    fn insert_generates_object_ids() {
        let mut store = MemoryStore::new();
        let id = store.insert("users", doc! { "name": "a" }).unwrap();

        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(store.documents("users")[0].get(ID_FIELD), Some(&id));
    }

    #[test]
    fn insert_rejects_duplicate_ids() {
        let mut store = store();
        assert!(store.insert("users", doc! { "_id": 1 }).is_err());
    }

    #[test]
    fn find_sorts_on_several_keys_then_skips_and_limits() {
        let store = store();
        let options = FindOptions {
            sort: doc! { "age": 1, "name": -1 },
            skip: 1,
            limit: 2,
        };

        let found = store.find("users", &doc! {}, &options).unwrap();
        assert_eq!(names(&found), vec!["b", "a"]);
    }

    #[test]
    fn zero_limit_is_unbounded() {
        let found = store()
            .find("users", &doc! { "age": { "$lt": 35 } }, &FindOptions::default())
            .unwrap();
        assert_eq!(names(&found), vec!["a", "b", "d"]);
    }

    #[test]
    fn update_single_and_multi() {
        let mut store = store();
        let filter = doc! { "age": { "$eq": 20 } };
        let update = doc! { "$inc": { "age": 1 } };

        let single = store
            .update("users", &filter, &update, UpdateOptions::default())
            .unwrap();
        assert_eq!((single.matched_count, single.modified_count), (1, 1));

        let multi = store
            .update("users", &doc! { "age": { "$lt": 25 } }, &update, UpdateOptions { upsert: false, multi: true })
            .unwrap();
        assert_eq!((multi.matched_count, multi.modified_count), (2, 2));
        assert_eq!(store.count("users", &doc! { "age": 22 }).unwrap(), 1);
    }

    #[test]
    fn upsert_inserts_seeded_document() {
        let mut store = store();
        let result = store
            .update(
                "users",
                &doc! { "name": { "$eq": "z" } },
                &doc! { "$set": { "age": 9 } },
                UpdateOptions { upsert: true, multi: false },
            )
            .unwrap();

        assert!(result.upserted_id.is_some());
        let stored = store.find_one("users", &doc! { "name": "z" }).unwrap().unwrap();
        assert_eq!(stored.get_i32("age").unwrap(), 9);
    }

    #[test]
    fn id_is_immutable() {
        let mut store = store();
        let err = store
            .update("users", &doc! { "_id": 1 }, &doc! { "$set": { "_id": 9 } }, UpdateOptions::default())
            .unwrap_err();
        assert!(matches!(err, DocMapError::Driver(_)));
    }

    #[test]
    fn delete_removes_first_match() {
        let mut store = store();
        let deleted = store.delete_one("users", &doc! { "age": 20 }).unwrap();

        assert_eq!(deleted.deleted_count, 1);
        assert_eq!(names(&store.documents("users")), vec!["a", "c", "d"]);
        assert_eq!(store.delete_one("missing", &doc! {}).unwrap().deleted_count, 0);
    }

    #[test]
    fn unique_indexes_are_enforced() {
        let mut store = store();
        let by_age = Index::builder("age").unique().build();
        assert!(store.create_index("users", &by_age).is_err());

        let by_name = Index::builder("name").unique().build();
        store.create_index("users", &by_name).unwrap();
        store.create_index("users", &by_name).unwrap();

        assert_eq!(store.indexes("users").len(), 1);
        assert!(store.insert("users", doc! { "name": "a" }).is_err());
        assert!(store
            .update("users", &doc! { "_id": 2 }, &doc! { "$set": { "name": "c" } }, UpdateOptions::default())
            .is_err());
    }
}
