//! Convenient re-exports of commonly used types from docmap.
//!
//! ```ignore
//! use docmap::prelude::*;
//! ```
//!
//! This provides access to:
//! - The `Model` trait and derive
//! - Collection and document workers
//! - Driver traits and builders
//! - Expressions, sort keys and index builders
//! - Mutation scopes and error types

pub use docmap_core::{
    collection::{
        as_async_collection, as_async_collection_named, as_collection, as_collection_named,
        AsyncCollectionWorker, AsyncQueryBuilder, CollectionWorker, QueryBuilder,
    },
    document::{as_async_document, as_document, AsyncDocumentWorker, DocumentWorker, ModelExt},
    driver::{AsyncDriver, AsyncDriverBuilder, Driver, DriverBuilder, FindOptions, UpdateOptions},
    error::{DocMapError, DocMapResult},
    expr::{Expr, FieldOp, FieldPath, SortDirection, SortKey},
    field::{ArrayFieldProxy, FieldProxy},
    index::{Collation, CollationStrength, Index, IndexType},
    mutation::{scope, task_scope, MutationHandle, Scoped},
    schema::Schema,
};

pub use crate::Model;
