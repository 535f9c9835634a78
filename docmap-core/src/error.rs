//! Error types and result types for mapping operations.
//!
//! Every fallible operation in this crate returns [`DocMapResult<T>`]. Compilation
//! errors (unknown attributes, conflicting mutations) surface when an expression or
//! update is built, never inside a document handed to a driver.

use std::convert::Infallible;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised while mapping models to documents.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocMapError {
    /// Serialization/deserialization error when converting between models and documents.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An attribute could not be resolved against a model schema.
    #[error("Cannot resolve attribute '{attribute}' on {model}: {reason}")]
    AttributeResolution {
        /// The model (or dotted parent path) the lookup ran against.
        model: String,
        /// The attribute that failed to resolve.
        attribute: String,
        /// Why the lookup failed.
        reason: String,
    },
    /// Schema traversal found a cycle or exceeded the maximum path depth.
    #[error("Recursion limit reached while resolving '{0}'")]
    RecursionLimit(String),
    /// A mutation operand was rejected at record time.
    #[error("Invalid mutation on '{path}': {reason}")]
    InvalidMutation {
        /// The field path being mutated.
        path: String,
        /// Why the operand was rejected.
        reason: String,
    },
    /// The same path carries an unset alongside another update operator.
    #[error("Conflicting mutations on '{0}': unset cannot be combined with other operators")]
    ConflictingMutation(String),
    /// An async worker recorded or sent mutations outside `task_scope`.
    #[error("No mutation scope is active: run async work inside task_scope")]
    NoTaskScope,
    /// The document worker has no primary key yet.
    #[error("Document has not been persisted")]
    NotPersisted,
    /// A document returned by the driver does not match the model.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error reported by the underlying driver.
    #[error("Driver error: {0}")]
    Driver(String),
}

/// A specialized `Result` type for mapping operations.
pub type DocMapResult<T> = Result<T, DocMapError>;

impl DocMapError {
    pub(crate) fn attribute(
        model: impl Into<String>,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DocMapError::AttributeResolution {
            model: model.into(),
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_mutation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        DocMapError::InvalidMutation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<BsonError> for DocMapError {
    fn from(err: BsonError) -> Self {
        DocMapError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocMapError {
    fn from(err: SerdeJsonError) -> Self {
        DocMapError::Serialization(err.to_string())
    }
}

impl From<Infallible> for DocMapError {
    fn from(err: Infallible) -> Self {
        match err {}
    }
}
