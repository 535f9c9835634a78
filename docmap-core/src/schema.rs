//! Schema introspection for model types.
//!
//! A [`Schema`] is a descriptor table built once per model type (by the derive
//! macro or by hand through [`SchemaBuilder`]). Nested models are referenced
//! through [`ModelRef`], which resolves the nested schema lazily so that
//! self-referential models can be declared.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    fmt,
};

use bson::{oid::ObjectId, Bson, Document};
use indexmap::IndexMap;

use crate::{
    document::Model,
    error::{DocMapError, DocMapResult},
    expr::FieldPath,
};

/// The maximum number of segments a lazily resolved field path may have.
pub const MAX_PATH_DEPTH: usize = 32;

/// The primary key field used when a schema does not configure one.
pub const DEFAULT_PRIMARY_KEY: &str = "_id";

/// Declared type of a model field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Double,
    Bool,
    DateTime,
    Uuid,
    ObjectId,
    /// An embedded document without a schema (maps, raw documents).
    Document,
    /// Any BSON value.
    Any,
    /// A nested model with its own schema.
    Model(ModelRef),
    /// An array of the element type.
    Array(Box<FieldType>),
}

impl FieldType {
    /// Returns the innermost element type, unwrapping nested arrays.
    pub fn innermost(&self) -> &FieldType {
        match self {
            FieldType::Array(inner) => inner.innermost(),
            other => other,
        }
    }
}

/// A lazily resolved reference to another model's schema.
#[derive(Clone, Copy)]
pub struct ModelRef {
    name: &'static str,
    schema: fn() -> &'static Schema,
}

impl ModelRef {
    /// Creates a reference to the schema of `M` without resolving it.
    pub fn of<M: Model>() -> Self {
        let full = std::any::type_name::<M>();

        ModelRef {
            name: full.rsplit("::").next().unwrap_or(full),
            schema: M::schema,
        }
    }

    /// The short type name of the referenced model.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolves the referenced schema.
    pub fn schema(&self) -> &'static Schema {
        (self.schema)()
    }
}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelRef").field(&self.name).finish()
    }
}

impl PartialEq for ModelRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Describes a single field of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    field_type: FieldType,
    optional: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType, optional: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional,
        }
    }

    pub(crate) fn any(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Any, true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// Whether the declared type was `Option<T>`.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_array(&self) -> bool {
        matches!(self.field_type, FieldType::Array(_))
    }

    /// The element type of an array field.
    pub fn element_type(&self) -> Option<&FieldType> {
        match &self.field_type {
            FieldType::Array(inner) => Some(inner),
            _ => None,
        }
    }

    /// The nested model of this field, looking through arrays.
    pub fn nested_model(&self) -> Option<ModelRef> {
        match self.field_type.innermost() {
            FieldType::Model(model) => Some(*model),
            _ => None,
        }
    }

    /// Whether arbitrary sub-keys may be addressed below this field.
    pub fn is_open_document(&self) -> bool {
        matches!(self.field_type.innermost(), FieldType::Document | FieldType::Any)
    }
}

/// Field descriptor table of a model.
#[derive(Debug, Clone)]
pub struct Schema {
    model_name: String,
    collection: Option<String>,
    primary_key: String,
    fields: IndexMap<String, FieldDescriptor>,
}

impl Schema {
    /// Creates a builder for the schema of the model named `model_name`.
    pub fn builder(model_name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            schema: Schema {
                model_name: model_name.into(),
                collection: None,
                primary_key: DEFAULT_PRIMARY_KEY.to_string(),
                fields: IndexMap::new(),
            },
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    /// Looks up a top-level field by name.
    pub fn resolve(&self, name: &str) -> DocMapResult<&FieldDescriptor> {
        self.fields
            .get(name)
            .ok_or_else(|| DocMapError::attribute(&self.model_name, name, "no such field"))
    }

    /// Resolves a dotted path, walking into nested models.
    ///
    /// # Errors
    ///
    /// Returns [`DocMapError::AttributeResolution`] when a segment does not exist or
    /// descends into a scalar, and [`DocMapError::RecursionLimit`] when the path is
    /// deeper than [`MAX_PATH_DEPTH`].
    pub fn resolve_path(&self, path: &str) -> DocMapResult<FieldDescriptor> {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();
        let mut current = self.resolve(head)?.clone();
        let mut depth = 1;

        for segment in segments {
            depth += 1;

            if depth > MAX_PATH_DEPTH {
                return Err(DocMapError::RecursionLimit(path.to_string()));
            }

            current = child_descriptor(&current, segment)?;
        }

        Ok(current)
    }

    /// Collection name for this model.
    ///
    /// An explicit override wins, then the configured collection, then the
    /// lowercased model name with its trailing `s` normalized to exactly one.
    pub fn collection_name(&self, override_name: Option<&str>) -> String {
        if let Some(name) = override_name {
            return name.to_string();
        }

        if let Some(name) = &self.collection {
            return name.clone();
        }

        format!("{}s", self.model_name.to_lowercase().trim_end_matches('s'))
    }

    /// Eagerly enumerates every dotted field path of this model.
    ///
    /// # Errors
    ///
    /// Returns [`DocMapError::RecursionLimit`] when a model appears on its own
    /// ancestor chain, since the set of paths would be infinite.
    pub fn field_paths(&self) -> DocMapResult<Vec<FieldPath>> {
        let mut paths = Vec::new();
        let mut ancestors = vec![self.model_name.as_str()];

        self.collect_paths(None, &mut ancestors, &mut paths)?;

        Ok(paths)
    }

    fn collect_paths<'s>(
        &'s self,
        prefix: Option<&FieldPath>,
        ancestors: &mut Vec<&'s str>,
        paths: &mut Vec<FieldPath>,
    ) -> DocMapResult<()> {
        for (name, descriptor) in &self.fields {
            let path = match prefix {
                Some(prefix) => prefix.child(name),
                None => FieldPath::new(name.as_str()),
            };

            paths.push(path.clone());

            if let Some(model) = descriptor.nested_model() {
                let nested: &'static Schema = model.schema();

                if ancestors.contains(&nested.model_name.as_str()) {
                    return Err(DocMapError::RecursionLimit(path.to_string()));
                }

                ancestors.push(nested.model_name.as_str());
                nested.collect_paths(Some(&path), ancestors, paths)?;
                ancestors.pop();
            }
        }

        Ok(())
    }
}

/// Resolves `name` one level below `parent`.
pub(crate) fn child_descriptor(parent: &FieldDescriptor, name: &str) -> DocMapResult<FieldDescriptor> {
    if let Some(model) = parent.nested_model() {
        return model.schema().resolve(name).cloned();
    }

    if parent.is_open_document() {
        return Ok(FieldDescriptor::any(name));
    }

    Err(DocMapError::attribute(
        parent.name(),
        name,
        "field is not a nested model",
    ))
}

/// Fluent builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    /// Sets the collection name used when no override is given.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.schema.collection = Some(name.into());
        self
    }

    /// Sets the primary key field name.
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.schema.primary_key = name.into();
        self
    }

    /// Adds a field whose descriptor is derived from the Rust type `T`.
    pub fn field<T: SchemaType + ?Sized>(self, name: impl Into<String>) -> Self {
        self.field_with(name, T::field_type(), T::OPTIONAL)
    }

    /// Adds a field with an explicit descriptor.
    pub fn field_with(mut self, name: impl Into<String>, field_type: FieldType, optional: bool) -> Self {
        let name = name.into();

        self.schema
            .fields
            .insert(name.clone(), FieldDescriptor::new(name, field_type, optional));
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

/// Maps a Rust type to the declared [`FieldType`] of a schema field.
///
/// Implemented for primitives, strings, BSON and chrono/uuid scalar types, the
/// standard collections and `Option`/`Box`. Models get an implementation from
/// `#[derive(Model)]`.
pub trait SchemaType {
    /// Whether a field of this type may be absent.
    const OPTIONAL: bool = false;

    fn field_type() -> FieldType;
}

macro_rules! scalar_schema_type {
    ($variant:ident => $($ty:ty),+ $(,)?) => {
        $(
            impl SchemaType for $ty {
                fn field_type() -> FieldType {
                    FieldType::$variant
                }
            }
        )+
    };
}

scalar_schema_type!(String => String, str, char);
scalar_schema_type!(Int32 => i8, i16, i32, u8, u16);
scalar_schema_type!(Int64 => i64, u32, u64, isize, usize);
scalar_schema_type!(Double => f32, f64);
scalar_schema_type!(Bool => bool);
scalar_schema_type!(DateTime => bson::DateTime, chrono::DateTime<chrono::Utc>);
scalar_schema_type!(Uuid => uuid::Uuid, bson::Uuid);
scalar_schema_type!(ObjectId => ObjectId);
scalar_schema_type!(Document => Document);
scalar_schema_type!(Any => Bson, serde_json::Value);

impl<T: SchemaType> SchemaType for Option<T> {
    const OPTIONAL: bool = true;

    fn field_type() -> FieldType {
        T::field_type()
    }
}

impl<T: SchemaType + ?Sized> SchemaType for Box<T> {
    const OPTIONAL: bool = T::OPTIONAL;

    fn field_type() -> FieldType {
        T::field_type()
    }
}

macro_rules! array_schema_type {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl<T: SchemaType> SchemaType for $ty<T> {
                fn field_type() -> FieldType {
                    FieldType::Array(Box::new(T::field_type()))
                }
            }
        )+
    };
}

array_schema_type!(Vec, VecDeque, HashSet, BTreeSet);

impl<T: SchemaType> SchemaType for [T] {
    fn field_type() -> FieldType {
        FieldType::Array(Box::new(T::field_type()))
    }
}

impl<T: SchemaType, const N: usize> SchemaType for [T; N] {
    fn field_type() -> FieldType {
        FieldType::Array(Box::new(T::field_type()))
    }
}

impl<T: SchemaType> SchemaType for HashMap<String, T> {
    fn field_type() -> FieldType {
        FieldType::Document
    }
}

impl<T: SchemaType> SchemaType for BTreeMap<String, T> {
    fn field_type() -> FieldType {
        FieldType::Document
    }
}


#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{fixtures::*, *};

    #[test]
    fn option_fields_are_optional_with_inner_type() {
        let zip = Address::schema().resolve("zip").unwrap();

        assert!(zip.is_optional());
        assert_eq!(zip.field_type(), &FieldType::String);
    }

    #[test]
    fn array_fields_expose_element_type() {
        let tags = User::schema().resolve("tags").unwrap();

        assert!(tags.is_array());
        assert_eq!(tags.element_type(), Some(&FieldType::String));
        assert!(tags.nested_model().is_none());
    }

    #[test]
    fn array_of_models_exposes_nested_schema() {
        let friends = User::schema().resolve("friends").unwrap();
        let nested = friends.nested_model().unwrap();

        assert_eq!(nested.name(), "User");
        assert_eq!(nested.schema().model_name(), "User");
    }

    #[test]
    fn resolves_dotted_paths_through_nested_models() {
        let city = User::schema().resolve_path("address.city").unwrap();
        assert_eq!(city.field_type(), &FieldType::String);

        let nested = User::schema().resolve_path("friends.address.zip").unwrap();
        assert!(nested.is_optional());
    }

    #[test]
    fn open_documents_accept_any_sub_key() {
        let key = User::schema().resolve_path("metadata.anything").unwrap();
        assert_eq!(key.field_type(), &FieldType::Any);
    }

    #[test]
    fn unknown_attributes_fail_resolution() {
        let err = User::schema().resolve("nickname").unwrap_err();
        assert!(matches!(err, DocMapError::AttributeResolution { .. }));

        let err = User::schema().resolve_path("age.value").unwrap_err();
        assert!(matches!(err, DocMapError::AttributeResolution { .. }));
    }

    #[test]
    fn lazy_resolution_of_self_reference_is_bounded() {
        let deep = std::iter::repeat("friends")
            .take(MAX_PATH_DEPTH)
            .collect::<Vec<_>>()
            .join(".");
        assert!(User::schema().resolve_path(&deep).is_ok());

        let too_deep = format!("{deep}.name");
        assert_eq!(
            User::schema().resolve_path(&too_deep).unwrap_err(),
            DocMapError::RecursionLimit(too_deep.clone()),
        );
    }

    #[test]
    fn eager_traversal_detects_cycles() {
        let paths = Address::schema().field_paths().unwrap();
        assert_eq!(
            paths.iter().map(FieldPath::as_str).collect::<Vec<_>>(),
            vec!["street", "city", "zip"],
        );

        let err = User::schema().field_paths().unwrap_err();
        assert_eq!(err, DocMapError::RecursionLimit("friends".to_string()));
    }

    #[test]
    fn collection_name_resolution_order() {
        assert_eq!(User::schema().collection_name(None), "users");
        assert_eq!(Address::schema().collection_name(None), "addres");
        assert_eq!(Status::schema().collection_name(None), "status_log");
        assert_eq!(Status::schema().collection_name(Some("codes")), "codes");
    }
}
