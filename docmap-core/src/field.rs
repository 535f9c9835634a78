//! Field proxies: attribute access on a model that yields expressions,
//! sort keys and recorded mutations.
//!
//! A [`FieldProxy`] stands for one (possibly dotted) field path. Comparisons
//! return [`Expr`] nodes, unary minus returns a descending [`SortKey`], and the
//! mutation methods record into the scope's [`MutationHandle`]. Array fields are
//! reached through [`ArrayFieldProxy`], which adds membership, size and array
//! update operators.

use std::ops::{AddAssign, Deref, MulAssign, Neg, SubAssign};

use bson::{ser::serialize_to_bson, Bson};
use serde::Serialize;

use crate::{
    error::{DocMapError, DocMapResult},
    expr::{Expr, FieldOp, FieldPath, SortKey},
    index::IndexBuilder,
    mutation::{MutationHandle, UpdateOp},
    schema::{child_descriptor, FieldDescriptor, FieldType, Schema, MAX_PATH_DEPTH},
};

/// A handle on one field path of a model.
#[derive(Debug, Clone)]
pub struct FieldProxy {
    path: FieldPath,
    descriptor: FieldDescriptor,
    mutations: MutationHandle,
}

impl FieldProxy {
    /// Resolves a top-level field of `schema`.
    pub fn root(schema: &Schema, name: &str, mutations: MutationHandle) -> DocMapResult<Self> {
        let descriptor = schema.resolve(name)?.clone();

        Ok(Self {
            path: FieldPath::new(name),
            descriptor,
            mutations,
        })
    }

    /// Resolves a dotted path of `schema` one segment at a time.
    pub fn at_path(schema: &Schema, path: &str, mutations: MutationHandle) -> DocMapResult<Self> {
        let mut segments = path.split('.');
        let mut proxy = Self::root(schema, segments.next().unwrap_or_default(), mutations)?;

        for segment in segments {
            proxy = proxy.field(segment)?;
        }

        Ok(proxy)
    }

    /// Returns the proxy of a nested field, e.g. `address.city`.
    ///
    /// Works through arrays of models (`friends.name`) and into open documents.
    ///
    /// # Errors
    ///
    /// [`DocMapError::AttributeResolution`] when `name` does not exist on the nested
    /// model or this field is a scalar; [`DocMapError::RecursionLimit`] past
    /// [`MAX_PATH_DEPTH`] segments.
    pub fn field(&self, name: &str) -> DocMapResult<FieldProxy> {
        let path = self.path.child(name);

        if path.depth() > MAX_PATH_DEPTH {
            return Err(DocMapError::RecursionLimit(path.to_string()));
        }

        let descriptor = child_descriptor(&self.descriptor, name).map_err(|err| match err {
            DocMapError::AttributeResolution { attribute, reason, .. } => DocMapError::AttributeResolution {
                model: self.path.to_string(),
                attribute,
                reason,
            },
            other => other,
        })?;

        Ok(FieldProxy {
            path,
            descriptor,
            mutations: self.mutations.clone(),
        })
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    /// Views this field as an array field.
    ///
    /// # Errors
    ///
    /// [`DocMapError::AttributeResolution`] if the declared type is not an array.
    pub fn into_array(self) -> DocMapResult<ArrayFieldProxy> {
        if !self.descriptor.is_array() {
            return Err(DocMapError::attribute(
                self.path.to_string(),
                self.descriptor.name(),
                "field is not an array",
            ));
        }

        Ok(ArrayFieldProxy { inner: self })
    }

    fn compare(&self, op: FieldOp, value: Bson) -> Expr {
        Expr::field(self.path.clone(), op, value)
    }

    pub fn eq(&self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Eq, value.into())
    }

    pub fn ne(&self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Ne, value.into())
    }

    pub fn gt(&self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Gt, value.into())
    }

    pub fn gte(&self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Gte, value.into())
    }

    pub fn lt(&self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Lt, value.into())
    }

    pub fn lte(&self, value: impl Into<Bson>) -> Expr {
        self.compare(FieldOp::Lte, value.into())
    }

    /// Matches when the field equals any of `values`.
    pub fn is_in<V: Into<Bson>>(&self, values: impl IntoIterator<Item = V>) -> Expr {
        self.compare(FieldOp::In, collect_array(values))
    }

    /// Matches when the field equals none of `values`.
    pub fn not_in<V: Into<Bson>>(&self, values: impl IntoIterator<Item = V>) -> Expr {
        self.compare(FieldOp::Nin, collect_array(values))
    }

    pub fn exists(&self, should_exist: bool) -> Expr {
        Expr::Exists(self.path.clone(), should_exist)
    }

    pub fn regex(&self, pattern: impl Into<String>) -> Expr {
        Expr::Regex {
            path: self.path.clone(),
            pattern: pattern.into(),
            options: None,
        }
    }

    /// Regex match with flags such as `"i"` or `"ms"`.
    pub fn regex_with(&self, pattern: impl Into<String>, options: impl Into<String>) -> Expr {
        Expr::Regex {
            path: self.path.clone(),
            pattern: pattern.into(),
            options: Some(options.into()),
        }
    }

    /// Starts an index declaration on this field.
    pub fn index(&self) -> IndexBuilder {
        IndexBuilder::on(self.path.clone())
    }

    fn record(&self, op: UpdateOp, operand: Bson) -> DocMapResult<()> {
        self.mutations.record(self.path.clone(), op, operand)
    }

    /// Records `$set` of this field.
    pub fn set(&self, value: impl Into<Bson>) -> DocMapResult<()> {
        self.record(UpdateOp::Set, value.into())
    }

    /// Records `$set` of this field to a serialized nested value.
    pub fn set_model<T: Serialize>(&self, value: &T) -> DocMapResult<()> {
        self.record(UpdateOp::Set, serialize_to_bson(value)?)
    }

    pub fn unset(&self) -> DocMapResult<()> {
        self.record(UpdateOp::Unset, Bson::Null)
    }

    /// Rejects arithmetic operators on fields not declared as numbers.
    fn ensure_numeric(&self) -> DocMapResult<()> {
        match self.descriptor.field_type() {
            FieldType::Int32 | FieldType::Int64 | FieldType::Double | FieldType::Any => Ok(()),
            _ => Err(DocMapError::invalid_mutation(self.path.as_str(), "field is not numeric")),
        }
    }

    pub fn inc(&self, amount: impl Into<Bson>) -> DocMapResult<()> {
        self.ensure_numeric()?;
        self.record(UpdateOp::Inc, amount.into())
    }

    /// Records `$inc` with the negated amount.
    pub fn dec(&self, amount: impl Into<Bson>) -> DocMapResult<()> {
        self.ensure_numeric()?;
        let negated = negate(&self.path, amount.into())?;
        self.record(UpdateOp::Inc, negated)
    }

    pub fn mul(&self, factor: impl Into<Bson>) -> DocMapResult<()> {
        self.ensure_numeric()?;
        self.record(UpdateOp::Mul, factor.into())
    }

    /// Records `$mul` with the reciprocal of `divisor`.
    ///
    /// # Errors
    ///
    /// [`DocMapError::InvalidMutation`] when `divisor` is zero or not numeric.
    pub fn div(&self, divisor: impl Into<Bson>) -> DocMapResult<()> {
        self.ensure_numeric()?;
        let divisor = match divisor.into() {
            Bson::Int32(value) => f64::from(value),
            Bson::Int64(value) => value as f64,
            Bson::Double(value) => value,
            _ => return Err(DocMapError::invalid_mutation(self.path.as_str(), "operand must be numeric")),
        };

        if divisor == 0.0 {
            return Err(DocMapError::invalid_mutation(self.path.as_str(), "division by zero"));
        }

        self.record(UpdateOp::Mul, Bson::Double(1.0 / divisor))
    }

    pub fn max(&self, value: impl Into<Bson>) -> DocMapResult<()> {
        self.record(UpdateOp::Max, value.into())
    }

    pub fn min(&self, value: impl Into<Bson>) -> DocMapResult<()> {
        self.record(UpdateOp::Min, value.into())
    }

    fn assign(&self, result: DocMapResult<()>) {
        if let Err(err) = result {
            tracing::warn!(path = %self.path, error = %err, "discarding compound assignment");
        }
    }
}

fn collect_array<V: Into<Bson>>(values: impl IntoIterator<Item = V>) -> Bson {
    Bson::Array(values.into_iter().map(Into::into).collect())
}

fn wrap_array(value: Bson) -> Bson {
    match value {
        Bson::Array(_) => value,
        other => Bson::Array(vec![other]),
    }
}

fn negate(path: &FieldPath, value: Bson) -> DocMapResult<Bson> {
    match value {
        Bson::Int32(n) => Ok(n
            .checked_neg()
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(-i64::from(n)))),
        Bson::Int64(n) => n
            .checked_neg()
            .map(Bson::Int64)
            .ok_or_else(|| DocMapError::invalid_mutation(path.as_str(), "operand overflows on negation")),
        Bson::Double(n) => Ok(Bson::Double(-n)),
        _ => Err(DocMapError::invalid_mutation(path.as_str(), "operand must be numeric")),
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Numeric operands accepted by the compound assignment operators.
pub trait Numeric: sealed::Sealed + Into<Bson> + Copy {}

macro_rules! numeric {
    ($($ty:ty),+) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Numeric for $ty {}
        )+
    };
}

numeric!(i32, i64, f32, f64);

/// `field += n` records `$inc: n`.
impl<N: Numeric> AddAssign<N> for FieldProxy {
    fn add_assign(&mut self, rhs: N) {
        self.assign(self.inc(rhs));
    }
}

/// `field -= n` records `$inc: -n`.
impl<N: Numeric> SubAssign<N> for FieldProxy {
    fn sub_assign(&mut self, rhs: N) {
        self.assign(self.dec(rhs));
    }
}

/// `field *= n` records `$mul: n`.
///
/// There is no `/=`: division by zero has to be reported, so use [`FieldProxy::div`].
impl<N: Numeric> MulAssign<N> for FieldProxy {
    fn mul_assign(&mut self, rhs: N) {
        self.assign(self.mul(rhs));
    }
}

impl Neg for FieldProxy {
    type Output = SortKey;

    fn neg(self) -> SortKey {
        SortKey::desc(self.path)
    }
}

impl Neg for &FieldProxy {
    type Output = SortKey;

    fn neg(self) -> SortKey {
        SortKey::desc(self.path.clone())
    }
}

impl From<FieldProxy> for SortKey {
    fn from(proxy: FieldProxy) -> Self {
        SortKey::asc(proxy.path)
    }
}

impl From<&FieldProxy> for SortKey {
    fn from(proxy: &FieldProxy) -> Self {
        SortKey::asc(proxy.path.clone())
    }
}

/// A proxy over an array field.
///
/// Dereferences to [`FieldProxy`], so scalar comparisons and nested access keep working.
#[derive(Debug, Clone)]
pub struct ArrayFieldProxy {
    inner: FieldProxy,
}

impl ArrayFieldProxy {
    /// Matches arrays containing `value`, or any of `value` when it is a list.
    pub fn contains(&self, value: impl Into<Bson>) -> Expr {
        self.inner.compare(FieldOp::In, wrap_array(value.into()))
    }

    /// Matches arrays containing neither `value` nor any of a list of values.
    pub fn excludes(&self, value: impl Into<Bson>) -> Expr {
        self.inner.compare(FieldOp::Nin, wrap_array(value.into()))
    }

    /// Matches arrays containing every one of `values`, in any order.
    ///
    /// For exact, order-sensitive equality compare with [`FieldProxy::eq`].
    pub fn matches(&self, values: impl Into<Bson>) -> Expr {
        self.inner.compare(FieldOp::All, wrap_array(values.into()))
    }

    /// Comparisons on the array length.
    pub fn size(&self) -> SizeProxy {
        SizeProxy {
            path: self.inner.path.clone(),
        }
    }

    /// Records `$push`; a list pushes each element.
    pub fn push(&self, value: impl Into<Bson>) -> DocMapResult<()> {
        self.inner.record(UpdateOp::Push, value.into())
    }

    /// Records `$addToSet`; a list adds each element.
    pub fn add_to_set(&self, value: impl Into<Bson>) -> DocMapResult<()> {
        self.inner.record(UpdateOp::AddToSet, value.into())
    }

    /// Records `$pull`; a list pulls every element equal to one of its values.
    pub fn pull(&self, value: impl Into<Bson>) -> DocMapResult<()> {
        self.inner.record(UpdateOp::Pull, value.into())
    }

    pub fn pop_first(&self) -> DocMapResult<()> {
        self.inner.record(UpdateOp::PopFirst, Bson::Null)
    }

    pub fn pop_last(&self) -> DocMapResult<()> {
        self.inner.record(UpdateOp::PopLast, Bson::Null)
    }

    pub fn into_inner(self) -> FieldProxy {
        self.inner
    }
}

impl Deref for ArrayFieldProxy {
    type Target = FieldProxy;

    fn deref(&self) -> &FieldProxy {
        &self.inner
    }
}

impl Neg for ArrayFieldProxy {
    type Output = SortKey;

    fn neg(self) -> SortKey {
        -self.inner
    }
}

/// Comparisons on the length of an array field.
#[derive(Debug, Clone)]
pub struct SizeProxy {
    path: FieldPath,
}

impl SizeProxy {
    fn compare(&self, op: FieldOp, len: i64) -> Expr {
        Expr::Size {
            path: self.path.clone(),
            op,
            len,
        }
    }

    pub fn eq(&self, len: i64) -> Expr {
        self.compare(FieldOp::Eq, len)
    }

    pub fn ne(&self, len: i64) -> Expr {
        self.compare(FieldOp::Ne, len)
    }

    pub fn gt(&self, len: i64) -> Expr {
        self.compare(FieldOp::Gt, len)
    }

    pub fn gte(&self, len: i64) -> Expr {
        self.compare(FieldOp::Gte, len)
    }

    pub fn lt(&self, len: i64) -> Expr {
        self.compare(FieldOp::Lt, len)
    }

    pub fn lte(&self, len: i64) -> Expr {
        self.compare(FieldOp::Lte, len)
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        document::Model,
        expr::SortDirection,
        schema::fixtures::{Address, User},
    };

    fn proxy(path: &str, handle: &MutationHandle) -> FieldProxy {
        FieldProxy::at_path(User::schema(), path, handle.clone()).unwrap()
    }

    #[test]
    fn comparisons_compile_to_operator_documents() {
        let handle = MutationHandle::default();
        let age = proxy("age", &handle);

        assert_eq!(age.eq(30).to_document(), doc! { "age": { "$eq": 30 } });
        assert_eq!(age.ne(30).to_document(), doc! { "age": { "$ne": 30 } });
        assert_eq!(age.lte(30).to_document(), doc! { "age": { "$lte": 30 } });
        assert_eq!(age.is_in([1, 2]).to_document(), doc! { "age": { "$in": [1, 2] } });
        assert_eq!(age.not_in([3]).to_document(), doc! { "age": { "$nin": [3] } });
        assert_eq!(age.exists(false).to_document(), doc! { "age": { "$exists": false } });
    }

    #[test]
    fn nested_fields_use_dotted_paths() {
        let handle = MutationHandle::default();
        let city = proxy("address", &handle).field("city").unwrap();
        assert_eq!(city.eq("Oslo").to_document(), doc! { "address.city": { "$eq": "Oslo" } });

        let friend_name = proxy("friends", &handle).field("name").unwrap();
        assert_eq!(friend_name.path().as_str(), "friends.name");
    }

    #[test]
    fn unknown_nested_attribute_fails_fast() {
        let handle = MutationHandle::default();
        let err = proxy("address", &handle).field("country").unwrap_err();

        assert_eq!(
            err,
            DocMapError::AttributeResolution {
                model: "address".to_string(),
                attribute: "country".to_string(),
                reason: "no such field".to_string(),
            },
        );
        assert!(proxy("age", &handle).field("value").is_err());
    }

    #[test]
    fn self_referential_proxies_stop_at_depth_limit() {
        let handle = MutationHandle::default();
        let mut friends = proxy("friends", &handle);

        for _ in 1..MAX_PATH_DEPTH {
            friends = friends.field("friends").unwrap();
        }

        assert!(matches!(friends.field("name"), Err(DocMapError::RecursionLimit(_))));
    }

    #[test]
    fn contains_wraps_scalar_in_list() {
        let handle = MutationHandle::default();
        let tags = proxy("tags", &handle).into_array().unwrap();

        assert_eq!(tags.contains("x").to_document(), doc! { "tags": { "$in": ["x"] } });
        assert_eq!(tags.contains(vec!["x", "y"]).to_document(), doc! { "tags": { "$in": ["x", "y"] } });
        assert_eq!(tags.excludes("z").to_document(), doc! { "tags": { "$nin": ["z"] } });
        assert_eq!(tags.matches(vec!["a", "b"]).to_document(), doc! { "tags": { "$all": ["a", "b"] } });
    }

    #[test]
    fn size_comparisons_use_expr() {
        let handle = MutationHandle::default();
        let tags = proxy("tags", &handle).into_array().unwrap();

        assert_eq!(
            tags.size().gte(2).to_document(),
            doc! { "$expr": { "$gte": [{ "$size": "$tags" }, 2_i64] } },
        );
    }

    #[test]
    fn scalar_fields_are_not_arrays() {
        let handle = MutationHandle::default();
        assert!(matches!(
            proxy("name", &handle).into_array(),
            Err(DocMapError::AttributeResolution { .. }),
        ));
    }

    #[test]
    fn negation_yields_descending_sort() {
        let handle = MutationHandle::default();
        let age = proxy("age", &handle);

        let desc = -age.clone();
        assert_eq!(desc.direction, SortDirection::Descending);
        assert_eq!(SortKey::from(&age).direction, SortDirection::Ascending);
    }

    #[test]
    fn compound_assignment_records_numeric_updates() {
        let handle = MutationHandle::default();
        let mut age = proxy("age", &handle);
        let mut score = proxy("score", &handle);

        age += 5;
        age -= 2;
        score *= 3;

        assert_eq!(
            handle.compile().unwrap(),
            doc! { "$inc": { "age": -2 }, "$mul": { "score": 3 } },
        );
    }

    #[test]
    fn division_records_reciprocal() {
        let handle = MutationHandle::default();
        let score = proxy("score", &handle);

        score.div(4).unwrap();
        assert_eq!(handle.compile().unwrap(), doc! { "$mul": { "score": 0.25 } });

        assert!(matches!(score.div(0), Err(DocMapError::InvalidMutation { .. })));
    }

    #[test]
    fn arithmetic_requires_a_numeric_field() {
        let handle = MutationHandle::default();
        let name = proxy("name", &handle);
        let mut city = proxy("address.city", &handle);

        for result in [name.inc(5), name.dec(1), name.mul(2), name.div(2)] {
            assert!(matches!(result, Err(DocMapError::InvalidMutation { .. })));
        }
        city += 1;
        assert!(handle.is_empty());

        proxy("friends.age", &handle).inc(1).unwrap();
        proxy("address.zip", &handle).set("10115").unwrap();
        proxy("metadata.visits", &handle).inc(1).unwrap();
        assert_eq!(
            handle.compile().unwrap(),
            doc! { "$inc": { "friends.age": 1, "metadata.visits": 1 }, "$set": { "address.zip": "10115" } },
        );
    }

    #[test]
    fn set_model_serializes_nested_value() {
        let handle = MutationHandle::default();
        let address = Address {
            street: "Main St".to_string(),
            city: "Oslo".to_string(),
            zip: None,
        };

        proxy("address", &handle).set_model(&address).unwrap();

        assert_eq!(
            handle.compile().unwrap(),
            doc! { "$set": { "address": { "street": "Main St", "city": "Oslo", "zip": null } } },
        );
    }

    #[test]
    fn array_updates_record_canonical_operands() {
        let handle = MutationHandle::default();
        let tags = proxy("tags", &handle).into_array().unwrap();

        tags.push(vec!["a", "b"]).unwrap();
        tags.pop_last().unwrap();

        assert_eq!(
            handle.compile().unwrap(),
            doc! { "$push": { "tags": { "$each": ["a", "b"] } }, "$pop": { "tags": 1 } },
        );
    }
}
