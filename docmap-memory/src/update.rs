//! Update operators applied to stored documents.
//!
//! Each operator takes a dotted path and its operand from the compiled update
//! document and returns whether the stored document changed.

use std::cmp::Ordering;

use bson::{Bson, Document};

use docmap_core::error::{DocMapError, DocMapResult};

use crate::evaluator::{sort_cmp, value_matches};

fn invalid(message: impl Into<String>) -> DocMapError {
    DocMapError::Driver(message.into())
}

/// Resolves a dotted path to its parent document and leaf key.
///
/// With `create`, missing intermediate documents are inserted; otherwise a
/// missing intermediate yields `None`.
pub(crate) fn parent_mut<'d, 'p>(
    document: &'d mut Document,
    path: &'p str,
    create: bool,
) -> DocMapResult<Option<(&'d mut Document, &'p str)>> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    if leaf.is_empty() {
        return Err(invalid(format!("invalid field path '{path}'")));
    }

    let mut current = document;

    for segment in parents.into_iter().flat_map(|parents| parents.split('.')) {
        if !current.contains_key(segment) {
            if !create {
                return Ok(None);
            }
            current.insert(segment, Document::new());
        }

        current = match current.get_mut(segment) {
            Some(Bson::Document(child)) => child,
            _ => {
                return Err(invalid(format!(
                    "field path '{path}': '{segment}' is not a document"
                )));
            }
        };
    }

    Ok(Some((current, leaf)))
}

/// Applies every operator of `update` to `document`.
///
/// # Errors
///
/// Returns [`DocMapError::Driver`] for replacement-style updates, unknown
/// operators, and operands the operator cannot apply (e.g. `$inc` on a string).
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> DocMapResult<bool> {
    if update.is_empty() {
        return Err(invalid("update document is empty"));
    }

    let mut modified = false;

    for (operator, fields) in update {
        if !operator.starts_with('$') {
            return Err(invalid(format!(
                "update document may only contain operators, found '{operator}'"
            )));
        }

        let fields = fields
            .as_document()
            .ok_or_else(|| invalid(format!("{operator} expects a document of fields")))?;

        for (path, operand) in fields {
            modified |= match operator.as_str() {
                "$set" => op_set(document, path, operand)?,
                "$unset" => op_unset(document, path)?,
                "$inc" => op_arithmetic(document, path, operand, Arithmetic::Add)?,
                "$mul" => op_arithmetic(document, path, operand, Arithmetic::Mul)?,
                "$max" => op_extreme(document, path, operand, Ordering::Greater)?,
                "$min" => op_extreme(document, path, operand, Ordering::Less)?,
                "$push" => op_push(document, path, operand, false)?,
                "$addToSet" => op_push(document, path, operand, true)?,
                "$pull" => op_pull(document, path, operand)?,
                "$pop" => op_pop(document, path, operand)?,
                other => return Err(invalid(format!("unsupported update operator '{other}'"))),
            };
        }
    }

    Ok(modified)
}

pub(crate) fn op_set(document: &mut Document, path: &str, value: &Bson) -> DocMapResult<bool> {
    let Some((parent, leaf)) = parent_mut(document, path, true)? else {
        return Ok(false);
    };

    if parent.get(leaf) == Some(value) {
        return Ok(false);
    }

    parent.insert(leaf, value.clone());
    Ok(true)
}

fn op_unset(document: &mut Document, path: &str) -> DocMapResult<bool> {
    match parent_mut(document, path, false)? {
        Some((parent, leaf)) => Ok(parent.remove(leaf).is_some()),
        None => Ok(false),
    }
}

#[derive(Debug, Clone, Copy)]
enum Arithmetic {
    Add,
    Mul,
}

impl Arithmetic {
    fn operator(self) -> &'static str {
        match self {
            Arithmetic::Add => "$inc",
            Arithmetic::Mul => "$mul",
        }
    }

    fn int32(self, a: i32, b: i32) -> Option<i32> {
        match self {
            Arithmetic::Add => a.checked_add(b),
            Arithmetic::Mul => a.checked_mul(b),
        }
    }

    fn int64(self, a: i64, b: i64) -> Option<i64> {
        match self {
            Arithmetic::Add => a.checked_add(b),
            Arithmetic::Mul => a.checked_mul(b),
        }
    }

    fn double(self, a: f64, b: f64) -> f64 {
        match self {
            Arithmetic::Add => a + b,
            Arithmetic::Mul => a * b,
        }
    }

    /// Applies the operation with type promotion: `i32 op i32` stays `i32`
    /// unless it overflows, any `i64` operand widens to `i64`, and any double
    /// operand yields a double.
    fn apply(self, path: &str, current: &Bson, operand: &Bson) -> DocMapResult<Bson> {
        let overflow = || invalid(format!("{}: integer overflow on '{path}'", self.operator()));

        match (current, operand) {
            (Bson::Int32(a), Bson::Int32(b)) => match self.int32(*a, *b) {
                Some(result) => Ok(Bson::Int32(result)),
                None => self
                    .int64(i64::from(*a), i64::from(*b))
                    .map(Bson::Int64)
                    .ok_or_else(overflow),
            },
            _ => match (integer(current), integer(operand)) {
                (Some(a), Some(b)) => self.int64(a, b).map(Bson::Int64).ok_or_else(overflow),
                _ => match (double(current), double(operand)) {
                    (Some(a), Some(b)) => Ok(Bson::Double(self.double(a, b))),
                    _ => Err(invalid(format!(
                        "{}: cannot apply {operand} to non-numeric field '{path}'",
                        self.operator(),
                    ))),
                },
            },
        }
    }
}

fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        _ => None,
    }
}

fn double(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(value) => Some(*value),
        other => integer(other).map(|value| value as f64),
    }
}

/// `$inc` and `$mul`; a missing field starts at zero of the operand's type.
fn op_arithmetic(document: &mut Document, path: &str, operand: &Bson, arithmetic: Arithmetic) -> DocMapResult<bool> {
    let zero = match operand {
        Bson::Int32(_) => Bson::Int32(0),
        Bson::Int64(_) => Bson::Int64(0),
        Bson::Double(_) => Bson::Double(0.0),
        other => {
            return Err(invalid(format!(
                "{}: operand {other} for '{path}' is not numeric",
                arithmetic.operator(),
            )));
        }
    };

    let Some((parent, leaf)) = parent_mut(document, path, true)? else {
        return Ok(false);
    };

    let current = parent.get(leaf).cloned().unwrap_or(zero);
    let result = arithmetic.apply(path, &current, operand)?;
    let changed = parent.get(leaf) != Some(&result);

    parent.insert(leaf, result);
    Ok(changed)
}

/// `$max` (`keep == Greater`) and `$min` (`keep == Less`).
fn op_extreme(document: &mut Document, path: &str, operand: &Bson, keep: Ordering) -> DocMapResult<bool> {
    let Some((parent, leaf)) = parent_mut(document, path, true)? else {
        return Ok(false);
    };

    let replace = match parent.get(leaf) {
        Some(existing) => sort_cmp(operand, existing) == keep,
        None => true,
    };

    if replace {
        parent.insert(leaf, operand.clone());
    }

    Ok(replace)
}

fn array_mut<'d>(parent: &'d mut Document, leaf: &str, path: &str, operator: &str) -> DocMapResult<Option<&'d mut Vec<Bson>>> {
    match parent.get_mut(leaf) {
        Some(Bson::Array(items)) => Ok(Some(items)),
        Some(_) => Err(invalid(format!("{operator}: field '{path}' is not an array"))),
        None => Ok(None),
    }
}

/// `$push` and `$addToSet`, both accepting `{"$each": [...]}`.
fn op_push(document: &mut Document, path: &str, operand: &Bson, unique: bool) -> DocMapResult<bool> {
    let operator = if unique { "$addToSet" } else { "$push" };
    let values = match operand {
        Bson::Document(modifiers) if modifiers.contains_key("$each") => modifiers
            .get_array("$each")
            .map_err(|_| invalid(format!("{operator}: $each expects an array")))?
            .clone(),
        value => vec![value.clone()],
    };

    let Some((parent, leaf)) = parent_mut(document, path, true)? else {
        return Ok(false);
    };

    if !parent.contains_key(leaf) {
        parent.insert(leaf, Bson::Array(Vec::new()));
    }

    let Some(items) = array_mut(parent, leaf, path, operator)? else {
        return Ok(false);
    };

    let mut changed = false;
    for value in values {
        if unique && items.contains(&value) {
            continue;
        }
        items.push(value);
        changed = true;
    }

    Ok(changed)
}

/// `$pull`: removes elements equal to the operand or matching an operator
/// condition such as `{"$in": [...]}`.
fn op_pull(document: &mut Document, path: &str, operand: &Bson) -> DocMapResult<bool> {
    let Some((parent, leaf)) = parent_mut(document, path, false)? else {
        return Ok(false);
    };

    let Some(items) = array_mut(parent, leaf, path, "$pull")? else {
        return Ok(false);
    };

    let mut kept = Vec::with_capacity(items.len());
    for item in items.iter() {
        if !value_matches(&[item], operand)? {
            kept.push(item.clone());
        }
    }

    let changed = kept.len() != items.len();
    *items = kept;

    Ok(changed)
}

/// `$pop`: `1` removes the last element, `-1` the first.
fn op_pop(document: &mut Document, path: &str, operand: &Bson) -> DocMapResult<bool> {
    let from_end = match integer(operand) {
        Some(1) => true,
        Some(-1) => false,
        _ => return Err(invalid(format!("$pop: operand for '{path}' must be 1 or -1"))),
    };

    let Some((parent, leaf)) = parent_mut(document, path, false)? else {
        return Ok(false);
    };

    let Some(items) = array_mut(parent, leaf, path, "$pop")? else {
        return Ok(false);
    };

    if items.is_empty() {
        return Ok(false);
    }

    if from_end {
        items.pop();
    } else {
        items.remove(0);
    }

    Ok(true)
}

/// Builds the base document of an upsert from the equality clauses of a filter.
pub(crate) fn seed_from_filter(filter: &Document) -> DocMapResult<Document> {
    let mut seed = Document::new();
    seed_into(&mut seed, filter)?;
    Ok(seed)
}

fn seed_into(seed: &mut Document, filter: &Document) -> DocMapResult<()> {
    for (key, condition) in filter {
        if key == "$and" {
            for clause in condition.as_array().into_iter().flatten() {
                if let Bson::Document(clause) = clause {
                    seed_into(seed, clause)?;
                }
            }
            continue;
        }

        if key.starts_with('$') {
            continue;
        }

        match condition {
            Bson::Document(operators) if operators.keys().next().is_some_and(|op| op.starts_with('$')) => {
                if let Some(value) = operators.get("$eq") {
                    op_set(seed, key, value)?;
                }
            }
            literal => {
                op_set(seed, key, literal)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn apply(mut document: Document, update: Document) -> Document {
        apply_update(&mut document, &update).unwrap();
        document
    }

    #[test]
    fn parent_mut_creates_intermediates() {
        let mut document = doc! {};
        let (parent, leaf) = parent_mut(&mut document, "address.geo.lat", true)
            .unwrap()
            .unwrap();
        parent.insert(leaf, 1.5);

        assert_eq!(document, doc! { "address": { "geo": { "lat": 1.5 } } });
    }

    #[test]
    fn parent_mut_rejects_scalar_intermediates() {
        let mut document = doc! { "address": "none" };
        assert!(parent_mut(&mut document, "address.city", true).is_err());
        assert!(parent_mut(&mut doc! {}, "address.city", false).unwrap().is_none());
    }

    #[test]
    fn set_and_unset_nested_fields() {
        let document = apply(
            doc! { "name": "a", "address": { "city": "Oslo", "zip": "1" } },
            doc! { "$set": { "address.city": "Bergen" }, "$unset": { "address.zip": "" } },
        );

        assert_eq!(document, doc! { "name": "a", "address": { "city": "Bergen" } });
    }

    #[test]
    fn inc_promotes_types() {
        let document = apply(
            doc! { "a": i32::MAX, "b": 1, "c": 1 },
            doc! { "$inc": { "a": 1, "b": 2_i64, "c": 0.5, "d": 3 } },
        );

        assert_eq!(
            document,
            doc! { "a": i64::from(i32::MAX) + 1, "b": 3_i64, "c": 1.5, "d": 3 },
        );
    }

    #[test]
    fn mul_on_missing_field_is_zero() {
        let document = apply(doc! { "a": 3 }, doc! { "$mul": { "a": 0.5, "b": 4 } });
        assert_eq!(document, doc! { "a": 1.5, "b": 0 });
    }

    #[test]
    fn inc_on_string_fails() {
        let mut document = doc! { "name": "a" };
        assert!(apply_update(&mut document, &doc! { "$inc": { "name": 1 } }).is_err());
    }

    #[test]
    fn max_and_min_keep_extremes() {
        let document = apply(
            doc! { "hi": 5, "lo": 5 },
            doc! { "$max": { "hi": 3, "new": 1 }, "$min": { "lo": 2.5 } },
        );

        assert_eq!(document, doc! { "hi": 5, "lo": 2.5, "new": 1 });
    }

    #[test]
    fn push_and_add_to_set() {
        let document = apply(
            doc! { "tags": ["a"] },
            doc! {
                "$push": { "tags": { "$each": ["b", "a"] } },
                "$addToSet": { "labels": { "$each": ["x", "x", "y"] } },
            },
        );

        assert_eq!(document, doc! { "tags": ["a", "b", "a"], "labels": ["x", "y"] });
    }

    #[test]
    fn pull_values_and_conditions() {
        let document = apply(
            doc! { "tags": ["a", "b", "c"], "scores": [1, 5, 9] },
            doc! { "$pull": { "tags": { "$in": ["a", "c"] }, "scores": { "$gte": 5 } } },
        );

        assert_eq!(document, doc! { "tags": ["b"], "scores": [1] });
    }

    #[test]
    fn pop_both_ends() {
        let document = apply(doc! { "a": [1, 2, 3], "b": [1, 2, 3] }, doc! { "$pop": { "a": 1, "b": -1 } });
        assert_eq!(document, doc! { "a": [1, 2], "b": [2, 3] });
    }

    #[test]
    fn replacement_documents_are_rejected() {
        let mut document = doc! {};
        assert!(apply_update(&mut document, &doc! { "name": "b" }).is_err());
        assert!(apply_update(&mut document, &doc! {}).is_err());
        assert!(apply_update(&mut document, &doc! { "$rename": { "a": "b" } }).is_err());
    }

    #[test]
    fn upsert_seed_uses_equality_clauses() {
        let seed = seed_from_filter(&doc! {
            "$and": [
                { "name": { "$eq": "a" } },
                { "age": { "$gt": 3 } },
            ],
            "address.city": "Oslo",
        })
        .unwrap();

        assert_eq!(seed, doc! { "name": "a", "address": { "city": "Oslo" } });
    }
}
