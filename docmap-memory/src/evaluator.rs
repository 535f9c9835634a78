//! Filter document evaluation for in-memory matching.
//!
//! This module evaluates compiled filter documents (the output of
//! [`Expr::to_document`](docmap_core::expr::Expr::to_document) or any hand-written
//! filter) against stored BSON documents, following the query semantics of a
//! document database: dotted paths descend into sub-documents and fan out over
//! arrays, and an array field matches a scalar condition when any element does.

use std::cmp::Ordering;

use bson::{datetime::DateTime, oid::ObjectId, Bson, Document};
use regex::RegexBuilder;

use docmap_core::error::{DocMapError, DocMapResult};

/// Comparable representation of BSON values.
///
/// Integers compare exactly as `i64`; only integer/double pairs go through `f64`,
/// so `Int32(3)` equals `Double(3.0)`.
/// Values without a natural ordering fall back to [`Comparable::Other`], which
/// only supports equality.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(Vec<(&'a str, Comparable<'a>)>),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Integer(i64::from(*value)),
            Bson::Int64(value) => Comparable::Integer(*value),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    /// Cross-type ordering used when sorting mixed values.
    fn type_rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Integer(_) | Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Other(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Integer(a), Comparable::Integer(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::Integer(a), Comparable::Number(b)) | (Comparable::Number(b), Comparable::Integer(a)) => {
                *a as f64 == *b
            }
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Integer(a), Comparable::Integer(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::Integer(a), Comparable::Number(b)) => (*a as f64).partial_cmp(b),
            (Comparable::Number(a), Comparable::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Total ordering for sorting: by type rank first, then by value.
pub(crate) fn sort_cmp(left: &Bson, right: &Bson) -> Ordering {
    let (left, right) = (Comparable::from(left), Comparable::from(right));

    match left.type_rank().cmp(&right.type_rank()) {
        Ordering::Equal => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        ordering => ordering,
    }
}

/// Collects every value reachable through a dotted path.
///
/// Numeric segments index into arrays; other segments fan out over arrays of
/// sub-documents.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut found = Vec::new();

    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = document.get(*head) {
            collect(value, rest, &mut found);
        }
    }

    found
}

fn collect<'a>(value: &'a Bson, segments: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(doc) => {
            if let Some(child) = doc.get(*head) {
                collect(child, rest, found);
            }
        }
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(position) => {
                if let Some(item) = items.get(position) {
                    collect(item, rest, found);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    collect(item, segments, found);
                }
            }
        },
        _ => {}
    }
}

fn unsupported(operator: &str) -> DocMapError {
    DocMapError::Driver(format!("unsupported query operator '{operator}'"))
}

fn malformed(operator: &str, expected: &str) -> DocMapError {
    DocMapError::Driver(format!("{operator} expects {expected}"))
}

/// Evaluates filter documents against one stored document.
pub(crate) struct FilterEvaluator<'a> {
    document: &'a Document,
}

impl<'a> FilterEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Returns whether the document satisfies every clause of `filter`.
    pub fn matches(&self, filter: &Document) -> DocMapResult<bool> {
        for (key, condition) in filter {
            let satisfied = match key.as_str() {
                "$and" => self.all_clauses(key, condition)?,
                "$or" => self.any_clause(key, condition)?,
                "$nor" => !self.any_clause(key, condition)?,
                "$expr" => self.expr(condition)?,
                operator if operator.starts_with('$') => return Err(unsupported(operator)),
                path => value_matches(&lookup(self.document, path), condition)?,
            };

            if !satisfied {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn all_clauses(&self, key: &str, condition: &Bson) -> DocMapResult<bool> {
        for clause in clauses(key, condition)? {
            if !self.matches(clause)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any_clause(&self, key: &str, condition: &Bson) -> DocMapResult<bool> {
        for clause in clauses(key, condition)? {
            if self.matches(clause)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Aggregation comparisons such as `{"$gt": [{"$size": "$tags"}, 2]}`.
    fn expr(&self, condition: &Bson) -> DocMapResult<bool> {
        let Bson::Document(expr) = condition else {
            return Err(malformed("$expr", "a document"));
        };

        for (operator, operands) in expr {
            let Some([left, right]) = operands.as_array().map(Vec::as_slice) else {
                return Err(malformed(operator, "two operands"));
            };

            let (Some(left), Some(right)) = (self.operand(left)?, self.operand(right)?) else {
                return Ok(false);
            };

            let (left, right) = (Comparable::from(&left), Comparable::from(&right));
            let satisfied = match operator.as_str() {
                "$eq" => left == right,
                "$ne" => left != right,
                "$gt" => left.partial_cmp(&right) == Some(Ordering::Greater),
                "$gte" => matches!(left.partial_cmp(&right), Some(Ordering::Greater | Ordering::Equal)),
                "$lt" => left.partial_cmp(&right) == Some(Ordering::Less),
                "$lte" => matches!(left.partial_cmp(&right), Some(Ordering::Less | Ordering::Equal)),
                other => return Err(unsupported(other)),
            };

            if !satisfied {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn operand(&self, operand: &Bson) -> DocMapResult<Option<Bson>> {
        match operand {
            Bson::Document(inner) => match inner.get("$size") {
                Some(Bson::String(path)) => Ok(self
                    .field_reference(path)
                    .and_then(|value| value.as_array().map(|items| Bson::Int64(items.len() as i64)))),
                Some(_) => Err(malformed("$size", "a field reference")),
                None => Ok(Some(operand.clone())),
            },
            Bson::String(path) if path.starts_with('$') => {
                Ok(Some(self.field_reference(path).cloned().unwrap_or(Bson::Null)))
            }
            literal => Ok(Some(literal.clone())),
        }
    }

    fn field_reference(&self, reference: &str) -> Option<&'a Bson> {
        let path = reference.strip_prefix('$')?;
        lookup(self.document, path).into_iter().next()
    }
}

fn clauses<'f>(key: &str, condition: &'f Bson) -> DocMapResult<Vec<&'f Document>> {
    condition
        .as_array()
        .ok_or_else(|| malformed(key, "an array of documents"))?
        .iter()
        .map(|clause| clause.as_document().ok_or_else(|| malformed(key, "an array of documents")))
        .collect()
}

/// Matches the values found at one path against a condition: either an
/// operator document like `{"$gt": 3}` or a literal for implicit equality.
pub(crate) fn value_matches(values: &[&Bson], condition: &Bson) -> DocMapResult<bool> {
    match condition {
        Bson::Document(operators) if operators.keys().next().is_some_and(|key| key.starts_with('$')) => {
            operators_match(values, operators)
        }
        literal => Ok(eq_any(values, literal)),
    }
}

fn operators_match(values: &[&Bson], operators: &Document) -> DocMapResult<bool> {
    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => eq_any(values, operand),
            "$ne" => !eq_any(values, operand),
            "$gt" => compare_any(values, operand, |ordering| ordering == Ordering::Greater),
            "$gte" => compare_any(values, operand, |ordering| ordering != Ordering::Less),
            "$lt" => compare_any(values, operand, |ordering| ordering == Ordering::Less),
            "$lte" => compare_any(values, operand, |ordering| ordering != Ordering::Greater),
            "$in" => in_any(values, operand)?,
            "$nin" => !in_any(values, operand)?,
            "$all" => {
                let targets = operand.as_array().ok_or_else(|| malformed("$all", "an array"))?;
                !targets.is_empty() && targets.iter().all(|target| eq_any(values, target))
            }
            "$size" => {
                let len = match operand {
                    Bson::Int32(len) => i64::from(*len),
                    Bson::Int64(len) => *len,
                    _ => return Err(malformed("$size", "an integer")),
                };
                values
                    .iter()
                    .any(|value| value.as_array().is_some_and(|items| items.len() as i64 == len))
            }
            "$exists" => {
                let should_exist = match operand {
                    Bson::Boolean(flag) => *flag,
                    Bson::Int32(flag) => *flag != 0,
                    Bson::Int64(flag) => *flag != 0,
                    _ => return Err(malformed("$exists", "a boolean")),
                };
                values.is_empty() != should_exist
            }
            "$regex" => regex_any(values, operand, operators.get_str("$options").unwrap_or_default())?,
            "$options" => true,
            "$not" => {
                let negated = operand.as_document().ok_or_else(|| malformed("$not", "an operator document"))?;
                !operators_match(values, negated)?
            }
            other => return Err(unsupported(other)),
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Candidate values of a path: each value, plus the elements of array values.
fn candidates<'v>(values: &[&'v Bson]) -> impl Iterator<Item = &'v Bson> {
    values.iter().copied().flat_map(|value: &'v Bson| {
        let elements = value.as_array().map(|items| items.iter()).into_iter().flatten();
        std::iter::once(value).chain(elements)
    })
}

fn eq_any(values: &[&Bson], target: &Bson) -> bool {
    if values.is_empty() {
        return matches!(target, Bson::Null);
    }

    let target = Comparable::from(target);
    candidates(values).any(|value| Comparable::from(value) == target)
}

fn compare_any(values: &[&Bson], target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let target = Comparable::from(target);

    candidates(values).any(|value| {
        Comparable::from(value)
            .partial_cmp(&target)
            .is_some_and(&accept)
    })
}

fn in_any(values: &[&Bson], operand: &Bson) -> DocMapResult<bool> {
    let targets = operand.as_array().ok_or_else(|| malformed("$in", "an array"))?;
    Ok(targets.iter().any(|target| eq_any(values, target)))
}

fn regex_any(values: &[&Bson], pattern: &Bson, options: &str) -> DocMapResult<bool> {
    let (pattern, options) = match pattern {
        Bson::String(pattern) => (pattern.as_str(), options),
        Bson::RegularExpression(regex) => (regex.pattern.as_str(), regex.options.as_str()),
        _ => return Err(malformed("$regex", "a string pattern")),
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| DocMapError::Driver(format!("invalid $regex pattern: {err}")))?;

    Ok(candidates(values).any(|value| value.as_str().is_some_and(|text| regex.is_match(text))))
}

/// Returns the documents matching `filter`, in stored order.
pub(crate) fn filter_documents<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    filter: &Document,
) -> DocMapResult<Vec<&'a Document>> {
    let mut matched = Vec::new();

    for document in documents {
        if FilterEvaluator::new(document).matches(filter)? {
            matched.push(document);
        }
    }

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use bson::{doc, oid::ObjectId};

    use super::*;

    fn user() -> Document {
        doc! {
            "_id": 1,
            "name": "Alice",
            "age": 30,
            "score": 4.5,
            "tags": ["admin", "staff"],
            "address": { "city": "Oslo", "zip": "0150" },
            "friends": [
                { "name": "Bob", "age": 25 },
                { "name": "Carol", "age": 41 },
            ],
        }
    }

    fn matches(filter: Document) -> bool {
        FilterEvaluator::new(&user()).matches(&filter).unwrap()
    }

    #[test]
    fn comparisons_normalize_numbers() {
        assert!(matches(doc! { "age": { "$eq": 30.0 } }));
        assert!(matches(doc! { "age": { "$gt": 29_i64, "$lte": 30 } }));
        assert!(!matches(doc! { "age": { "$lt": 30 } }));
        assert!(matches(doc! { "age": 30 }));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let big = 1_i64 << 53;
        let document = doc! { "counter": big + 1 };
        let evaluator = FilterEvaluator::new(&document);

        assert!(!evaluator.matches(&doc! { "counter": big }).unwrap());
        assert!(evaluator.matches(&doc! { "counter": { "$gt": big } }).unwrap());
        assert_eq!(sort_cmp(&Bson::Int64(big), &Bson::Int64(big + 1)), Ordering::Less);
        assert_eq!(sort_cmp(&Bson::Int32(2), &Bson::Double(2.0)), Ordering::Equal);
    }

    #[test]
    fn comparisons_across_types_never_match() {
        assert!(!matches(doc! { "name": { "$gt": 5 } }));
        assert!(!matches(doc! { "age": { "$lt": "z" } }));
    }

    #[test]
    fn dotted_paths_descend_and_fan_out() {
        assert!(matches(doc! { "address.city": { "$eq": "Oslo" } }));
        assert!(matches(doc! { "friends.name": { "$eq": "Carol" } }));
        assert!(matches(doc! { "friends.1.age": { "$gt": 40 } }));
        assert!(!matches(doc! { "friends.name": { "$eq": "Dave" } }));
    }

    #[test]
    fn array_fields_match_elements() {
        assert!(matches(doc! { "tags": { "$eq": "admin" } }));
        assert!(matches(doc! { "tags": { "$in": ["x", "staff"] } }));
        assert!(matches(doc! { "tags": { "$nin": ["guest"] } }));
        assert!(matches(doc! { "tags": { "$all": ["staff", "admin"] } }));
        assert!(!matches(doc! { "tags": { "$all": ["staff", "guest"] } }));
        assert!(matches(doc! { "tags": { "$size": 2 } }));
    }

    #[test]
    fn logical_operators() {
        assert!(matches(doc! { "$and": [{ "age": { "$gt": 18 } }, { "name": { "$eq": "Alice" } }] }));
        assert!(matches(doc! { "$or": [{ "age": { "$gt": 50 } }, { "name": { "$eq": "Alice" } }] }));
        assert!(!matches(doc! { "$nor": [{ "name": { "$eq": "Alice" } }] }));
        assert!(matches(doc! { "age": { "$not": { "$gt": 40 } } }));
    }

    #[test]
    fn existence_and_null() {
        assert!(matches(doc! { "address.zip": { "$exists": true } }));
        assert!(matches(doc! { "nickname": { "$exists": false } }));
        assert!(matches(doc! { "nickname": { "$eq": null } }));
        assert!(!matches(doc! { "name": { "$eq": null } }));
    }

    #[test]
    fn regex_honours_options() {
        assert!(matches(doc! { "name": { "$regex": "^al" , "$options": "i" } }));
        assert!(!matches(doc! { "name": { "$regex": "^al" } }));
        assert!(matches(doc! { "tags": { "$regex": "^st" } }));
    }

    #[test]
    fn expr_size_comparisons() {
        assert!(matches(doc! { "$expr": { "$gte": [{ "$size": "$tags" }, 2] } }));
        assert!(!matches(doc! { "$expr": { "$gt": [{ "$size": "$tags" }, 2] } }));
        assert!(!matches(doc! { "$expr": { "$eq": [{ "$size": "$name" }, 5] } }));
    }

    #[test]
    fn unknown_operators_are_rejected() {
        let err = FilterEvaluator::new(&user())
            .matches(&doc! { "age": { "$near": 1 } })
            .unwrap_err();
        assert!(matches!(err, DocMapError::Driver(_)));
    }

    #[test]
    fn object_ids_compare_by_value() {
        let id = ObjectId::new();
        let document = doc! { "_id": id };

        assert!(FilterEvaluator::new(&document).matches(&doc! { "_id": id }).unwrap());
        assert!(!FilterEvaluator::new(&document).matches(&doc! { "_id": ObjectId::new() }).unwrap());
    }

    #[test]
    fn sort_order_ranks_types() {
        assert_eq!(sort_cmp(&Bson::Null, &Bson::Int32(1)), Ordering::Less);
        assert_eq!(sort_cmp(&Bson::Int32(2), &Bson::Double(1.5)), Ordering::Greater);
        assert_eq!(sort_cmp(&Bson::String("a".into()), &Bson::Int32(9)), Ordering::Greater);
    }
}
