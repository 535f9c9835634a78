//! Expression trees and their compilation into filter documents.
//!
//! Expressions are built by [`FieldProxy`](crate::field::FieldProxy) comparisons
//! and combined with `&`, `|` and `!`:
//!
//! ```ignore
//! let age = users.field("age")?;
//! let name = users.field("name")?;
//!
//! let expr = (age.gte(18) & age.lt(65)) | !name.eq("root");
//! assert_eq!(
//!     expr.to_document(),
//!     doc! {
//!         "$or": [
//!             { "$and": [{ "age": { "$gte": 18 } }, { "age": { "$lt": 65 } }] },
//!             { "$nor": [{ "name": { "$eq": "root" } }] },
//!         ]
//!     },
//! );
//! ```
//!
//! Compilation goes through the [`ExprVisitor`] trait, so drivers that need a
//! different target representation can walk the same tree.

use std::{
    convert::Infallible,
    fmt,
    ops::{BitAnd, BitOr, Not},
};

use bson::{doc, Bson, Document};

use crate::error::DocMapError;

/// A dot-joined path locating a possibly nested field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        FieldPath(path.into())
    }

    /// Returns a new path with `name` appended as the last segment.
    pub fn child(&self, name: &str) -> Self {
        FieldPath(format!("{}.{}", self.0, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Number of segments in this path.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath::new(path)
    }
}

impl From<String> for FieldPath {
    fn from(path: String) -> Self {
        FieldPath(path)
    }
}

/// Comparison operators of a field expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (exact match, or array element match).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Field value is one of the operand values.
    In,
    /// Field value is none of the operand values.
    Nin,
    /// Array field contains every operand value.
    All,
}

impl FieldOp {
    /// The query operator this comparison compiles to.
    pub fn symbol(&self) -> &'static str {
        match self {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
            FieldOp::In => "$in",
            FieldOp::Nin => "$nin",
            FieldOp::All => "$all",
        }
    }
}

/// A filter expression over documents of one collection.
///
/// Expressions are immutable once built. Operands are always literal BSON
/// values, never other field paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression.
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(FieldPath, bool),
    /// Compares the length of an array field.
    Size {
        path: FieldPath,
        op: FieldOp,
        len: i64,
    },
    /// Matches a string field against a regular expression.
    Regex {
        path: FieldPath,
        pattern: String,
        options: Option<String>,
    },
    /// Field comparison expression.
    Field {
        path: FieldPath,
        op: FieldOp,
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(path: FieldPath, op: FieldOp, value: Bson) -> Self {
        Expr::Field { path, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// Nested ANDs on either side are folded into a single n-ary node.
    pub fn and(self, other: Expr) -> Self {
        let mut list = match self {
            Expr::And(list) => list,
            expr => vec![expr],
        };

        match other {
            Expr::And(rest) => list.extend(rest),
            expr => list.push(expr),
        }

        Expr::And(list)
    }

    /// Combines this expression with another using logical OR.
    ///
    /// Nested ORs on either side are folded into a single n-ary node.
    pub fn or(self, other: Expr) -> Self {
        let mut list = match self {
            Expr::Or(list) => list,
            expr => vec![expr],
        };

        match other {
            Expr::Or(rest) => list.extend(rest),
            expr => list.push(expr),
        }

        Expr::Or(list)
    }

    /// Negates this expression (logical NOT).
    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Compiles this expression into a filter document.
    pub fn to_document(&self) -> Document {
        match FilterCompiler.visit_expr(self) {
            Ok(document) => document,
            Err(never) => match never {},
        }
    }
}

impl BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        self.or(rhs)
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        self.negate()
    }
}

/// Walks an [`Expr`] tree, producing one output per node.
pub trait ExprVisitor {
    type Output;
    type Error: Into<DocMapError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        path: &FieldPath,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_size(
        &mut self,
        path: &FieldPath,
        op: FieldOp,
        len: i64,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_regex(
        &mut self,
        path: &FieldPath,
        pattern: &str,
        options: Option<&str>,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        path: &FieldPath,
        op: FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(path, should_exist) => self.visit_exists(path, *should_exist),
            Expr::Size { path, op, len } => self.visit_size(path, *op, *len),
            Expr::Regex { path, pattern, options } => {
                self.visit_regex(path, pattern, options.as_deref())
            }
            Expr::Field { path, op, value } => self.visit_field(path, *op, value),
        }
    }
}

/// Compiles expressions into canonical filter documents.
///
/// Equality is always spelled `{"$eq": v}` and negation is emitted as a
/// single-element `$nor`, which is valid at the top level of a filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterCompiler;

impl FilterCompiler {
    fn compile_all(&mut self, exprs: &[Expr]) -> Vec<Document> {
        exprs.iter().map(Expr::to_document).collect()
    }
}

impl ExprVisitor for FilterCompiler {
    type Output = Document;
    type Error = Infallible;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$and": self.compile_all(exprs) })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$or": self.compile_all(exprs) })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$nor": [self.visit_expr(expr)?] })
    }

    fn visit_exists(&mut self, path: &FieldPath, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! { path.as_str(): { "$exists": should_exist } })
    }

    fn visit_size(&mut self, path: &FieldPath, op: FieldOp, len: i64) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$expr": {
                op.symbol(): [{ "$size": format!("${path}") }, len],
            }
        })
    }

    fn visit_regex(
        &mut self,
        path: &FieldPath,
        pattern: &str,
        options: Option<&str>,
    ) -> Result<Self::Output, Self::Error> {
        let mut condition = doc! { "$regex": pattern };

        if let Some(options) = options {
            condition.insert("$options", options);
        }

        Ok(doc! { path.as_str(): condition })
    }

    fn visit_field(&mut self, path: &FieldPath, op: FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! { path.as_str(): { op.symbol(): value.clone() } })
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn value(&self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// A single `(path, direction)` sort specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: FieldPath,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(path: impl Into<FieldPath>) -> Self {
        SortKey {
            path: path.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(path: impl Into<FieldPath>) -> Self {
        SortKey {
            path: path.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Compiles sort keys into a sort document, preserving their order.
pub fn sort_document(keys: &[SortKey]) -> Document {
    keys.iter()
        .map(|key| (key.path.to_string(), Bson::Int32(key.direction.value())))
        .collect()
}
