//! Scope-local accumulation of pending update operators.
//!
//! Every [`FieldProxy`](crate::field::FieldProxy) mutation records into the
//! [`MutationContext`] of the current scope: the current thread for blocking
//! workers, the current tokio task inside [`task_scope`]. Async workers refuse
//! to record outside a task scope. All query builders created in
//! the same scope share that context until it is cleared, so a mutation recorded
//! through one builder is sent by `mutate()` on any other builder of the scope.
//!
//! ```ignore
//! let age = users.field("age")?;
//! age.inc(1)?;
//!
//! // Both builders see the pending `$inc`.
//! let adults = users.find(age.gte(18));
//! let seniors = users.find(age.gte(65));
//! seniors.mutate()?; // sends {"$inc": {"age": 1}} filtered by age >= 65
//! ```
//!
//! Use [`scope`], [`Scoped`] or [`MutationHandle::clear`] to bound the lifetime
//! of pending mutations explicitly.

use std::{
    future::Future,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use bson::{doc, Bson, Document};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{
    error::{DocMapError, DocMapResult},
    expr::FieldPath,
};

/// Update operators a mutation entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Set,
    Unset,
    Inc,
    Mul,
    Max,
    Min,
    Push,
    AddToSet,
    Pull,
    PopFirst,
    PopLast,
}

impl UpdateOp {
    /// The update operator this entry compiles under.
    ///
    /// Both pop variants share `$pop`, so only one of them can be pending per path.
    pub fn symbol(&self) -> &'static str {
        match self {
            UpdateOp::Set => "$set",
            UpdateOp::Unset => "$unset",
            UpdateOp::Inc => "$inc",
            UpdateOp::Mul => "$mul",
            UpdateOp::Max => "$max",
            UpdateOp::Min => "$min",
            UpdateOp::Push => "$push",
            UpdateOp::AddToSet => "$addToSet",
            UpdateOp::Pull => "$pull",
            UpdateOp::PopFirst | UpdateOp::PopLast => "$pop",
        }
    }

    fn canonical_operand(&self, operand: &Bson) -> Bson {
        match (self, operand) {
            (UpdateOp::Unset, _) => Bson::String(String::new()),
            (UpdateOp::PopFirst, _) => Bson::Int32(-1),
            (UpdateOp::PopLast, _) => Bson::Int32(1),
            (UpdateOp::Push | UpdateOp::AddToSet, Bson::Array(items)) => {
                Bson::Document(doc! { "$each": items.clone() })
            }
            (UpdateOp::Pull, Bson::Array(items)) => Bson::Document(doc! { "$in": items.clone() }),
            (_, operand) => operand.clone(),
        }
    }
}

/// A pending update of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEntry {
    pub op: UpdateOp,
    pub operand: Bson,
}

/// Pending update operators grouped by operator category, then by field path.
///
/// There is at most one entry per `(category, path)`: a later record replaces
/// the earlier one, so `inc(5)` followed by `inc(3)` leaves `inc(3)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationContext {
    categories: IndexMap<&'static str, IndexMap<FieldPath, MutationEntry>>,
}

impl MutationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pending update, replacing any entry of the same category and path.
    ///
    /// Any non-unset operator cancels a pending unset of the same path. An unset
    /// keeps the other entries of the path, which makes [`compile`](Self::compile) fail.
    ///
    /// # Errors
    ///
    /// Returns [`DocMapError::InvalidMutation`] when an `$inc`/`$mul` operand is
    /// not a finite number.
    pub fn record(&mut self, path: FieldPath, op: UpdateOp, operand: Bson) -> DocMapResult<()> {
        if matches!(op, UpdateOp::Inc | UpdateOp::Mul) {
            ensure_finite_number(&path, &operand)?;
        }

        if op != UpdateOp::Unset {
            self.remove(UpdateOp::Unset.symbol(), &path);
        }

        tracing::trace!(path = %path, op = op.symbol(), "recorded mutation");

        self.categories
            .entry(op.symbol())
            .or_default()
            .insert(path, MutationEntry { op, operand });

        Ok(())
    }

    /// Returns the pending entry for `path` under the category of `op`.
    pub fn get(&self, path: &FieldPath, op: UpdateOp) -> Option<&MutationEntry> {
        self.categories
            .get(op.symbol())
            .and_then(|entries| entries.get(path))
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Number of pending entries across all categories.
    pub fn len(&self) -> usize {
        self.categories.values().map(IndexMap::len).sum()
    }

    pub fn clear(&mut self) {
        self.categories.clear();
    }

    /// Compiles the pending entries into an update document.
    ///
    /// # Errors
    ///
    /// Returns [`DocMapError::ConflictingMutation`] when a path carries an unset
    /// alongside another operator.
    pub fn compile(&self) -> DocMapResult<Document> {
        if let Some(unsets) = self.categories.get(UpdateOp::Unset.symbol()) {
            for path in unsets.keys() {
                let conflicting = self
                    .categories
                    .iter()
                    .any(|(category, entries)| *category != "$unset" && entries.contains_key(path));

                if conflicting {
                    return Err(DocMapError::ConflictingMutation(path.to_string()));
                }
            }
        }

        let update = self
            .categories
            .iter()
            .map(|(category, entries)| {
                let fields = entries
                    .iter()
                    .map(|(path, entry)| (path.to_string(), entry.op.canonical_operand(&entry.operand)))
                    .collect::<Document>();

                (category.to_string(), Bson::Document(fields))
            })
            .collect::<Document>();

        tracing::debug!(update = %update, "compiled update document");

        Ok(update)
    }

    fn remove(&mut self, category: &str, path: &FieldPath) {
        if let Some(entries) = self.categories.get_mut(category) {
            entries.shift_remove(path);

            if entries.is_empty() {
                self.categories.shift_remove(category);
            }
        }
    }
}

fn ensure_finite_number(path: &FieldPath, operand: &Bson) -> DocMapResult<()> {
    match operand {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Decimal128(_) => Ok(()),
        Bson::Double(value) if value.is_finite() => Ok(()),
        Bson::Double(_) => Err(DocMapError::invalid_mutation(path.as_str(), "operand must be finite")),
        _ => Err(DocMapError::invalid_mutation(path.as_str(), "operand must be numeric")),
    }
}

/// Shared handle to the mutation context of one scope.
#[derive(Debug, Clone, Default)]
pub struct MutationHandle(Arc<Mutex<MutationContext>>);

thread_local! {
    static THREAD_MUTATIONS: MutationHandle = MutationHandle::default();
}

tokio::task_local! {
    static TASK_MUTATIONS: MutationHandle;
}

impl MutationHandle {
    /// Returns the context of the current scope, creating it on first use.
    ///
    /// Inside [`task_scope`] this is the task's context, otherwise the thread's.
    pub fn current() -> Self {
        TASK_MUTATIONS
            .try_with(Clone::clone)
            .unwrap_or_else(|_| THREAD_MUTATIONS.with(Clone::clone))
    }

    /// Returns the context of the enclosing [`task_scope`].
    ///
    /// Async workers only ever use this context, never the thread's, since
    /// unrelated tasks may share a worker thread.
    pub fn task() -> DocMapResult<Self> {
        TASK_MUTATIONS
            .try_with(Clone::clone)
            .map_err(|_| DocMapError::NoTaskScope)
    }

    pub fn record(&self, path: FieldPath, op: UpdateOp, operand: Bson) -> DocMapResult<()> {
        self.0.lock().record(path, op, operand)
    }

    pub fn compile(&self) -> DocMapResult<Document> {
        self.0.lock().compile()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Copies the pending entries.
    pub fn snapshot(&self) -> MutationContext {
        self.0.lock().clone()
    }

    /// Whether both handles point at the same context.
    pub fn same_scope(&self, other: &MutationHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Runs `future` with a fresh mutation context private to it.
///
/// Mutations recorded inside the future never reach the enclosing thread's context.
pub async fn task_scope<F: Future>(future: F) -> F::Output {
    TASK_MUTATIONS.scope(MutationHandle::default(), future).await
}

/// Returns a guard over the current context that clears it when dropped.
pub fn scope() -> Scoped<MutationHandle> {
    let handle = MutationHandle::current();
    Scoped::new(handle.clone(), handle)
}

/// Wraps a value and clears a mutation context when dropped.
#[derive(Debug)]
pub struct Scoped<T> {
    inner: T,
    handle: MutationHandle,
}

impl<T> Scoped<T> {
    pub fn new(inner: T, handle: MutationHandle) -> Self {
        Self { inner, handle }
    }
}

impl<T> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for Scoped<T> {
    fn drop(&mut self) {
        let pending = self.handle.len();

        if pending > 0 {
            tracing::debug!(pending, "discarding pending mutations at scope exit");
        }

        self.handle.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn path(p: &str) -> FieldPath {
        FieldPath::new(p)
    }

    #[test]
    fn repeated_numeric_mutation_overwrites() {
        let mut ctx = MutationContext::new();
        ctx.record(path("age"), UpdateOp::Inc, Bson::Int32(5)).unwrap();
        ctx.record(path("age"), UpdateOp::Inc, Bson::Int32(3)).unwrap();

        assert_eq!(ctx.compile().unwrap(), doc! { "$inc": { "age": 3 } });
    }

    #[test]
    fn categories_compile_in_first_recorded_order() {
        let mut ctx = MutationContext::new();
        ctx.record(path("name"), UpdateOp::Set, "bob".into()).unwrap();
        ctx.record(path("age"), UpdateOp::Inc, Bson::Int32(1)).unwrap();
        ctx.record(path("email"), UpdateOp::Set, "b@x.io".into()).unwrap();

        assert_eq!(
            ctx.compile().unwrap(),
            doc! {
                "$set": { "name": "bob", "email": "b@x.io" },
                "$inc": { "age": 1 },
            },
        );
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn unset_after_set_conflicts() {
        let mut ctx = MutationContext::new();
        ctx.record(path("name"), UpdateOp::Set, "bob".into()).unwrap();
        ctx.record(path("name"), UpdateOp::Unset, Bson::Null).unwrap();

        assert_eq!(
            ctx.compile().unwrap_err(),
            DocMapError::ConflictingMutation("name".to_string()),
        );
    }

    #[test]
    fn set_after_unset_replaces_it() {
        let mut ctx = MutationContext::new();
        ctx.record(path("name"), UpdateOp::Unset, Bson::Null).unwrap();
        ctx.record(path("name"), UpdateOp::Set, "bob".into()).unwrap();

        assert_eq!(ctx.compile().unwrap(), doc! { "$set": { "name": "bob" } });
    }

    #[test]
    fn canonical_operands() {
        let mut ctx = MutationContext::new();
        ctx.record(path("nickname"), UpdateOp::Unset, Bson::Null).unwrap();
        ctx.record(path("tags"), UpdateOp::Push, Bson::Array(vec!["a".into(), "b".into()])).unwrap();
        ctx.record(path("roles"), UpdateOp::AddToSet, "admin".into()).unwrap();
        ctx.record(path("scores"), UpdateOp::Pull, Bson::Array(vec![1.into(), 2.into()])).unwrap();
        ctx.record(path("queue"), UpdateOp::PopFirst, Bson::Null).unwrap();

        assert_eq!(
            ctx.compile().unwrap(),
            doc! {
                "$unset": { "nickname": "" },
                "$push": { "tags": { "$each": ["a", "b"] } },
                "$addToSet": { "roles": "admin" },
                "$pull": { "scores": { "$in": [1, 2] } },
                "$pop": { "queue": -1 },
            },
        );
    }

    #[test]
    fn pops_share_one_category() {
        let mut ctx = MutationContext::new();
        ctx.record(path("queue"), UpdateOp::PopFirst, Bson::Null).unwrap();
        ctx.record(path("queue"), UpdateOp::PopLast, Bson::Null).unwrap();

        assert_eq!(ctx.compile().unwrap(), doc! { "$pop": { "queue": 1 } });
    }

    #[test]
    fn rejects_non_numeric_increments() {
        let mut ctx = MutationContext::new();

        assert!(matches!(
            ctx.record(path("age"), UpdateOp::Inc, "five".into()),
            Err(DocMapError::InvalidMutation { .. }),
        ));
        assert!(matches!(
            ctx.record(path("age"), UpdateOp::Mul, Bson::Double(f64::NAN)),
            Err(DocMapError::InvalidMutation { .. }),
        ));
        assert!(ctx.is_empty());
    }

    #[test]
    fn empty_context_compiles_to_empty_document() {
        assert_eq!(MutationContext::new().compile().unwrap(), Document::new());
    }

    #[test]
    fn current_handle_is_shared_within_a_thread() {
        let first = MutationHandle::current();
        let second = MutationHandle::current();
        assert!(first.same_scope(&second));

        first.record(path("age"), UpdateOp::Inc, Bson::Int32(1)).unwrap();
        let other = std::thread::spawn(|| MutationHandle::current().snapshot()).join().unwrap();

        assert!(other.is_empty());
        assert_eq!(second.len(), 1);
        first.clear();
    }

    #[test]
    fn scope_guard_clears_on_drop() {
        {
            let guard = scope();
            guard.record(path("age"), UpdateOp::Inc, Bson::Int32(1)).unwrap();
            assert!(!MutationHandle::current().is_empty());
        }

        assert!(MutationHandle::current().is_empty());
    }

    #[tokio::test]
    async fn task_scope_isolates_from_thread_context() {
        let outer = MutationHandle::current();

        let inner = task_scope(async {
            let handle = MutationHandle::current();
            handle.record(path("age"), UpdateOp::Inc, Bson::Int32(2)).unwrap();
            handle
        })
        .await;

        assert!(!inner.same_scope(&outer));
        assert_eq!(inner.len(), 1);
        assert!(outer.is_empty());
    }

    #[tokio::test]
    async fn task_context_requires_a_task_scope() {
        assert_eq!(MutationHandle::task().unwrap_err(), DocMapError::NoTaskScope);

        let same = task_scope(async {
            MutationHandle::task().unwrap().same_scope(&MutationHandle::current())
        })
        .await;
        assert!(same);
    }
}
