//! The constraint evaluation protocol.
//!
//! Every constraint follows the same pipeline: retrieve a *factual* value
//! from its primary [`DataReference`], obtain a *target* value (a literal, or
//! retrieved from a second reference), compare the two and report a
//! [`TestResult`].
//!
//! Variants implement [`Retrieve`] for the first two steps and [`Compare`]
//! for the third; a blanket implementation then provides [`Constraint`].
//! Variants whose evaluation does not fit the pipeline implement
//! [`Constraint`] directly, usually still delegating to [`run_test`].

use super::execution::{ContextId, ExecutionContext};
use super::query::Query;
use super::reference::DataReference;
use crate::formatters::{DefaultFormatter, Formatter};
use crate::prelude::*;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Outcome of testing one constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Whether the constraint holds
    pub outcome: bool,
    /// Explanation of a failure, possibly carrying inline markup
    pub failure_message: Option<String>,
    /// Description of the tested constraint
    pub description: Option<String>,
    /// Rendered queries that produced the factual value
    pub factual_queries: Option<Vec<String>>,
    /// Rendered queries that produced the target value
    pub target_queries: Option<Vec<String>>,
}

impl TestResult {
    pub fn success() -> Self {
        Self {
            outcome: true,
            failure_message: None,
            description: None,
            factual_queries: None,
            target_queries: None,
        }
    }

    pub fn failure(
        message: impl Into<String>,
        description: Option<String>,
        factual_queries: Option<Vec<String>>,
        target_queries: Option<Vec<String>>,
    ) -> Self {
        Self {
            outcome: false,
            failure_message: Some(message.into()),
            description,
            factual_queries,
            target_queries,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The failure message rendered by `formatter`.
    pub fn formatted_failure_message(&self, formatter: &dyn Formatter) -> Option<String> {
        self.failure_message.as_deref().map(|m| formatter.fmt_str(m))
    }

    /// The description rendered by `formatter`.
    pub fn formatted_description(&self, formatter: &dyn Formatter) -> Option<String> {
        self.description.as_deref().map(|d| formatter.fmt_str(d))
    }

    /// A SQL-comment style summary including the executed queries, suitable
    /// for pasting into a query console.
    pub fn logging_message(&self) -> String {
        let formatter = DefaultFormatter;
        let mut message = String::new();
        if let Some(description) = self.formatted_description(&formatter) {
            message.push_str(&format!("/*\n\t{description}\n*/"));
        }
        if let Some(failure) = self.formatted_failure_message(&formatter) {
            message.push_str(&format!("\n\n/*\nFailure message:\n{failure}\n*/"));
        }
        if let Some(queries) = &self.factual_queries {
            message.push_str(&format!("\n\n --Factual queries: \n {}", queries.join("\n")));
        }
        if let Some(queries) = &self.target_queries {
            message.push_str(&format!("\n\n-- Target queries: \n {}", queries.join("\n")));
        }
        message.push_str("\n --- \n");
        message
    }
}

/// Result of comparing a factual against a target value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: bool,
    pub message: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            outcome: true,
            message: None,
        }
    }

    /// A pass with an explanatory note, e.g. for vacuous successes.
    pub fn pass_with(message: impl Into<String>) -> Self {
        Self {
            outcome: true,
            message: Some(message.into()),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            outcome: false,
            message: Some(message.into()),
        }
    }

    /// Passes iff `condition` holds, failing with the lazily built message.
    pub fn check(condition: bool, message: impl FnOnce() -> String) -> Self {
        if condition {
            Self::pass()
        } else {
            Self::fail(message())
        }
    }
}

/// Where the target value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Target<T> {
    /// Retrieved from a second data reference ("between" constraints).
    Reference(DataReference),
    /// Given literally ("within" constraints).
    Value(T),
}

impl<T> Target<T> {
    /// Builds a target from exactly one of a reference or a literal.
    pub fn from_parts(ref2: Option<DataReference>, value: Option<T>) -> Result<Self> {
        match (ref2, value) {
            (Some(_), Some(_)) => Err(JudgeError::configuration(
                "Both ref2 and ref_value are set; exactly one of them is expected.",
            )),
            (None, None) => Err(JudgeError::configuration(
                "Neither ref2 nor ref_value is set; exactly one of them is expected.",
            )),
            (Some(reference), None) => Ok(Self::Reference(reference)),
            (None, Some(value)) => Ok(Self::Value(value)),
        }
    }

    pub fn reference(&self) -> Option<&DataReference> {
        match self {
            Self::Reference(reference) => Some(reference),
            Self::Value(_) => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Reference(_) => None,
            Self::Value(value) => Some(value),
        }
    }
}

/// A retrieved value with the queries that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval<V> {
    pub value: V,
    pub queries: Vec<Query>,
}

impl<V> Retrieval<V> {
    pub fn new(value: V, queries: Vec<Query>) -> Self {
        Self { value, queries }
    }

    /// A value that needed no query.
    pub fn literal(value: V) -> Self {
        Self {
            value,
            queries: Vec::new(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Retrieval<U> {
        Retrieval {
            value: f(self.value),
            queries: self.queries,
        }
    }
}

/// Memoized retrievals keyed by execution context.
///
/// `capacity` bounds the number of contexts remembered; `None` is unbounded
/// and `Some(0)` disables memoization.
pub struct RetrievalCache<V> {
    capacity: Option<usize>,
    entries: Mutex<VecDeque<(ContextId, Retrieval<V>)>>,
}

impl<V> Debug for RetrievalCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalCache")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<V: Clone + Send> RetrievalCache<V> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns the cached retrieval for `id`, running `retrieve` on a miss.
    ///
    /// The lock is held while retrieving so concurrent callers for the same
    /// context never issue the queries twice.
    pub async fn get_or_try_insert<F, Fut>(&self, id: ContextId, retrieve: F) -> Result<Retrieval<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Retrieval<V>>>,
    {
        if self.capacity == Some(0) {
            return retrieve().await;
        }

        let mut entries = self.entries.lock().await;
        if let Some((_, cached)) = entries.iter().find(|(cached_id, _)| *cached_id == id) {
            return Ok(cached.clone());
        }

        let retrieval = retrieve().await?;
        if let Some(capacity) = self.capacity {
            while entries.len() >= capacity {
                entries.pop_front();
            }
        }
        entries.push_back((id, retrieval.clone()));
        Ok(retrieval)
    }
}

/// State shared by every pipeline constraint.
#[derive(Debug)]
pub struct ConstraintCore<F, T> {
    /// Primary reference
    pub reference: DataReference,
    /// Literal target or secondary reference
    pub target: Target<T>,
    /// Overrides the generated description
    pub name: Option<String>,
    factual_cache: RetrievalCache<F>,
    target_cache: RetrievalCache<T>,
}

impl<F: Clone + Send, T: Clone + Send> ConstraintCore<F, T> {
    pub fn new(
        reference: DataReference,
        target: Target<T>,
        name: Option<String>,
        cache_size: Option<usize>,
    ) -> Self {
        Self {
            reference,
            target,
            name,
            factual_cache: RetrievalCache::new(cache_size),
            target_cache: RetrievalCache::new(cache_size),
        }
    }

    /// A constraint with a literal target.
    pub fn within(
        reference: DataReference,
        value: T,
        name: Option<String>,
        cache_size: Option<usize>,
    ) -> Self {
        Self::new(reference, Target::Value(value), name, cache_size)
    }

    /// A constraint comparing two references.
    pub fn between(
        reference: DataReference,
        ref2: DataReference,
        name: Option<String>,
        cache_size: Option<usize>,
    ) -> Self {
        Self::new(reference, Target::Reference(ref2), name, cache_size)
    }

    pub fn ref2(&self) -> Option<&DataReference> {
        self.target.reference()
    }

    /// `"<kind>::<source>"`, or `"<kind>::<source1> | <source2>"` for
    /// between constraints, unless a name was given.
    pub fn description(&self, kind: &str) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let source = self.reference.source.to_string();
        match self.ref2() {
            None => format!("{kind}::{source}"),
            Some(ref2) => {
                let source2 = ref2.source.to_string();
                let (first, second) = uncommon_substrings(&source, &source2);
                format!("{kind}::{first} | {second}")
            }
        }
    }

    /// `"<ref2>'s "` for between constraints, empty otherwise.
    pub fn target_prefix(&self) -> String {
        match self.ref2() {
            Some(ref2) => format!("{ref2}'s "),
            None => String::new(),
        }
    }

    /// Describes the conditions in effect, for failure messages.
    pub fn condition_string(&self) -> String {
        let clause1 = self.reference.condition_clause();
        let Some(ref2) = self.ref2() else {
            return clause1.map_or_else(String::new, |c| format!("Condition: {c}"));
        };
        let clause2 = ref2.condition_clause();
        match (clause1, clause2) {
            (None, None) => String::new(),
            (Some(c1), None) => format!("Condition on first table: {c1}; "),
            (None, Some(c2)) => format!("Condition on second table: {c2}; "),
            (Some(c1), Some(_)) if self.reference.condition == ref2.condition => {
                format!("Condition on both tables: {c1}; ")
            }
            (Some(c1), Some(c2)) => format!(
                "Condition on first table: {c1}. Condition on second table: {c2}. "
            ),
        }
    }

    pub(crate) async fn factual<Fut>(
        &self,
        ctx: &ExecutionContext,
        retrieve: impl FnOnce() -> Fut,
    ) -> Result<Retrieval<F>>
    where
        Fut: Future<Output = Result<Retrieval<F>>>,
    {
        self.factual_cache.get_or_try_insert(ctx.id(), retrieve).await
    }

    pub(crate) async fn target_from<Fut>(
        &self,
        ctx: &ExecutionContext,
        retrieve: impl FnOnce() -> Fut,
    ) -> Result<Retrieval<T>>
    where
        Fut: Future<Output = Result<Retrieval<T>>>,
    {
        self.target_cache.get_or_try_insert(ctx.id(), retrieve).await
    }
}

/// Drops the qualifiers two dotted source names have in common.
///
/// `db.schema.a` and `db.schema.b` become `a` and `b`; `db.s1.a` and
/// `db.s2.b` become `s1.a` and `s2.b`.
pub fn uncommon_substrings(first: &str, second: &str) -> (String, String) {
    let qualifiers1: Vec<&str> = first.split('.').collect();
    let qualifiers2: Vec<&str> = second.split('.').collect();
    if qualifiers1.len() < 2 || qualifiers2.len() < 2 || qualifiers1[0] != qualifiers2[0] {
        return (first.to_string(), second.to_string());
    }
    if qualifiers1[1] != qualifiers2[1] {
        return (qualifiers1[1..].join("."), qualifiers2[1..].join("."));
    }
    (
        qualifiers1[qualifiers1.len() - 1].to_string(),
        qualifiers2[qualifiers2.len() - 1].to_string(),
    )
}

/// Something that can be tested against an execution context.
#[async_trait]
pub trait Constraint: Debug + Send + Sync {
    /// Variant name, e.g. `NRowsMin`.
    fn kind(&self) -> &'static str;

    /// Identifier used in reports, `"<kind>::<source>"` unless renamed.
    fn description(&self) -> String;

    /// Evaluates the constraint.
    ///
    /// Comparison failures are reported through the returned
    /// [`TestResult`]; errors are reserved for retrieval problems and
    /// missing capabilities.
    async fn test(&self, ctx: &ExecutionContext) -> Result<TestResult>;
}

/// A boxed constraint.
pub type BoxedConstraint = Box<dyn Constraint>;

/// Retrieval half of the evaluation pipeline.
#[async_trait]
pub trait Retrieve: Debug + Send + Sync {
    type Factual: Clone + Send + Sync + 'static;
    type Target: Clone + Send + Sync + 'static;

    /// Variant name, e.g. `NRowsMin`.
    fn kind(&self) -> &'static str;

    fn core(&self) -> &ConstraintCore<Self::Factual, Self::Target>;

    /// Retrieves the factual value from `reference`.
    async fn retrieve_factual(
        &self,
        ctx: &ExecutionContext,
        reference: &DataReference,
    ) -> Result<Retrieval<Self::Factual>>;

    /// Retrieves the target value from the secondary reference.
    async fn retrieve_target(
        &self,
        ctx: &ExecutionContext,
        reference: &DataReference,
    ) -> Result<Retrieval<Self::Target>>;
}

/// Comparison half of the evaluation pipeline. Must not perform I/O.
pub trait Compare: Retrieve {
    fn compare(&self, factual: &Self::Factual, target: &Self::Target) -> Result<Verdict>;
}

/// Runs the retrieve/compare pipeline of `constraint` with a custom
/// comparison.
///
/// Retrievals are memoized per execution context. Queries are only rendered
/// for failing results.
#[instrument(skip_all, fields(
    constraint.kind = constraint.kind(),
    context.dialect = %ctx.dialect()
))]
pub async fn run_test<R, C>(constraint: &R, ctx: &ExecutionContext, compare: C) -> Result<TestResult>
where
    R: Retrieve + ?Sized,
    C: FnOnce(&R::Factual, &R::Target) -> Result<Verdict> + Send,
{
    let core = constraint.core();
    let description = core.description(constraint.kind());

    let factual = core
        .factual(ctx, || constraint.retrieve_factual(ctx, &core.reference))
        .await?;
    let target = match &core.target {
        Target::Value(value) => Retrieval::literal(value.clone()),
        Target::Reference(ref2) => {
            core.target_from(ctx, || constraint.retrieve_target(ctx, ref2))
                .await?
        }
    };

    let verdict = compare(&factual.value, &target.value)?;
    crate::log_constraint!(
        ctx.log_config(),
        constraint.description = %description,
        result.outcome = verdict.outcome,
        result.message = ?verdict.message,
        "Compared factual and target values"
    );

    if verdict.outcome {
        debug!(constraint.description = %description, result.outcome = true, "Constraint holds");
        return Ok(TestResult::success().with_description(description));
    }

    let render = |queries: &[Query]| -> Option<Vec<String>> {
        if queries.is_empty() {
            None
        } else {
            Some(queries.iter().map(|q| ctx.compile(q)).collect())
        }
    };
    debug!(constraint.description = %description, result.outcome = false, "Constraint violated");
    Ok(TestResult::failure(
        verdict.message.unwrap_or_default(),
        Some(description),
        render(&factual.queries),
        render(&target.queries),
    ))
}

#[async_trait]
impl<C: Compare> Constraint for C {
    fn kind(&self) -> &'static str {
        Retrieve::kind(self)
    }

    fn description(&self) -> String {
        self.core().description(Retrieve::kind(self))
    }

    async fn test(&self, ctx: &ExecutionContext) -> Result<TestResult> {
        run_test(self, ctx, |factual, target| self.compare(factual, target)).await
    }
}

/// A tolerance derived from the execution context, e.g. from a measured
/// growth rate. Evaluated once per test.
pub type ToleranceGetter =
    Arc<dyn for<'a> Fn(&'a ExecutionContext) -> BoxFuture<'a, Result<f64>> + Send + Sync>;

/// Wraps a closure as a [`ToleranceGetter`].
pub fn tolerance_getter<G>(getter: G) -> ToleranceGetter
where
    G: for<'a> Fn(&'a ExecutionContext) -> BoxFuture<'a, Result<f64>> + Send + Sync + 'static,
{
    Arc::new(getter)
}

/// A getter always returning `value`.
pub fn constant_tolerance(value: f64) -> ToleranceGetter {
    use futures::FutureExt;
    tolerance_getter(move |_ctx| futures::future::ready(Ok(value)).boxed())
}

/// Implements `Debug` for a constraint holding a [`ToleranceGetter`].
macro_rules! debug_with_tolerance {
    ($ty:ident) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("core", &self.core)
                    .finish_non_exhaustive()
            }
        }
    };
}
pub(crate) use debug_with_tolerance;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Condition, DataSource, Dialect};
    use crate::test_helpers::StaticEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reference(table: &str) -> DataReference {
        DataReference::new(DataSource::table("db", Some("public"), table), None, None)
    }

    #[test]
    fn test_target_requires_exactly_one_part() {
        assert!(Target::<i64>::from_parts(Some(reference("a")), Some(1)).is_err());
        assert!(Target::<i64>::from_parts(None, None).is_err());
        assert!(matches!(
            Target::<i64>::from_parts(None, Some(3)),
            Ok(Target::Value(3))
        ));
    }

    #[test]
    fn test_uncommon_substrings() {
        assert_eq!(
            uncommon_substrings("db.public.a", "db.public.b"),
            ("a".to_string(), "b".to_string())
        );
        assert_eq!(
            uncommon_substrings("db.s1.a", "db.s2.b"),
            ("s1.a".to_string(), "s2.b".to_string())
        );
        assert_eq!(
            uncommon_substrings("db1.s.a", "db2.s.a"),
            ("db1.s.a".to_string(), "db2.s.a".to_string())
        );
        assert_eq!(
            uncommon_substrings("orders", "orders_v2"),
            ("orders".to_string(), "orders_v2".to_string())
        );
    }

    #[test]
    fn test_description() {
        let core: ConstraintCore<i64, i64> =
            ConstraintCore::between(reference("a"), reference("b"), None, None);
        assert_eq!(core.description("NRowsEquality"), "NRowsEquality::a | b");

        let core: ConstraintCore<i64, i64> = ConstraintCore::within(reference("a"), 3, None, None);
        assert_eq!(core.description("NRowsMin"), "NRowsMin::db.public.a");

        let core: ConstraintCore<i64, i64> =
            ConstraintCore::within(reference("a"), 3, Some("custom".into()), None);
        assert_eq!(core.description("NRowsMin"), "custom");
    }

    #[test]
    fn test_condition_string() {
        let condition = Condition::raw("x > 1").unwrap();
        let with_condition = DataReference::new(
            DataSource::table("db", None, "a"),
            None,
            Some(condition.clone()),
        );

        let core: ConstraintCore<i64, i64> =
            ConstraintCore::within(with_condition.clone(), 3, None, None);
        assert_eq!(core.condition_string(), "Condition: WHERE x > 1");

        let core: ConstraintCore<i64, i64> =
            ConstraintCore::between(with_condition.clone(), with_condition.clone(), None, None);
        assert_eq!(core.condition_string(), "Condition on both tables: WHERE x > 1; ");

        let core: ConstraintCore<i64, i64> =
            ConstraintCore::between(reference("a"), with_condition, None, None);
        assert_eq!(core.condition_string(), "Condition on second table: WHERE x > 1; ");

        let core: ConstraintCore<i64, i64> =
            ConstraintCore::between(reference("a"), reference("b"), None, None);
        assert_eq!(core.condition_string(), "");
    }

    #[tokio::test]
    async fn test_retrieval_cache_memoizes_per_context() {
        let ctx = ExecutionContext::new(StaticEngine::new(Dialect::DataFusion, vec![]));
        let other = ctx.fresh();
        let cache = RetrievalCache::<i64>::new(None);
        let calls = AtomicUsize::new(0);

        for context in [&ctx, &ctx, &other] {
            let value = cache
                .get_or_try_insert(context.id(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Retrieval::literal(7))
                })
                .await
                .unwrap();
            assert_eq!(value.value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retrieval_cache_disabled_and_bounded() {
        let ctx = ExecutionContext::new(StaticEngine::new(Dialect::DataFusion, vec![]));
        let other = ctx.fresh();
        let calls = AtomicUsize::new(0);
        let retrieve = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Retrieval::literal(1))
        };

        let disabled = RetrievalCache::<i64>::new(Some(0));
        disabled.get_or_try_insert(ctx.id(), retrieve).await.unwrap();
        disabled.get_or_try_insert(ctx.id(), retrieve).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let bounded = RetrievalCache::<i64>::new(Some(1));
        bounded.get_or_try_insert(ctx.id(), retrieve).await.unwrap();
        bounded.get_or_try_insert(other.id(), retrieve).await.unwrap();
        bounded.get_or_try_insert(ctx.id(), retrieve).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_logging_message() {
        let result = TestResult::failure(
            "has [numDiff]3[/numDiff] rows",
            Some("NRowsMin::orders".to_string()),
            Some(vec!["SELECT COUNT(*) FROM orders".to_string()]),
            None,
        );
        let message = result.logging_message();
        assert!(message.starts_with("/*\n\tNRowsMin::orders\n*/"));
        assert!(message.contains("Failure message:\nhas 3 rows"));
        assert!(message.contains("--Factual queries: \n SELECT COUNT(*) FROM orders"));
        assert!(message.ends_with("\n --- \n"));
    }

    #[test]
    fn test_verdict_check() {
        assert_eq!(Verdict::check(true, || "unused".into()), Verdict::pass());
        assert_eq!(
            Verdict::check(false, || "broken".into()),
            Verdict::fail("broken")
        );
    }
}
