//! Ordered aggregation of child tests.

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::{OnFailure, ResultType, Test, TestDefinition, TestError, TestResult, run_test};

/// Runs its children in order and folds their results.
///
/// After each child, a `Fail` from a child whose `on_failure` is
/// [`OnFailure::Stop`] ends the run; results produced so far are kept.
/// Errors and panics in children become `Error` results and never end the
/// suite early.
pub struct Suite<I: ?Sized = ()> {
    definition: TestDefinition,
    children: Vec<Box<dyn Test<I>>>,
}

/// A top-level suite of steps.
pub type Scenario = Suite;

impl<I: ?Sized + Sync + 'static> Suite<I> {
    pub fn new(definition: TestDefinition) -> Self {
        Self {
            definition,
            children: Vec::new(),
        }
    }

    pub fn with_children(definition: TestDefinition, children: Vec<Box<dyn Test<I>>>) -> Self {
        Self {
            definition,
            children,
        }
    }

    pub fn child(mut self, test: impl Test<I> + 'static) -> Self {
        self.children.push(Box::new(test));
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl<I: ?Sized + Sync + 'static> std::fmt::Debug for Suite<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let children: Vec<&str> = self
            .children
            .iter()
            .map(|c| c.definition().name.as_str())
            .collect();
        f.debug_struct("Suite")
            .field("definition", &self.definition)
            .field("children", &children)
            .finish()
    }
}

impl<I: ?Sized + Sync + 'static> Test<I> for Suite<I> {
    fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    fn run<'a>(&'a self, input: &'a I) -> BoxFuture<'a, Result<TestResult, TestError>> {
        Box::pin(async move {
            let start = Instant::now();
            let mut results = Vec::with_capacity(self.children.len());

            for child in &self.children {
                let result = run_test(child.as_ref(), input).await;
                let stop = result.result_type == ResultType::Fail
                    && child.definition().on_failure == OnFailure::Stop;
                results.push(result);
                if stop {
                    tracing::debug!(
                        suite = %self.definition.name,
                        child = %child.definition().name,
                        skipped = self.children.len() - results.len(),
                        "stopping suite after failure"
                    );
                    break;
                }
            }

            Ok(TestResult::composite(&self.definition.name, results).with_duration(start.elapsed()))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Assertion;

    fn outcome(name: &str, result: ResultType, on_failure: OnFailure) -> Fixed {
        Fixed {
            definition: TestDefinition::new(name).on_failure(on_failure),
            result,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    struct Fixed {
        definition: TestDefinition,
        result: ResultType,
        runs: Arc<AtomicUsize>,
    }

    impl Test for Fixed {
        fn definition(&self) -> &TestDefinition {
            &self.definition
        }

        fn run<'a>(&'a self, _input: &'a ()) -> BoxFuture<'a, Result<TestResult, TestError>> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                match self.result {
                    ResultType::Error => Err(TestError::invalid_input("bad data")),
                    result => Ok(TestResult::new(&self.definition.name, result)),
                }
            })
        }
    }

    #[tokio::test]
    async fn folds_pass_warning_fail_to_fail() {
        let suite = Suite::new(TestDefinition::new("mixed"))
            .child(outcome("a", ResultType::Pass, OnFailure::Continue))
            .child(outcome("b", ResultType::Warning, OnFailure::Continue))
            .child(outcome("c", ResultType::Fail, OnFailure::Continue));
        let result = run_test(&suite, &()).await;
        assert_eq!(result.result_type, ResultType::Fail);
        assert_eq!(result.children().len(), 3);
    }

    #[tokio::test]
    async fn folds_pass_warning_to_warning() {
        let suite = Suite::new(TestDefinition::new("soft"))
            .child(outcome("a", ResultType::Pass, OnFailure::Stop))
            .child(outcome("b", ResultType::Warning, OnFailure::Stop));
        let result = run_test(&suite, &()).await;
        assert_eq!(result.result_type, ResultType::Warning);
    }

    #[tokio::test]
    async fn stop_skips_remaining_children() {
        let second = outcome("second", ResultType::Pass, OnFailure::Stop);
        let runs = second.runs.clone();
        let suite = Suite::new(TestDefinition::new("stops"))
            .child(outcome("first", ResultType::Fail, OnFailure::Stop))
            .child(second);

        let result = run_test(&suite, &()).await;
        assert_eq!(result.result_type, ResultType::Fail);
        assert_eq!(result.children().len(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn continue_runs_remaining_children() {
        let second = outcome("second", ResultType::Pass, OnFailure::Stop);
        let runs = second.runs.clone();
        let suite = Suite::new(TestDefinition::new("continues"))
            .child(outcome("first", ResultType::Fail, OnFailure::Continue))
            .child(second);

        let result = run_test(&suite, &()).await;
        assert_eq!(result.result_type, ResultType::Fail);
        assert_eq!(result.children().len(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_do_not_stop_the_suite() {
        let suite = Suite::new(TestDefinition::new("errors"))
            .child(outcome("broken", ResultType::Error, OnFailure::Stop))
            .child(outcome("after", ResultType::Pass, OnFailure::Stop));
        let result = run_test(&suite, &()).await;
        assert_eq!(result.result_type, ResultType::Error);
        assert_eq!(result.children().len(), 2);
        assert_eq!(result.children()[0].description.as_deref(), Some("bad data"));
    }

    #[tokio::test]
    async fn not_applicable_children_are_not_counted() {
        let skipped = Assertion::new(TestDefinition::new("skipped"), |_: &()| false)
            .when(|_: &()| false);
        let suite = Suite::new(TestDefinition::new("nothing applies")).child(skipped);

        let result = run_test(&suite, &()).await;
        assert_eq!(result.result_type, ResultType::Pass);
        assert!(result.children().is_empty());
    }

    #[tokio::test]
    async fn reruns_produce_fresh_results() {
        let suite = Suite::new(TestDefinition::new("again"))
            .child(outcome("a", ResultType::Pass, OnFailure::Stop));
        let first = run_test(&suite, &()).await;
        let second = run_test(&suite, &()).await;
        assert_eq!(first.result_type, second.result_type);
        assert_eq!(first.children().len(), second.children().len());
    }

    #[tokio::test]
    async fn nested_suites_fold_upwards() {
        let inner = Suite::new(TestDefinition::new("inner").on_failure(OnFailure::Continue))
            .child(outcome("deep", ResultType::Fail, OnFailure::Continue));
        let outer = Suite::new(TestDefinition::new("outer"))
            .child(inner)
            .child(outcome("sibling", ResultType::Pass, OnFailure::Stop));

        let result = run_test(&outer, &()).await;
        assert_eq!(result.result_type, ResultType::Fail);
        assert_eq!(result.children().len(), 2);
        assert_eq!(result.children()[0].children()[0].name, "deep");
    }

    #[tokio::test]
    async fn panicking_child_keeps_sibling_results() {
        let ok = Assertion::new(
            TestDefinition::new("ok").on_failure(OnFailure::Continue),
            |_: &()| true,
        );
        let explodes = Assertion::new(
            TestDefinition::new("explodes").on_failure(OnFailure::Continue),
            |_: &()| -> bool { panic!("predicate boom") },
        );
        let suite = Suite::new(TestDefinition::new("contained"))
            .child(ok)
            .child(explodes);

        let result = run_test(&suite, &()).await;
        assert_eq!(result.result_type, ResultType::Error);
        let outcomes: Vec<_> = result.children().iter().map(|c| c.result_type).collect();
        assert_eq!(outcomes, [ResultType::Pass, ResultType::Error]);
        assert!(
            result.children()[1]
                .description
                .as_deref()
                .is_some_and(|d| d.contains("predicate boom"))
        );
    }
}
