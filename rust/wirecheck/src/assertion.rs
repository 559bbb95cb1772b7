//! Predicate tests over typed data.

use futures::future::BoxFuture;

use crate::{Test, TestDefinition, TestError, TestResult};

type Predicate<I> = Box<dyn Fn(&I) -> bool + Send + Sync>;

/// Passes when its predicate holds for the input.
///
/// An optional precondition (`when`) makes the assertion not applicable,
/// rather than failing, for data it does not concern.
pub struct Assertion<I: ?Sized> {
    definition: TestDefinition,
    predicate: Predicate<I>,
    precondition: Option<Predicate<I>>,
    failure: Option<String>,
}

impl<I: ?Sized> Assertion<I> {
    pub fn new<F>(definition: TestDefinition, predicate: F) -> Self
    where
        F: Fn(&I) -> bool + Send + Sync + 'static,
    {
        Self {
            definition,
            predicate: Box::new(predicate),
            precondition: None,
            failure: None,
        }
    }

    /// Only evaluate the predicate for inputs matching `precondition`.
    pub fn when<F>(mut self, precondition: F) -> Self
    where
        F: Fn(&I) -> bool + Send + Sync + 'static,
    {
        self.precondition = Some(Box::new(precondition));
        self
    }

    /// Description used when the predicate does not hold.
    pub fn failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

impl<I: ?Sized + Sync> Test<I> for Assertion<I> {
    fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    fn run<'a>(&'a self, input: &'a I) -> BoxFuture<'a, Result<TestResult, TestError>> {
        Box::pin(async move {
            let name = &self.definition.name;
            Ok(
                if self.precondition.as_ref().is_some_and(|applies| !applies(input)) {
                    TestResult::not_applicable(name)
                } else if (self.predicate)(input) {
                    TestResult::pass(name)
                } else {
                    TestResult::fail(name, self.failure.as_deref().unwrap_or("Assertion failed"))
                },
            )
        })
    }
}
