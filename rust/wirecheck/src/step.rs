//! A request/response exchange followed by checks on the responses.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use wirecheck_core::{Correlator, Message};

use crate::{ResultType, Test, TestDefinition, TestError, TestResult, run_test};

/// Sends its requests through the correlator, then runs its checks against
/// the collected responses.
///
/// Checks run in order and the first `Fail` ends the check loop, whatever
/// the failing check's own `on_failure`.
pub struct Step {
    definition: TestDefinition,
    correlator: Arc<Correlator>,
    requests: Vec<Message>,
    response_count: Option<usize>,
    timeout: Option<Duration>,
    checks: Vec<Box<dyn Test<[Message]>>>,
}

impl Step {
    pub fn new(definition: TestDefinition, correlator: Arc<Correlator>) -> Self {
        Self {
            definition,
            correlator,
            requests: Vec::new(),
            response_count: None,
            timeout: None,
            checks: Vec::new(),
        }
    }

    pub fn request(mut self, message: Message) -> Self {
        self.requests.push(message);
        self
    }

    pub fn requests(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.requests.extend(messages);
        self
    }

    /// Responses to wait for; defaults to one per request.
    pub fn response_count(mut self, count: usize) -> Self {
        self.response_count = Some(count);
        self
    }

    /// Response deadline; defaults to the correlator's.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn check(mut self, test: impl Test<[Message]> + 'static) -> Self {
        self.checks.push(Box::new(test));
        self
    }

    pub fn checks(mut self, tests: impl IntoIterator<Item = Box<dyn Test<[Message]>>>) -> Self {
        self.checks.extend(tests);
        self
    }

    pub fn outbound(&self) -> &[Message] {
        &self.requests
    }

    pub fn expected_responses(&self) -> usize {
        self.response_count.unwrap_or(self.requests.len())
    }

    /// Run the checks against an already collected response sequence.
    pub async fn verify(&self, responses: &[Message]) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let result = run_test(check.as_ref(), responses).await;
            if result.is_not_applicable() {
                continue;
            }
            let failed = result.result_type == ResultType::Fail;
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("definition", &self.definition)
            .field("requests", &self.requests)
            .field("response_count", &self.expected_responses())
            .field("timeout", &self.timeout)
            .field("checks", &self.checks.len())
            .finish()
    }
}

impl Test for Step {
    fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    fn run<'a>(&'a self, _input: &'a ()) -> BoxFuture<'a, Result<TestResult, TestError>> {
        Box::pin(async move {
            let start = Instant::now();
            let expected = self.expected_responses();
            let responses = self
                .correlator
                .exec(&self.requests, expected, self.timeout)
                .await?;
            tracing::debug!(
                step = %self.definition.name,
                sent = self.requests.len(),
                received = responses.len(),
                expected,
                "step exchange finished"
            );

            let results = self.verify(&responses).await;
            let mut result = TestResult::composite(&self.definition.name, results);
            if responses.len() < expected {
                result = result.with_description(format!(
                    "received {} of {} expected responses",
                    responses.len(),
                    expected
                ));
            }
            Ok(result.with_duration(start.elapsed()))
        })
    }
}
