//! Checks that an expected message is among a step's responses.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wirecheck_core::Message;

use crate::{Test, TestDefinition, TestError, TestResult};

/// How a response is matched against the expected message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStrategy {
    /// Every field set on the expected message must be present and equal in
    /// the response; extra response fields are ignored.
    #[default]
    Structural,
    /// The response carries the expected correlation id.
    CorrelationId,
}

/// Passes when the first matching response is found.
#[derive(Debug, Clone)]
pub struct MessageExpectation {
    definition: TestDefinition,
    expected: Option<Message>,
    strategy: MatchStrategy,
}

impl MessageExpectation {
    pub fn new(definition: TestDefinition, expected: Option<Message>) -> Self {
        Self {
            definition,
            expected,
            strategy: MatchStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn expected(&self) -> Option<&Message> {
        self.expected.as_ref()
    }
}

impl Test<[Message]> for MessageExpectation {
    fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    fn run<'a>(&'a self, responses: &'a [Message]) -> BoxFuture<'a, Result<TestResult, TestError>> {
        Box::pin(async move {
            let Some(expected) = &self.expected else {
                return Err(TestError::invalid_input("no expected response configured"));
            };
            let found = match self.strategy {
                MatchStrategy::Structural => find_by_value(expected, responses),
                MatchStrategy::CorrelationId => {
                    let Some(id) = expected.correlation_id.as_deref() else {
                        return Err(TestError::invalid_input(
                            "correlation id matching needs an expected correlation id",
                        ));
                    };
                    find_by_correlation(id, responses)
                }
            };
            let name = &self.definition.name;
            Ok(match found {
                Some(index) => {
                    tracing::trace!(test = %name, index, "expected response found");
                    TestResult::pass(name)
                }
                None => TestResult::fail(name, "Expected response not received."),
            })
        })
    }
}

/// Index of the first response carrying correlation id `id`.
pub fn find_by_correlation(id: &str, responses: &[Message]) -> Option<usize> {
    responses
        .iter()
        .position(|m| m.correlation_id.as_deref() == Some(id))
}

/// Index of the first response that structurally contains `expected`.
pub fn find_by_value(expected: &Message, responses: &[Message]) -> Option<usize> {
    responses.iter().position(|m| matches(expected, m))
}

/// Whether `actual` carries every field set on `expected`.
///
/// An empty expected channel matches any channel.
pub fn matches(expected: &Message, actual: &Message) -> bool {
    (expected.channel.is_empty() || expected.channel == actual.channel)
        && expected
            .correlation_id
            .as_ref()
            .is_none_or(|id| actual.correlation_id.as_ref() == Some(id))
        && is_subset(&expected.metadata, &actual.metadata)
        && is_subset(&expected.payload, &actual.payload)
}

/// Every key of `expected` is present in `actual` with an equal value.
pub fn is_subset(expected: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
    expected
        .iter()
        .all(|(key, value)| actual.get(key) == Some(value))
}
