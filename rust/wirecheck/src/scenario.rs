//! JSON scenario documents and the test trees built from them.
//!
//! ```json
//! { "scenarios": [
//!   { "name": "Uppercase", "onFailure": "stop", "children": [
//!     { "type": "step", "name": "Hello", "requests": [], "checks": [
//!       { "type": "message", "name": "uppercased",
//!         "request":  { "channel": "EM1", "payload": { "content": "Hello world!" } },
//!         "expected": { "channel": "EM1", "payload": { "content": "HELLO WORLD!" } } }
//!     ] }
//!   ] }
//! ] }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wirecheck_core::{Correlator, Message};

use crate::{
    Expects, ExpectationDef, MatchStrategy, MessageExpectation, OnFailure, ScenarioError, Step,
    Suite, Test, TestDefinition,
};

/// Name of the suite wrapping every scenario of a set.
pub const ROOT_SUITE_NAME: &str = "Scenarios";

/// A document of scenarios.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSet {
    pub scenarios: Vec<SuiteDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteDef {
    #[serde(flatten)]
    pub definition: TestDefinition,
    #[serde(default)]
    pub children: Vec<NodeDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeDef {
    Suite(SuiteDef),
    Step(StepDef),
    /// Expectations over the node's own `data`, outside any step.
    Expects(ExpectsCheckDef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
    #[serde(flatten)]
    pub definition: TestDefinition,
    #[serde(default)]
    pub requests: Vec<Message>,
    /// Defaults to the number of outbound messages, check requests included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub checks: Vec<CheckDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckDef {
    Message(MessageCheckDef),
    Expects(ExpectsCheckDef),
}

/// A request and the reply expected for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCheckDef {
    #[serde(flatten)]
    pub definition: TestDefinition,
    /// Appended to the step's outbound batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Message>,
    #[serde(default)]
    pub strategy: MatchStrategy,
}

/// Expectations over a value.
///
/// As a step check the value is the step's responses and `data` must be
/// absent; as a suite child the value is `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectsCheckDef {
    #[serde(flatten)]
    pub definition: TestDefinition,
    pub expectations: Vec<ExpectationDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CheckDef {
    fn definition(&self) -> &TestDefinition {
        match self {
            CheckDef::Message(check) => &check.definition,
            CheckDef::Expects(check) => &check.definition,
        }
    }
}

impl NodeDef {
    pub fn definition(&self) -> &TestDefinition {
        match self {
            NodeDef::Suite(suite) => &suite.definition,
            NodeDef::Step(step) => &step.definition,
            NodeDef::Expects(expects) => &expects.definition,
        }
    }
}

impl ScenarioSet {
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Build the root suite; each scenario is one child.
    pub fn build(&self, correlator: &Arc<Correlator>) -> Result<Suite, ScenarioError> {
        let definition = TestDefinition::new(ROOT_SUITE_NAME).on_failure(OnFailure::Stop);
        let children = self
            .scenarios
            .iter()
            .map(|scenario| Ok(Box::new(scenario.build(correlator)?) as Box<dyn Test>))
            .collect::<Result<Vec<_>, ScenarioError>>()?;
        Ok(Suite::with_children(definition, children))
    }

    /// One line per node, indented by depth: `<kind> <name>`.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for scenario in &self.scenarios {
            scenario.outline(&mut out, 0);
        }
        out
    }
}

impl SuiteDef {
    pub fn build(&self, correlator: &Arc<Correlator>) -> Result<Suite, ScenarioError> {
        let children = self
            .children
            .iter()
            .map(|node| {
                let child: Box<dyn Test> = match node {
                    NodeDef::Suite(suite) => Box::new(suite.build(correlator)?),
                    NodeDef::Step(step) => Box::new(step.build(correlator)?),
                    NodeDef::Expects(expects) => Box::new(expects.build()?),
                };
                Ok(child)
            })
            .collect::<Result<Vec<_>, ScenarioError>>()?;
        Ok(Suite::with_children(self.definition.clone(), children))
    }

    fn outline(&self, out: &mut String, depth: usize) {
        push_line(out, depth, "suite", &self.definition.name);
        for child in &self.children {
            match child {
                NodeDef::Suite(suite) => suite.outline(out, depth + 1),
                NodeDef::Step(step) => {
                    push_line(out, depth + 1, "step", &step.definition.name);
                    for check in &step.checks {
                        let kind = match check {
                            CheckDef::Message(_) => "message",
                            CheckDef::Expects(_) => "expects",
                        };
                        push_line(out, depth + 2, kind, &check.definition().name);
                    }
                }
                NodeDef::Expects(expects) => {
                    push_line(out, depth + 1, "expects", &expects.definition.name);
                }
            }
        }
    }
}

fn push_line(out: &mut String, depth: usize, kind: &str, name: &str) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(kind);
    out.push(' ');
    out.push_str(name);
    out.push('\n');
}

impl StepDef {
    /// Outbound batch: the step's requests, then each message check's request.
    pub fn outbound(&self) -> Vec<Message> {
        let from_checks = self.checks.iter().filter_map(|check| match check {
            CheckDef::Message(check) => check.request.clone(),
            CheckDef::Expects(_) => None,
        });
        self.requests.iter().cloned().chain(from_checks).collect()
    }

    pub fn build(&self, correlator: &Arc<Correlator>) -> Result<Step, ScenarioError> {
        let outbound = self.outbound();
        if let Some(unknown) = outbound.iter().find(|m| !correlator.has_sender(&m.channel)) {
            return Err(ScenarioError::UnknownChannel {
                step: self.definition.name.clone(),
                channel: unknown.channel.clone(),
            });
        }

        let mut step = Step::new(self.definition.clone(), correlator.clone()).requests(outbound);
        if let Some(count) = self.response_count {
            step = step.response_count(count);
        }
        if let Some(ms) = self.timeout_ms {
            step = step.timeout(Duration::from_millis(ms));
        }
        for check in &self.checks {
            step = match check {
                CheckDef::Message(check) => step.check(
                    MessageExpectation::new(check.definition.clone(), check.expected.clone())
                        .with_strategy(check.strategy),
                ),
                CheckDef::Expects(check) => {
                    if check.data.is_some() {
                        return Err(ScenarioError::DataOnStepCheck {
                            test: check.definition.name.clone(),
                        });
                    }
                    step.check(check.build()?)
                }
            };
        }
        Ok(step)
    }
}

impl ExpectsCheckDef {
    pub fn build(&self) -> Result<Expects, ScenarioError> {
        let expects = Expects::from_defs(self.definition.clone(), &self.expectations).map_err(
            |source| ScenarioError::Expects {
                test: self.definition.name.clone(),
                source,
            },
        )?;
        Ok(match &self.data {
            Some(data) => expects.with_data(data.clone()),
            None => expects,
        })
    }
}
