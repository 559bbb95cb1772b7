//! Declarative expectations over JSON data.
//!
//! An [`Expects`] test evaluates a list of [`Expectation`]s, each a matcher
//! applied to the value at a JSON Pointer inside the input. The matcher set
//! is closed: definitions are parsed into [`Matcher`] once, at build time,
//! and nothing in a definition is ever executed as code.
//!
//! ```json
//! { "path": "/0/payload/content", "expect": "toBe", "value": "HELLO WORLD!" }
//! { "path": "", "expect": "toHaveLength", "value": 1 }
//! { "path": "/0", "expect": "toHaveProperty", "key": "channel", "not": true }
//! ```
//!
//! Values follow JavaScript semantics where the matcher names come from:
//! truthiness, string conversion in failure messages, and "undefined" for a
//! path that does not resolve.

use std::fmt::Write as _;

use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wirecheck_core::Message;

use crate::{ExpectsError, Test, TestDefinition, TestError, TestResult};

/// Serialized form of an expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectationDef {
    /// JSON Pointer into the data; empty for the whole value.
    #[serde(default)]
    pub path: String,
    /// Matcher name, e.g. `toBe` or `toHaveLength`.
    pub expect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Property name for `toHaveProperty`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub not: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// A compiled matcher and its argument.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Strict equality: equal scalars only, never objects or arrays.
    ToBe(Value),
    /// Deep equality.
    ToEqual(Value),
    /// The array contains an element strictly equal to the argument.
    ToContain(Value),
    /// The value's string form contains the argument.
    ToContainString(String),
    /// Array element count, string character count or object key count.
    ToHaveLength(usize),
    ToBeGreaterThan(f64),
    ToBeLessThan(f64),
    /// The value is a string matching the regex.
    ToMatch(Regex),
    ToBeTruthy,
    ToBeFalsy,
    ToBeNull,
    /// The path does not resolve.
    ToBeUndefined,
    /// The value is an object with `key`, optionally equal to `value`.
    ToHaveProperty { key: String, value: Option<Value> },
}

impl Matcher {
    fn parse(def: &ExpectationDef) -> Result<Self, ExpectsError> {
        let expect = def.expect.as_str();
        let invalid = |reason: &str| ExpectsError::InvalidArgument {
            expect: expect.to_string(),
            reason: reason.to_string(),
        };
        let value = || def.value.clone().ok_or_else(|| invalid("needs a value"));
        let number = || {
            def.value
                .as_ref()
                .and_then(Value::as_f64)
                .ok_or_else(|| invalid("needs a numeric value"))
        };
        let string = || {
            def.value
                .as_ref()
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| invalid("needs a string value"))
        };

        Ok(match expect {
            "toBe" => Matcher::ToBe(value()?),
            "toEqual" => Matcher::ToEqual(value()?),
            "toContain" => Matcher::ToContain(value()?),
            "toContainString" => Matcher::ToContainString(string()?),
            "toHaveLength" => {
                let len = def
                    .value
                    .as_ref()
                    .and_then(Value::as_u64)
                    .ok_or_else(|| invalid("needs a non-negative integer value"))?;
                Matcher::ToHaveLength(len as usize)
            }
            "toBeGreaterThan" => Matcher::ToBeGreaterThan(number()?),
            "toBeLessThan" => Matcher::ToBeLessThan(number()?),
            "toMatch" => Matcher::ToMatch(Regex::new(&string()?)?),
            "toBeTruthy" => Matcher::ToBeTruthy,
            "toBeFalsy" => Matcher::ToBeFalsy,
            "toBeNull" => Matcher::ToBeNull,
            "toBeUndefined" => Matcher::ToBeUndefined,
            "toHaveProperty" => Matcher::ToHaveProperty {
                key: def.key.clone().ok_or_else(|| invalid("needs a key"))?,
                value: def.value.clone(),
            },
            other => return Err(ExpectsError::Unknown(other.to_string())),
        })
    }

    /// Default failure wording; a trailing `.` means no argument is shown.
    fn failure_message(&self) -> &'static str {
        match self {
            Matcher::ToBe(_) => "be strictly equal to",
            Matcher::ToEqual(_) => "be deeply equal to",
            Matcher::ToContain(_) => "contain array element",
            Matcher::ToContainString(_) => "contain string",
            Matcher::ToHaveLength(_) => "have specified length of",
            Matcher::ToBeGreaterThan(_) => "be greater than",
            Matcher::ToBeLessThan(_) => "be less than",
            Matcher::ToMatch(_) => "match regex",
            Matcher::ToBeTruthy => "be truthy.",
            Matcher::ToBeFalsy => "be falsy.",
            Matcher::ToBeNull => "be null.",
            Matcher::ToBeUndefined => "be undefined.",
            Matcher::ToHaveProperty { .. } => "have property (and value, if specified):",
        }
    }

    fn argument(&self) -> String {
        match self {
            Matcher::ToBe(v) | Matcher::ToEqual(v) | Matcher::ToContain(v) => js_string(Some(v)),
            Matcher::ToContainString(s) => s.clone(),
            Matcher::ToHaveLength(n) => n.to_string(),
            Matcher::ToBeGreaterThan(n) | Matcher::ToBeLessThan(n) => n.to_string(),
            Matcher::ToMatch(re) => re.as_str().to_string(),
            Matcher::ToHaveProperty { key, value: None } => key.clone(),
            Matcher::ToHaveProperty {
                key,
                value: Some(v),
            } => format!("{key}={}", js_string(Some(v))),
            Matcher::ToBeTruthy | Matcher::ToBeFalsy | Matcher::ToBeNull | Matcher::ToBeUndefined => {
                String::new()
            }
        }
    }

    /// Apply the matcher; `None` is a path that did not resolve.
    pub fn test(&self, actual: Option<&Value>) -> bool {
        match self {
            Matcher::ToBeUndefined => actual.is_none(),
            Matcher::ToBeFalsy => !actual.is_some_and(is_truthy),
            Matcher::ToContainString(needle) => js_string(actual).contains(needle.as_str()),
            _ => actual.is_some_and(|value| self.test_defined(value)),
        }
    }

    fn test_defined(&self, value: &Value) -> bool {
        match self {
            Matcher::ToBe(expected) => strict_eq(value, expected),
            Matcher::ToEqual(expected) => value == expected,
            Matcher::ToContain(item) => value
                .as_array()
                .is_some_and(|items| items.iter().any(|v| strict_eq(v, item))),
            Matcher::ToHaveLength(len) => match value {
                Value::Array(items) => items.len() == *len,
                Value::String(s) => s.chars().count() == *len,
                Value::Object(map) => map.len() == *len,
                _ => false,
            },
            Matcher::ToBeGreaterThan(n) => value.as_f64().is_some_and(|v| v > *n),
            Matcher::ToBeLessThan(n) => value.as_f64().is_some_and(|v| v < *n),
            Matcher::ToMatch(re) => value.as_str().is_some_and(|s| re.is_match(s)),
            Matcher::ToBeTruthy => is_truthy(value),
            Matcher::ToBeNull => value.is_null(),
            Matcher::ToHaveProperty { key, value: wanted } => {
                value.as_object().and_then(|map| map.get(key)).is_some_and(|found| {
                    wanted.as_ref().is_none_or(|wanted| strict_eq(found, wanted))
                })
            }
            Matcher::ToBeFalsy | Matcher::ToBeUndefined | Matcher::ToContainString(_) => {
                self.test(Some(value))
            }
        }
    }
}

/// One compiled expectation.
#[derive(Debug, Clone)]
pub struct Expectation {
    pub path: String,
    pub matcher: Matcher,
    pub not: bool,
    pub failure_message: Option<String>,
}

impl Expectation {
    pub fn new(path: impl Into<String>, matcher: Matcher) -> Self {
        Self {
            path: path.into(),
            matcher,
            not: false,
            failure_message: None,
        }
    }

    pub fn negate(mut self) -> Self {
        self.not = !self.not;
        self
    }

    pub fn from_def(def: &ExpectationDef) -> Result<Self, ExpectsError> {
        if !def.path.is_empty() && !def.path.starts_with('/') {
            return Err(ExpectsError::InvalidPath(def.path.clone()));
        }
        Ok(Self {
            path: def.path.clone(),
            matcher: Matcher::parse(def)?,
            not: def.not,
            failure_message: def.failure_message.clone(),
        })
    }

    /// `None` when the expectation holds, otherwise the failure description.
    pub fn check(&self, data: &Value) -> Option<String> {
        let actual = data.pointer(&self.path);
        if self.matcher.test(actual) != self.not {
            return None;
        }
        Some(self.describe(actual))
    }

    fn describe(&self, actual: Option<&Value>) -> String {
        let mut description = format!("Expected value \"{}\" to ", js_string(actual));
        if self.not {
            description.push_str("not ");
        }
        let failure = self
            .failure_message
            .as_deref()
            .unwrap_or_else(|| self.matcher.failure_message());
        description.push_str(failure);
        if !failure.ends_with('.') {
            let _ = write!(description, " \"{}\"", self.matcher.argument());
        }
        description
    }
}

/// Runs every expectation and fails with one line per unmet expectation.
#[derive(Debug, Clone)]
pub struct Expects {
    definition: TestDefinition,
    expectations: Vec<Expectation>,
    data: Option<Value>,
}

impl Expects {
    pub fn new(definition: TestDefinition, expectations: Vec<Expectation>) -> Self {
        Self {
            definition,
            expectations,
            data: None,
        }
    }

    pub fn from_defs(
        definition: TestDefinition,
        defs: &[ExpectationDef],
    ) -> Result<Self, ExpectsError> {
        let expectations = defs
            .iter()
            .map(Expectation::from_def)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(definition, expectations))
    }

    /// Static data used when the test runs without input.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    fn evaluate(&self, data: &Value) -> TestResult {
        let failures: Vec<String> = self
            .expectations
            .iter()
            .filter_map(|e| e.check(data))
            .collect();
        let name = &self.definition.name;
        if failures.is_empty() {
            TestResult::pass(name)
        } else {
            TestResult::fail(name, failures.join("\n"))
        }
    }
}

impl Test<Value> for Expects {
    fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    fn run<'a>(&'a self, data: &'a Value) -> BoxFuture<'a, Result<TestResult, TestError>> {
        Box::pin(async move { Ok(self.evaluate(data)) })
    }
}

impl Test<[Message]> for Expects {
    fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    fn run<'a>(&'a self, responses: &'a [Message]) -> BoxFuture<'a, Result<TestResult, TestError>> {
        Box::pin(async move {
            let data = serde_json::to_value(responses).map_err(|e| {
                TestError::invalid_input(format!("responses are not representable as JSON: {e}"))
            })?;
            Ok(self.evaluate(&data))
        })
    }
}

impl Test for Expects {
    fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    fn run<'a>(&'a self, _input: &'a ()) -> BoxFuture<'a, Result<TestResult, TestError>> {
        Box::pin(async move {
            let Some(data) = &self.data else {
                return Err(TestError::invalid_input("No data for expects test"));
            };
            Ok(self.evaluate(data))
        })
    }
}

/// JavaScript truthiness of a JSON value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `===` on JSON: numbers by value, other scalars by equality, containers never.
fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        _ => a == b,
    }
}

/// JavaScript `String(value)` of a JSON value; `None` is `undefined`.
fn js_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Object(_)) => "[object Object]".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{ResultType, run_test};

    fn def(path: &str, expect: &str, value: Option<Value>) -> ExpectationDef {
        ExpectationDef {
            path: path.to_string(),
            expect: expect.to_string(),
            value,
            key: None,
            not: false,
            failure_message: None,
        }
    }

    fn check(expect: &str, value: Option<Value>, data: Value) -> Option<String> {
        Expectation::from_def(&def("", expect, value))
            .unwrap()
            .check(&data)
    }

    #[test]
    fn to_be_is_strict() {
        assert_eq!(check("toBe", Some(json!(42)), json!(42)), None);
        assert_eq!(check("toBe", Some(json!(42.0)), json!(42)), None);
        assert!(check("toBe", Some(json!("42")), json!(42)).is_some());
        assert!(check("toBe", Some(json!({"a": 1})), json!({"a": 1})).is_some());
    }

    #[test]
    fn to_equal_is_deep() {
        assert_eq!(check("toEqual", Some(json!({"a": [1]})), json!({"a": [1]})), None);
        assert!(check("toEqual", Some(json!({"a": [2]})), json!({"a": [1]})).is_some());
    }

    #[test]
    fn containment() {
        assert_eq!(check("toContain", Some(json!(2)), json!([1, 2, 3])), None);
        assert!(check("toContain", Some(json!(4)), json!([1, 2, 3])).is_some());
        assert!(check("toContain", Some(json!(2)), json!("2")).is_some());
        assert_eq!(
            check("toContainString", Some(json!("world")), json!("hello world")),
            None
        );
        assert_eq!(check("toContainString", Some(json!("4")), json!(42)), None);
    }

    #[test]
    fn lengths_and_numbers() {
        assert_eq!(check("toHaveLength", Some(json!(2)), json!([1, 2])), None);
        assert_eq!(check("toHaveLength", Some(json!(5)), json!("héllo")), None);
        assert!(check("toHaveLength", Some(json!(1)), json!(7)).is_some());
        assert_eq!(check("toBeGreaterThan", Some(json!(10)), json!(11)), None);
        assert!(check("toBeGreaterThan", Some(json!(10)), json!(10)).is_some());
        assert_eq!(check("toBeLessThan", Some(json!(0.5)), json!(0.25)), None);
    }

    #[test]
    fn regex_and_truthiness() {
        assert_eq!(check("toMatch", Some(json!("^HEL+O")), json!("HELLO")), None);
        assert!(check("toMatch", Some(json!("^x")), json!(1)).is_some());
        assert_eq!(check("toBeTruthy", None, json!("x")), None);
        assert_eq!(check("toBeFalsy", None, json!(0)), None);
        assert_eq!(check("toBeFalsy", None, json!("")), None);
        assert!(check("toBeTruthy", None, json!([])).is_none());
        assert_eq!(check("toBeNull", None, json!(null)), None);
    }

    #[test]
    fn undefined_paths() {
        let undefined = Expectation::from_def(&def("/missing", "toBeUndefined", None)).unwrap();
        assert_eq!(undefined.check(&json!({"present": 1})), None);
        let falsy = Expectation::from_def(&def("/missing", "toBeFalsy", None)).unwrap();
        assert_eq!(falsy.check(&json!({})), None);
        let defined = Expectation::from_def(&def("/present", "toBeUndefined", None)).unwrap();
        assert!(defined.check(&json!({"present": 1})).is_some());
    }

    #[test]
    fn has_property_with_optional_value() {
        let mut has_key = def("", "toHaveProperty", None);
        has_key.key = Some("channel".into());
        let has_key = Expectation::from_def(&has_key).unwrap();
        assert_eq!(has_key.check(&json!({"channel": "EM1"})), None);
        assert!(has_key.check(&json!({"other": 1})).is_some());
        assert!(has_key.check(&json!(["channel"])).is_some());

        let mut with_value = def("", "toHaveProperty", Some(json!("EM1")));
        with_value.key = Some("channel".into());
        let with_value = Expectation::from_def(&with_value).unwrap();
        assert_eq!(with_value.check(&json!({"channel": "EM1"})), None);
        assert!(with_value.check(&json!({"channel": "EM2"})).is_some());
    }

    #[test]
    fn negation_inverts() {
        let mut not_42 = def("", "toBe", Some(json!(42)));
        not_42.not = true;
        let not_42 = Expectation::from_def(&not_42).unwrap();
        assert_eq!(not_42.check(&json!(41)), None);
        assert_eq!(
            not_42.check(&json!(42)).as_deref(),
            Some("Expected value \"42\" to not be strictly equal to \"42\"")
        );
    }

    #[test]
    fn descriptions_follow_the_message_format() {
        assert_eq!(
            check("toBeGreaterThan", Some(json!(100)), json!(42)).as_deref(),
            Some("Expected value \"42\" to be greater than \"100\"")
        );
        assert_eq!(
            check("toBeTruthy", None, json!(null)).as_deref(),
            Some("Expected value \"null\" to be truthy.")
        );
        assert_eq!(
            check("toContain", Some(json!(2)), json!([1, 3])).as_deref(),
            Some("Expected value \"1,3\" to contain array element \"2\"")
        );

        let mut custom = def("", "toBe", Some(json!("yes")));
        custom.failure_message = Some("say".into());
        let custom = Expectation::from_def(&custom).unwrap();
        assert_eq!(
            custom.check(&json!("no")).as_deref(),
            Some("Expected value \"no\" to say \"yes\"")
        );
    }

    #[test]
    fn bad_definitions_are_rejected() {
        assert!(matches!(
            Expectation::from_def(&def("", "toAssert", Some(json!("data > 1")))),
            Err(ExpectsError::Unknown(_))
        ));
        assert!(matches!(
            Expectation::from_def(&def("", "toMatch", Some(json!("(")))),
            Err(ExpectsError::InvalidRegex(_))
        ));
        assert!(matches!(
            Expectation::from_def(&def("", "toBeGreaterThan", Some(json!("ten")))),
            Err(ExpectsError::InvalidArgument { .. })
        ));
        assert!(matches!(
            Expectation::from_def(&def("0/payload", "toBeNull", None)),
            Err(ExpectsError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn collects_every_failure() {
        let test = Expects::from_defs(
            TestDefinition::new("demo"),
            &[
                def("", "toBe", Some(json!(42))),
                def("", "toBeGreaterThan", Some(json!(100))),
                def("", "toBeLessThan", Some(json!(50))),
                def("", "toContain", Some(json!(2))),
            ],
        )
        .unwrap();

        let result = run_test(&test, &json!(42)).await;
        assert_eq!(result.result_type, ResultType::Fail);
        assert_eq!(result.description.unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn runs_against_responses() {
        let test = Expects::from_defs(
            TestDefinition::new("reply content"),
            &[
                def("", "toHaveLength", Some(json!(1))),
                def("/0/payload/content", "toBe", Some(json!("HELLO WORLD!"))),
                def("/0/channel", "toBe", Some(json!("EM1"))),
            ],
        )
        .unwrap();
        let responses = [Message::with_content("EM1", "HELLO WORLD!")];
        let result = run_test(&test, &responses[..]).await;
        assert_eq!(result.result_type, ResultType::Pass, "{:?}", result.description);
    }

    #[tokio::test]
    async fn static_data_or_error_without_input() {
        let defs = [def("/status", "toBe", Some(json!("ok")))];
        let with_data = Expects::from_defs(TestDefinition::new("static"), &defs)
            .unwrap()
            .with_data(json!({"status": "ok"}));
        assert_eq!(run_test(&with_data, &()).await.result_type, ResultType::Pass);

        let without = Expects::from_defs(TestDefinition::new("nothing"), &defs).unwrap();
        let result = run_test(&without, &()).await;
        assert_eq!(result.result_type, ResultType::Error);
        assert_eq!(result.description.as_deref(), Some("No data for expects test"));
    }
}
