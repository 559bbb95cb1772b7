//! Errors raised while running, building or configuring tests.

use std::io;
use std::path::PathBuf;

use wirecheck_core::{CorrelatorError, TransportError};

use crate::ResultType;

/// A test that could not complete.
///
/// Returned from [`Test::run`](crate::Test::run) and turned into an `Error`
/// (or `Fatal`) result by [`run_test`](crate::run_test); it never escapes a
/// suite.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error(transparent)]
    Correlator(#[from] CorrelatorError),
    /// The test's own input or configuration is unusable.
    #[error("{0}")]
    InvalidInput(String),
    #[error("test panicked: {0}")]
    Panicked(String),
}

impl TestError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Severity of the result this error turns into.
    pub fn result_type(&self) -> ResultType {
        match self {
            // The correlator is not reentrant; a second window means the
            // framework itself was driven incorrectly.
            TestError::Correlator(CorrelatorError::AlreadyWaiting) => ResultType::Fatal,
            _ => ResultType::Error,
        }
    }
}

/// Invalid expectation definitions.
#[derive(Debug, thiserror::Error)]
pub enum ExpectsError {
    #[error("unknown expectation \"{0}\"")]
    Unknown(String),
    #[error("expectation \"{expect}\" {reason}")]
    InvalidArgument { expect: String, reason: String },
    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("invalid path \"{0}\": must be empty or start with '/'")]
    InvalidPath(String),
}

/// Errors loading a scenario document or building its test tree.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid scenario document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("step \"{step}\" sends on unknown channel \"{channel}\"")]
    UnknownChannel { step: String, channel: String },
    #[error("expects check \"{test}\" runs on the step's responses and cannot carry \"data\"")]
    DataOnStepCheck { test: String },
    #[error("test \"{test}\": {source}")]
    Expects {
        test: String,
        #[source]
        source: ExpectsError,
    },
}

/// Errors loading a harness configuration or starting its emulators.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid harness configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("emulator \"{0}\" is declared more than once")]
    Duplicate(String),
    #[error("emulator \"{0}\" needs a connect or listen address")]
    NoAddress(String),
    #[error("failed to start emulator \"{name}\": {source}")]
    Start {
        name: String,
        #[source]
        source: TransportError,
    },
}
