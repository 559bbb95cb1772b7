//! Harness configuration and lifecycle.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wirecheck_core::{Correlator, DEFAULT_TIMEOUT, Emulator, EmulatorConfig};

use crate::{ConfigError, ScenarioError, ScenarioSet, TestResult, run_test};

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

/// Emulators to create and the default response deadline.
///
/// ```json
/// {
///   "defaultTimeoutMs": 3000,
///   "emulators": [
///     { "name": "EM1", "connect": "127.0.0.1:7001" },
///     { "name": "FEED", "listen": "127.0.0.1:7002", "codec": "json" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub emulators: Vec<EmulatorConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            emulators: Vec::new(),
        }
    }
}

impl HarnessConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn emulator(mut self, emulator: EmulatorConfig) -> Self {
        self.emulators.push(emulator);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Names are unique and every emulator has somewhere to send or listen.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for emulator in &self.emulators {
            if !seen.insert(emulator.name.as_str()) {
                return Err(ConfigError::Duplicate(emulator.name.clone()));
            }
            if emulator.connect.is_none() && emulator.listen.is_none() {
                return Err(ConfigError::NoAddress(emulator.name.clone()));
            }
        }
        Ok(())
    }
}

/// Emulators wired to one correlator.
#[derive(Debug)]
pub struct Harness {
    correlator: Arc<Correlator>,
    emulators: Vec<Emulator>,
}

impl Harness {
    pub fn new(config: &HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let correlator = Arc::new(Correlator::new(config.default_timeout()));
        let emulators = config
            .emulators
            .iter()
            .cloned()
            .map(|emulator| {
                let emulator = Emulator::new(emulator);
                correlator.attach(&emulator);
                emulator
            })
            .collect();
        Ok(Self {
            correlator,
            emulators,
        })
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn emulators(&self) -> &[Emulator] {
        &self.emulators
    }

    pub fn emulator(&self, name: &str) -> Option<&Emulator> {
        self.emulators.iter().find(|e| e.name() == name)
    }

    /// Start every emulator; on failure the ones already started are stopped.
    pub async fn start(&self) -> Result<(), ConfigError> {
        for (started, emulator) in self.emulators.iter().enumerate() {
            if let Err(source) = emulator.start().await {
                for emulator in &self.emulators[..started] {
                    emulator.stop().await;
                }
                return Err(ConfigError::Start {
                    name: emulator.name().to_string(),
                    source,
                });
            }
        }
        tracing::info!(emulators = self.emulators.len(), "harness started");
        Ok(())
    }

    pub async fn stop(&self) {
        for emulator in &self.emulators {
            emulator.stop().await;
        }
        tracing::info!("harness stopped");
    }

    /// Build and run a scenario set under its root suite.
    pub async fn run(&self, scenarios: &ScenarioSet) -> Result<TestResult, ScenarioError> {
        let root = scenarios.build(&self.correlator)?;
        Ok(run_test(&root, &()).await)
    }
}
