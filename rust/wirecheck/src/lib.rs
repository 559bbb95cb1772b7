//! wirecheck: composable integration tests over length-framed message streams.
//!
//! A test tree is built from four kinds of node, all implementing [`Test`]:
//!
//! - [`Suite`] (and its alias [`Scenario`]) runs children in order and stops
//!   after a child that fails with [`OnFailure::Stop`].
//! - [`Step`] sends requests through a [`Correlator`](wirecheck_core::Correlator)
//!   and runs checks against the responses.
//! - [`MessageExpectation`], [`Expects`] and [`Assertion`] are the checks.
//!
//! Results fold upwards through [`ResultType::fold`]: `Fatal > Error > Fail >
//! Warning > Pass`. Trees are usually loaded from JSON with [`ScenarioSet`]
//! and run by a [`Harness`].
//!
//! ```ignore
//! let harness = Harness::new(&HarnessConfig::load("harness.json")?)?;
//! harness.start().await?;
//! let result = harness.run(&ScenarioSet::load("scenarios.json")?).await?;
//! print!("{}", report::render_text(&result, true));
//! harness.stop().await;
//! ```

#![forbid(unsafe_code)]

mod assertion;
mod config;
mod error;
mod expectation;
pub mod expects;
pub mod report;
pub mod scenario;
mod step;
mod suite;

pub use assertion::*;
pub use config::*;
pub use error::*;
pub use expectation::*;
pub use expects::{Expectation, ExpectationDef, Expects, Matcher};
pub use scenario::ScenarioSet;
pub use step::*;
pub use suite::*;
pub use test::*;

pub use wirecheck_core::Message;
