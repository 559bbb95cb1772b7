//! wirecheck: run integration scenarios against a system under test.
//!
//! # Usage
//!
//! Run a scenario file once and print a report:
//! ```bash
//! wirecheck run --config harness.json --scenarios scenarios.json
//! ```
//!
//! Serve the HTTP trigger (`POST /run`, `GET /health`):
//! ```bash
//! wirecheck serve --config harness.json --addr 127.0.0.1:8080
//! ```
//!
//! Print the tree of a scenario file:
//! ```bash
//! wirecheck list --scenarios scenarios.json
//! ```
//!
//! # Exit Codes
//!
//! - 0: All scenarios passed (warnings allowed)
//! - 1: At least one test failed or errored
//! - 2: Internal error (bad configuration, emulator start failure)

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use wirecheck::report::{self, Summary};
use wirecheck::{Harness, HarnessConfig, ResultType, ScenarioSet};

#[derive(Parser, Debug)]
#[command(name = "wirecheck")]
#[command(about = "Integration-test harness for length-framed message systems")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scenarios once and print the result tree
    Run {
        /// Harness configuration (emulators, default timeout)
        #[arg(long)]
        config: PathBuf,
        /// Scenario document
        #[arg(long)]
        scenarios: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Start the emulators and serve the HTTP trigger until Ctrl+C
    Serve {
        /// Harness configuration (emulators, default timeout)
        #[arg(long)]
        config: PathBuf,
        /// Address for the HTTP trigger
        #[arg(long, env = "WIRECHECK_HTTP_ADDR", default_value = "127.0.0.1:8080")]
        addr: String,
    },
    /// Print the tree of a scenario document
    List {
        /// Scenario document
        #[arg(long)]
        scenarios: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match rt.block_on(run(cli.command)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether everything passed.
async fn run(command: Command) -> Result<bool, Box<dyn std::error::Error>> {
    match command {
        Command::Run {
            config,
            scenarios,
            format,
            no_color,
        } => {
            let config = HarnessConfig::load(&config)?;
            let scenarios = ScenarioSet::load(&scenarios)?;
            let harness = Harness::new(&config)?;
            harness.start().await?;
            let outcome = harness.run(&scenarios).await;
            harness.stop().await;
            let result = outcome?;

            match format {
                Format::Text => {
                    let color = !no_color && std::io::stdout().is_terminal();
                    print!("{}", report::render_text(&result, color));
                }
                Format::Json => {
                    println!("{}", serde_json::to_string_pretty(&Summary::new(&result))?);
                }
            }
            Ok(matches!(
                result.result_type,
                ResultType::Pass | ResultType::Warning
            ))
        }
        Command::Serve { config, addr } => {
            let config = HarnessConfig::load(&config)?;
            let harness = Arc::new(Harness::new(&config)?);
            harness.start().await?;

            let listener = TcpListener::bind(&addr).await?;
            eprintln!(
                "  {} {} {}",
                "wirecheck".bold().cyan(),
                "trigger ready on".white(),
                format!("http://{}", listener.local_addr()?).green()
            );

            let interrupted = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "cannot listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
                tracing::info!("interrupted; shutting down");
            };
            let served = wirecheck_http::serve_with_shutdown(
                listener,
                wirecheck_http::router(harness.clone()),
                interrupted,
            )
            .await;
            harness.stop().await;
            served?;
            Ok(true)
        }
        Command::List { scenarios } => {
            let scenarios = ScenarioSet::load(&scenarios)?;
            print!("{}", scenarios.outline());
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_text() {
        let cli = Cli::try_parse_from([
            "wirecheck",
            "run",
            "--config",
            "h.json",
            "--scenarios",
            "s.json",
        ])
        .expect("parses");
        match cli.command {
            Command::Run {
                format, no_color, ..
            } => {
                assert_eq!(format, Format::Text);
                assert!(!no_color);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn format_accepts_json() {
        let cli = Cli::try_parse_from([
            "wirecheck",
            "run",
            "--config",
            "h.json",
            "--scenarios",
            "s.json",
            "--format",
            "json",
        ])
        .expect("parses");
        assert!(matches!(
            cli.command,
            Command::Run {
                format: Format::Json,
                ..
            }
        ));
    }
}
