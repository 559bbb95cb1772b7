//! Text and JSON renderings of a result tree.

use std::fmt::Write as _;

use owo_colors::OwoColorize;
use serde::Serialize;

use crate::{ResultType, TestResult};

/// Leaf counts of a result tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub errors: usize,
}

impl Stats {
    pub fn collect(result: &TestResult) -> Self {
        let mut stats = Stats::default();
        stats.add(result);
        stats
    }

    fn add(&mut self, result: &TestResult) {
        if let Some(children) = &result.children {
            for child in children {
                self.add(child);
            }
            return;
        }
        match result.result_type {
            ResultType::NotApplicable => return,
            ResultType::Pass => self.passed += 1,
            ResultType::Fail => self.failed += 1,
            ResultType::Warning => self.warnings += 1,
            ResultType::Error | ResultType::Fatal => self.errors += 1,
        }
        self.total += 1;
    }
}

/// Machine-readable report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary<'a> {
    pub result: ResultType,
    #[serde(flatten)]
    pub stats: Stats,
    pub duration_ms: u64,
    pub tree: &'a TestResult,
}

impl<'a> Summary<'a> {
    pub fn new(result: &'a TestResult) -> Self {
        Self {
            result: result.result_type,
            stats: Stats::collect(result),
            duration_ms: result.duration.map_or(0, |d| d.as_millis() as u64),
            tree: result,
        }
    }
}

/// Render `result` as an indented tree followed by a summary block.
pub fn render_text(result: &TestResult, color: bool) -> String {
    let mut out = String::new();
    render_node(&mut out, result, 0, color);

    let stats = Stats::collect(result);
    let rule = "=".repeat(50);
    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "TEST SUMMARY");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Total:    {}", stats.total);
    let _ = writeln!(out, "Passed:   {}", stats.passed);
    let _ = writeln!(out, "Failed:   {}", stats.failed);
    let _ = writeln!(out, "Warnings: {}", stats.warnings);
    let _ = writeln!(out, "Errors:   {}", stats.errors);
    if let Some(duration) = result.duration {
        let _ = writeln!(out, "Duration: {}ms", duration.as_millis());
    }
    let _ = writeln!(out, "{rule}");
    out
}

fn render_node(out: &mut String, result: &TestResult, depth: usize, color: bool) {
    let indent = "  ".repeat(depth);
    let status = format!("{} {}", result.result_type.icon(), result.name);
    let status = if color {
        paint(&status, result.result_type)
    } else {
        status
    };
    let _ = write!(out, "{indent}{status} - {}", result.result_type);
    if let Some(duration) = result.duration {
        let _ = write!(out, " ({}ms)", duration.as_millis());
    }
    out.push('\n');

    if let Some(description) = &result.description {
        for line in description.lines() {
            let _ = writeln!(out, "{indent}  {line}");
        }
    }
    for child in result.children() {
        render_node(out, child, depth + 1, color);
    }
}

fn paint(text: &str, result_type: ResultType) -> String {
    match result_type {
        ResultType::Pass => text.green().to_string(),
        ResultType::Warning => text.yellow().to_string(),
        ResultType::Fail => text.red().to_string(),
        ResultType::Error => text.magenta().to_string(),
        ResultType::Fatal => text.red().bold().to_string(),
        ResultType::NotApplicable => text.dimmed().to_string(),
    }
}
