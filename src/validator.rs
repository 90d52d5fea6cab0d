//! Result validator.
//!
//! Compares one interpreter run against the expectations of its test case.
//! Every applicable check runs, so a single pass reports everything that is
//! wrong with a test.

use crate::case::{OutputLine, RuntimeError, TestCase};
use crate::executor::ExecOutput;
use regex::Regex;
use std::collections::BTreeSet;

/// Shapes of interpreter diagnostics on stderr. Each pattern's first capture
/// group holds a source line number.
#[derive(Debug, Clone)]
pub struct Patterns {
    error: Regex,
    stack_trace: Regex,
}

impl Patterns {
    pub fn new(error: Regex, stack_trace: Regex) -> Self {
        Self { error, stack_trace }
    }

    fn error_line(&self, line: &str) -> Option<Option<u32>> {
        self.error
            .captures(line)
            .map(|caps| caps.get(1).and_then(|m| m.as_str().parse().ok()))
    }

    fn stack_line(&self, line: &str) -> Option<u32> {
        self.stack_trace
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// Validate a run, returning every failure message. Empty means the test passed.
pub fn validate(
    case: &TestCase,
    output: &ExecOutput,
    check_output: bool,
    patterns: &Patterns,
) -> Vec<String> {
    let mut failures = Vec::new();

    if output.timed_out {
        failures.push("Timed out.".to_string());
        return failures;
    }

    if case.is_ambiguous() {
        failures.push("Test error: Cannot expect both compile and runtime errors.".to_string());
        return failures;
    }

    let (Some(out), Some(err)) = (decode(&output.stdout), decode(&output.stderr)) else {
        failures.push("Error decoding output.".to_string());
        return failures;
    };

    let error_lines: Vec<&str> = err.split('\n').collect();

    match &case.runtime_error {
        Some(expected) => validate_runtime_error(expected, &error_lines, patterns, &mut failures),
        None => validate_compile_errors(&case.compile_errors, &error_lines, patterns, &mut failures),
    }

    validate_exit_code(case.expected_exit_code(), output, &error_lines, &mut failures);

    if check_output {
        validate_output(&case.output, &out, &mut failures);
    }

    failures
}

fn decode(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes)
        .ok()
        .map(|text| text.replace("\r\n", "\n"))
}

fn validate_runtime_error(
    expected: &RuntimeError,
    error_lines: &[&str],
    patterns: &Patterns,
    failures: &mut Vec<String>,
) {
    let message = &expected.message;
    if error_lines.len() < 2 {
        failures.push(format!("Expected runtime error \"{message}\" and got none."));
        return;
    }

    // A compile error in an imported module can come before the runtime error.
    let start = error_lines
        .iter()
        .position(|line| patterns.error_line(line).is_none());
    let Some(start) = start else {
        failures.push(format!("Expected runtime error \"{message}\" and got none."));
        return;
    };

    let actual = error_lines[start];
    if actual != message {
        failures.push(format!("Expected runtime error \"{message}\" and got:"));
        failures.push(actual.to_string());
    }

    // Frames from builtin modules don't match the stack trace shape and are skipped.
    let stack_lines = &error_lines[start + 1..];
    match stack_lines.iter().find_map(|line| patterns.stack_line(line)) {
        None => {
            failures.push("Expected stack trace and got:".to_string());
            failures.extend(stack_lines.iter().map(|line| line.to_string()));
        }
        Some(line) if line != expected.source_line => {
            failures.push(format!(
                "Expected runtime error on line {} but was on line {line}.",
                expected.source_line
            ));
        }
        Some(_) => {}
    }
}

fn validate_compile_errors(
    expected: &BTreeSet<u32>,
    error_lines: &[&str],
    patterns: &Patterns,
    failures: &mut Vec<String>,
) {
    let mut found = BTreeSet::new();

    for line in error_lines {
        match patterns.error_line(line) {
            Some(Some(number)) if expected.contains(&number) => {
                found.insert(number);
            }
            Some(_) => {
                failures.push("Unexpected error:".to_string());
                failures.push(line.to_string());
            }
            None if !line.is_empty() => {
                failures.push("Unexpected output on stderr:".to_string());
                failures.push(line.to_string());
            }
            None => {}
        }
    }

    for line in expected.difference(&found) {
        failures.push(format!("Missing expected error on line {line}."));
    }
}

fn validate_exit_code(
    expected: i32,
    output: &ExecOutput,
    error_lines: &[&str],
    failures: &mut Vec<String>,
) {
    if output.exit_code == Some(expected) {
        return;
    }

    let actual = match (output.exit_code, output.signal) {
        (Some(code), _) => code.to_string(),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "no exit code".to_string(),
    };
    failures.push(format!(
        "Expected return code {expected} and got {actual}. Stderr:"
    ));
    failures.extend(error_lines.iter().map(|line| line.to_string()));
}

fn validate_output(expected: &[OutputLine], out: &str, failures: &mut Vec<String>) {
    let mut lines: Vec<&str> = out.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }

    for (index, line) in lines.iter().enumerate() {
        match expected.get(index) {
            None => failures.push(format!("Got output \"{line}\" when none was expected.")),
            Some(want) if want.text != *line => failures.push(format!(
                "Expected output \"{}\" on line {} and got \"{line}\".",
                want.text, want.source_line
            )),
            Some(_) => {}
        }
    }

    for want in expected.iter().skip(lines.len()) {
        failures.push(format!(
            "Missing expected output \"{}\" on line {}.",
            want.text, want.source_line
        ));
    }
}
