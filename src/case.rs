//! Test case model: the expectations parsed out of one script.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// Exit code for a clean run.
pub const EXIT_OK: i32 = 0;
/// Exit code when the interpreter reports a compile error (`EX_DATAERR`).
pub const EXIT_COMPILE_ERROR: i32 = 65;
/// Exit code for an unhandled runtime error (`EX_SOFTWARE`).
pub const EXIT_RUNTIME_ERROR: i32 = 70;

/// A single assertion extracted from a comment directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Exact stdout line expected at the next position.
    OutputLine { text: String, source_line: u32 },
    /// Compile error reported against `source_line`.
    CompileError { source_line: u32 },
    /// Runtime error raised from `source_line`.
    RuntimeError(RuntimeError),
    /// Line fed to the interpreter's stdin.
    StdinLine { text: String },
    /// Exclude the whole file from the run.
    Skip { reason: String },
    /// The file is not a test at all.
    NonTest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub source_line: u32,
    pub message: String,
    /// The script recovers from the error itself, so the process still succeeds.
    pub handled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub text: String,
    pub source_line: u32,
}

/// One runnable script and everything it expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestCase {
    pub path: PathBuf,
    pub output: Vec<OutputLine>,
    pub compile_errors: BTreeSet<u32>,
    pub runtime_error: Option<RuntimeError>,
    pub stdin_lines: Vec<String>,
    /// Number of checked expectations (output, compile and runtime errors).
    pub expectations: usize,
}

impl TestCase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Fold one expectation into the case.
    ///
    /// `Skip` and `NonTest` are handled by the parser and ignored here.
    pub fn add(&mut self, expectation: Expectation) {
        match expectation {
            Expectation::OutputLine { text, source_line } => {
                self.output.push(OutputLine { text, source_line });
                self.expectations += 1;
            }
            Expectation::CompileError { source_line } => {
                self.compile_errors.insert(source_line);
                self.expectations += 1;
            }
            Expectation::RuntimeError(error) => {
                self.runtime_error = Some(error);
                self.expectations += 1;
            }
            Expectation::StdinLine { text } => self.stdin_lines.push(text),
            Expectation::Skip { .. } | Expectation::NonTest => {}
        }
    }

    /// Bytes written to the interpreter's stdin, if any `stdin:` lines were given.
    pub fn stdin_bytes(&self) -> Option<Vec<u8>> {
        if self.stdin_lines.is_empty() {
            None
        } else {
            Some(self.stdin_lines.join("\n").into_bytes())
        }
    }

    /// Exit code the interpreter must return.
    pub fn expected_exit_code(&self) -> i32 {
        match &self.runtime_error {
            Some(error) if !error.handled => EXIT_RUNTIME_ERROR,
            _ if !self.compile_errors.is_empty() => EXIT_COMPILE_ERROR,
            _ => EXIT_OK,
        }
    }

    /// Compile and runtime errors cannot both be expected.
    pub fn is_ambiguous(&self) -> bool {
        !self.compile_errors.is_empty() && self.runtime_error.is_some()
    }
}
