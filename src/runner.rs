//! Test execution engine.
//!
//! Walks every suite in order, parses each script, runs the interpreter on it
//! and validates the result. Scripts run one at a time so reports follow the
//! sorted traversal order.

use crate::executor::Executor;
use crate::loader::{Project, Suite, slash_path};
use crate::parser::{ParseOutcome, parse_file};
use crate::report::Reporter;
use crate::validator::validate;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Operator choices for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only run scripts whose filter path starts with this prefix.
    pub filter: Option<String>,
    /// Report every considered script and what happened to it.
    pub verbose: bool,
}

/// Running counts for one invocation.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunTally {
    pub passed: usize,
    pub failed: usize,
    /// Skipped scripts per `skip:` reason.
    pub skipped: BTreeMap<String, usize>,
    /// Expectations checked across all executed scripts.
    pub expectations: usize,
}

impl RunTally {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, result: &CaseResult) {
        match &result.status {
            CaseStatus::Passed => self.passed += 1,
            CaseStatus::Failed => self.failed += 1,
            CaseStatus::Skipped(reason) => *self.skipped.entry(reason.clone()).or_default() += 1,
        }
    }
}

/// Final state of one script.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped(String),
}

/// Result of one script.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CaseResult {
    pub suite: String,
    pub path: String,
    pub status: CaseStatus,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    pub failures: Vec<String>,
}

/// What the runner decided to do with a discovered script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Filtered,
    Excluded,
    Skipped(String),
    NonTest,
    Run,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::Filtered => write!(f, "filtered"),
            Disposition::Excluded => write!(f, "excluded"),
            Disposition::Skipped(reason) => write!(f, "skipped: {reason}"),
            Disposition::NonTest => write!(f, "nontest"),
            Disposition::Run => write!(f, "run"),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tally: RunTally,
    pub results: Vec<CaseResult>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

pub struct Runner<'a> {
    project: &'a Project,
    executor: Executor,
    options: RunOptions,
    /// Script paths handed to the interpreter are relative to this directory.
    cwd: PathBuf,
    tally: RunTally,
    results: Vec<CaseResult>,
}

impl<'a> Runner<'a> {
    pub fn new(project: &'a Project, executor: Executor, options: RunOptions, cwd: PathBuf) -> Self {
        Self {
            project,
            executor,
            options,
            cwd,
            tally: RunTally::default(),
            results: Vec::new(),
        }
    }

    /// Run every suite and return the aggregated report.
    pub fn run(mut self, reporter: &mut Reporter) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();

        if self.options.verbose
            && let Some(filter) = &self.options.filter
        {
            reporter.note(&format!("Filtering tests by: {filter:?}"));
        }

        let project = self.project;
        for suite in &project.suites {
            self.run_suite(suite, reporter);
        }

        RunReport {
            tally: self.tally,
            results: self.results,
            started_at,
            duration: start.elapsed(),
        }
    }

    fn run_suite(&mut self, suite: &Suite, reporter: &mut Reporter) {
        let scripts = match self.project.scripts(suite) {
            Ok(Some(scripts)) => scripts,
            Ok(None) => {
                warn!(suite = %suite.name, root = %suite.root.display(), "suite directory not found; skipping");
                return;
            }
            Err(err) => {
                warn!(suite = %suite.name, error = %err, "failed to walk suite");
                self.finish(
                    reporter,
                    CaseResult {
                        suite: suite.name.clone(),
                        path: self.display_path(&suite.root),
                        status: CaseStatus::Failed,
                        duration: Duration::ZERO,
                        failures: vec![format!("Failed to walk suite: {err}")],
                    },
                );
                return;
            }
        };

        info!(suite = %suite.name, kind = %suite.kind, scripts = scripts.len(), "running suite");
        for path in scripts {
            self.run_script(suite, &path, reporter);
        }
    }

    fn run_script(&mut self, suite: &Suite, path: &Path, reporter: &mut Reporter) {
        let project = self.project;
        let display = self.display_path(path);

        if suite.excludes(path) {
            reporter.considered(&display, &Disposition::Excluded);
            return;
        }
        if let Some(filter) = &self.options.filter
            && !project.filter_path(path).starts_with(filter.as_str())
        {
            reporter.considered(&display, &Disposition::Filtered);
            return;
        }

        let interpreter = project.interpreter_for(suite.kind);
        reporter.status(&self.tally, &self.label(interpreter));

        let start = Instant::now();
        let case = match parse_file(path) {
            Ok(ParseOutcome::Test(case)) => case,
            Ok(ParseOutcome::Skip(reason)) => {
                reporter.considered(&display, &Disposition::Skipped(reason.clone()));
                self.finish(
                    reporter,
                    CaseResult {
                        suite: suite.name.clone(),
                        path: display,
                        status: CaseStatus::Skipped(reason),
                        duration: Duration::ZERO,
                        failures: vec![],
                    },
                );
                return;
            }
            Ok(ParseOutcome::NonTest) => {
                reporter.considered(&display, &Disposition::NonTest);
                return;
            }
            Err(err) => {
                reporter.considered(&display, &Disposition::Run);
                self.finish(
                    reporter,
                    CaseResult {
                        suite: suite.name.clone(),
                        path: display,
                        status: CaseStatus::Failed,
                        duration: start.elapsed(),
                        failures: vec![format!("Failed to read test: {err}")],
                    },
                );
                return;
            }
        };
        reporter.considered(&display, &Disposition::Run);

        let stdin = case.stdin_bytes();
        let failures = match self.executor.run(interpreter, &display, stdin.as_deref()) {
            Ok(output) => validate(&case, &output, suite.kind.checks_output(), &project.patterns),
            Err(err) => vec![format!("Failed to run interpreter: {err}")],
        };
        self.tally.expectations += case.expectations;

        let status = if failures.is_empty() {
            CaseStatus::Passed
        } else {
            CaseStatus::Failed
        };
        self.finish(
            reporter,
            CaseResult {
                suite: suite.name.clone(),
                path: display,
                status,
                duration: start.elapsed(),
                failures,
            },
        );
    }

    fn finish(&mut self, reporter: &mut Reporter, result: CaseResult) {
        self.tally.record(&result);
        reporter.case_finished(&result);
        self.results.push(result);
    }

    /// Path relative to the working directory, with `/` separators.
    fn display_path(&self, path: &Path) -> String {
        slash_path(path.strip_prefix(&self.cwd).unwrap_or(path))
    }

    /// Interpreter name shown in the status line.
    fn label(&self, interpreter: &Path) -> String {
        slash_path(interpreter.strip_prefix(&self.project.root).unwrap_or(interpreter))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::executor::ProcessEnv;
    use crate::report::OutputFormat;
    use crate::schema::{HarnessConfig, SuiteDef, SuiteKind};
    use tempfile::TempDir;

    /// A project whose "interpreter" is `/bin/sh`, so test scripts are shell
    /// scripts with directives in trailing comments.
    fn project(dir: &TempDir, suites: Vec<SuiteDef>) -> Project {
        let config = HarnessConfig {
            extension: "sh".to_string(),
            timeout: 1,
            interpreter: "/bin/sh".to_string(),
            api_interpreter: "/bin/sh".to_string(),
            stack_trace_pattern: r"\[.* line (\d+)\] in".to_string(),
            filter_base: PathBuf::from("cases"),
            suites,
            ..HarnessConfig::default()
        };
        Project::resolve(&config, dir.path(), None, false).unwrap()
    }

    fn suite(name: &str, path: &str, kind: SuiteKind) -> SuiteDef {
        SuiteDef {
            name: name.to_string(),
            path: PathBuf::from(path),
            kind,
            ignore: vec![],
            exclude: vec![],
        }
    }

    fn write(dir: &TempDir, path: &str, contents: &str) {
        let path = dir.path().join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn run(dir: &TempDir, project: &Project, options: RunOptions) -> RunReport {
        let executor = Executor::new(project.timeout, ProcessEnv::default()).unwrap();
        let mut reporter = Reporter::quiet(OutputFormat::Json);
        Runner::new(project, executor, options, dir.path().to_path_buf()).run(&mut reporter)
    }

    #[test]
    fn passing_script_counts_expectations() {
        let dir = TempDir::new().unwrap();
        write(&dir, "cases/pass.sh", "echo 3 # // expect: 3\necho 4 # // expect: 4\n");
        let project = project(&dir, vec![suite("test", "cases", SuiteKind::Test)]);

        let report = run(&dir, &project, RunOptions::default());
        assert_eq!(report.tally.passed, 1);
        assert_eq!(report.tally.failed, 0);
        assert_eq!(report.tally.expectations, 2);
        assert_eq!(report.results[0].path, "cases/pass.sh");
    }

    #[test]
    fn skip_and_nontest_do_not_run() {
        let dir = TempDir::new().unwrap();
        // Would fail if run.
        write(&dir, "cases/a.sh", "exit 3 # // skip: flaky on CI\n");
        write(&dir, "cases/b.sh", "exit 3 # // skip: flaky on CI\n");
        write(&dir, "cases/c.sh", "exit 3 # // nontest\n");
        let project = project(&dir, vec![suite("test", "cases", SuiteKind::Test)]);

        let report = run(&dir, &project, RunOptions::default());
        assert_eq!(report.tally.passed, 0);
        assert_eq!(report.tally.failed, 0);
        assert_eq!(report.tally.skipped.get("flaky on CI"), Some(&2));
        assert_eq!(report.results.len(), 2);
    }

    #[test]
    fn failures_do_not_stop_the_run() {
        let dir = TempDir::new().unwrap();
        write(&dir, "cases/a_hang.sh", "exec sleep 10\n");
        write(&dir, "cases/b_pass.sh", "echo ok # // expect: ok\n");
        let project = project(&dir, vec![suite("test", "cases", SuiteKind::Test)]);

        let report = run(&dir, &project, RunOptions::default());
        assert_eq!(report.tally.failed, 1);
        assert_eq!(report.tally.passed, 1);
        assert_eq!(report.results[0].failures, vec!["Timed out."]);
        assert!(!report.tally.success());
    }

    #[test]
    fn filter_restricts_scripts() {
        let dir = TempDir::new().unwrap();
        write(&dir, "cases/core/a.sh", "exit 1\n");
        write(&dir, "cases/lang/b.sh", "true\n");
        let project = project(&dir, vec![suite("test", "cases", SuiteKind::Test)]);

        let options = RunOptions {
            filter: Some("lang".to_string()),
            verbose: false,
        };
        let report = run(&dir, &project, options);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].path, "cases/lang/b.sh");
        assert!(report.tally.success());
    }

    #[test]
    fn example_suite_ignores_output_and_exclusions() {
        let dir = TempDir::new().unwrap();
        write(&dir, "demos/hello.sh", "echo unexpected\n");
        write(&dir, "demos/guess_number.sh", "exit 9\n");
        let mut demos = suite("example", "demos", SuiteKind::Example);
        demos.exclude = vec!["guess_number".to_string()];
        let project = project(&dir, vec![demos]);

        let report = run(&dir, &project, RunOptions::default());
        assert_eq!(report.tally.passed, 1);
        assert_eq!(report.results.len(), 1);
    }

    #[test]
    fn missing_suite_directory_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "cases/a.sh", "true\n");
        let project = project(
            &dir,
            vec![
                suite("gone", "nowhere", SuiteKind::Test),
                suite("test", "cases", SuiteKind::Test),
            ],
        );

        let report = run(&dir, &project, RunOptions::default());
        assert_eq!(report.tally.passed, 1);
    }

    #[test]
    fn unreadable_script_fails() {
        let dir = TempDir::new().unwrap();
        write(&dir, "cases/a.sh", "");
        std::fs::write(dir.path().join("cases/a.sh"), [0xff, 0xfe, b'\n']).unwrap();
        let project = project(&dir, vec![suite("test", "cases", SuiteKind::Test)]);

        let report = run(&dir, &project, RunOptions::default());
        assert_eq!(report.tally.failed, 1);
        assert!(report.results[0].failures[0].starts_with("Failed to read test:"));
    }
}
