//! Schema definitions for the exptest suite configuration.
//!
//! This module defines the structure of `exptest.yaml`. Every field has a
//! default, so a project laid out like the interpreter's source tree needs no
//! configuration file at all.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Harness configuration loaded from `exptest.yaml` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Schema version (must match crate major version).
    #[serde(default = "default_version")]
    pub version: u32,

    /// File extension of test scripts, without the leading dot.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Timeout in seconds for a single interpreter run.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Build variant suffix used when the command line does not give one.
    /// A leading `d` selects a debug build.
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Interpreter path template. `{suffix}` and `{config_dir}` are expanded
    /// from the build variant, `${VAR}` from the environment.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Interpreter path template for suites of kind `api`.
    #[serde(default = "default_api_interpreter")]
    pub api_interpreter: String,

    /// Extra environment variables for the interpreter.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Whether the interpreter inherits the harness environment (default: true).
    #[serde(default = "default_true")]
    pub inherit_env: bool,

    /// Directory the path-prefix filter is relative to.
    #[serde(default = "default_filter_base")]
    pub filter_base: PathBuf,

    /// Shape of a compile error line on stderr. The first capture group
    /// must hold the line number.
    #[serde(default = "default_error_pattern")]
    pub error_pattern: String,

    /// Shape of a stack frame line on stderr. The first capture group must
    /// hold the line number.
    #[serde(default = "default_stack_trace_pattern")]
    pub stack_trace_pattern: String,

    /// Directory walked instead of the suites in self-check mode.
    #[serde(default = "default_fixtures")]
    pub fixtures: PathBuf,

    /// Test trees, walked in order.
    #[serde(default = "default_suites")]
    pub suites: Vec<SuiteDef>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            extension: default_extension(),
            timeout: default_timeout(),
            suffix: default_suffix(),
            interpreter: default_interpreter(),
            api_interpreter: default_api_interpreter(),
            env: HashMap::new(),
            inherit_env: true,
            filter_base: default_filter_base(),
            error_pattern: default_error_pattern(),
            stack_trace_pattern: default_stack_trace_pattern(),
            fixtures: default_fixtures(),
            suites: default_suites(),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_extension() -> String {
    "wren".to_string()
}

fn default_timeout() -> u64 {
    5
}

fn default_suffix() -> String {
    "d".to_string()
}

fn default_interpreter() -> String {
    "bin/wren{suffix}".to_string()
}

fn default_api_interpreter() -> String {
    "build/{config_dir}/test/api_wren{suffix}".to_string()
}

fn default_true() -> bool {
    true
}

fn default_filter_base() -> PathBuf {
    PathBuf::from("test")
}

fn default_error_pattern() -> String {
    r"\[.* line (\d+)\] Error".to_string()
}

fn default_stack_trace_pattern() -> String {
    r"\[\./test/.* line (\d+)\] in".to_string()
}

fn default_fixtures() -> PathBuf {
    PathBuf::from("fixtures")
}

fn default_suites() -> Vec<SuiteDef> {
    vec![
        SuiteDef {
            name: "test".to_string(),
            path: PathBuf::from("test"),
            kind: SuiteKind::Test,
            ignore: vec!["api".to_string(), "benchmark".to_string()],
            exclude: vec![],
        },
        SuiteDef {
            name: "api".to_string(),
            path: PathBuf::from("test/api"),
            kind: SuiteKind::Api,
            ignore: vec![],
            exclude: vec![],
        },
        SuiteDef {
            name: "example".to_string(),
            path: PathBuf::from("example"),
            kind: SuiteKind::Example,
            ignore: vec![],
            // Need user input, or are too slow to be worth it.
            exclude: vec![
                "animals".to_string(),
                "guess_number".to_string(),
                "skynet".to_string(),
            ],
        },
    ]
}

/// One tree of test scripts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SuiteDef {
    /// Suite name (used in reports).
    pub name: String,

    /// Root directory of the suite.
    pub path: PathBuf,

    /// How scripts in this suite are run and checked.
    #[serde(default)]
    pub kind: SuiteKind,

    /// Directory names directly under the suite root that are not walked.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Scripts whose path contains any of these substrings are not run.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Run convention for a suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuiteKind {
    /// Regular language test, run by the interpreter with output checked.
    #[default]
    Test,
    /// Embedding API test, run by the API test host.
    Api,
    /// Example program. Output is not checked, only errors and exit code.
    Example,
}

impl SuiteKind {
    /// Whether stdout is compared against `expect:` lines.
    pub fn checks_output(self) -> bool {
        !matches!(self, SuiteKind::Example)
    }
}

impl std::fmt::Display for SuiteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuiteKind::Test => write!(f, "test"),
            SuiteKind::Api => write!(f, "api test"),
            SuiteKind::Example => write!(f, "example"),
        }
    }
}

/// Generate the JSON Schema for the configuration file.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(HarnessConfig)
}
