//! Configuration loader and test tree discovery.
//!
//! Loads `exptest.yaml` (or `.toml`), resolves it against the project root
//! into a [`Project`], and finds the scripts under each suite.

use crate::env::{InterpolateError, expand_placeholders, interpolate_env};
use crate::executor::ProcessEnv;
use crate::schema::{HarnessConfig, SuiteDef, SuiteKind};
use crate::validator::Patterns;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Config file names looked for in the project root, in order.
pub const CONFIG_FILENAMES: &[&str] = &["exptest.yaml", "exptest.yml", "exptest.toml"];

/// Newest config schema version this build understands.
const CONFIG_VERSION: u32 = 1;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
    #[error("unsupported config version {0} (expected {CONFIG_VERSION})")]
    UnsupportedVersion(u32),
    #[error("invalid {field}: {source}")]
    Pattern {
        field: &'static str,
        source: regex::Error,
    },
    #[error("{0} must have a capture group for the line number")]
    MissingLineGroup(&'static str),
    #[error("cannot expand {field}: {source}")]
    Interpolate {
        field: String,
        source: InterpolateError,
    },
}

/// Load a harness config from a file path.
pub fn load_config(path: &Path) -> Result<HarnessConfig, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path)?;

    let config: HarnessConfig = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&contents)?,
        "toml" => toml::from_str(&contents)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };

    if config.version != CONFIG_VERSION {
        return Err(LoadError::UnsupportedVersion(config.version));
    }
    Ok(config)
}

/// Find the config file in a directory, if there is one.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Load the config at `explicit`, or the one in `cwd`, or the defaults.
///
/// Returns the config and the project root: the directory holding the config
/// file, or `cwd` when there is none.
pub fn load_project_config(
    explicit: Option<&Path>,
    cwd: &Path,
) -> Result<(HarnessConfig, PathBuf), LoadError> {
    let path = match explicit {
        Some(path) => Some(cwd.join(path)),
        None => find_config(cwd),
    };

    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            let config = load_config(&path)?;
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.to_path_buf());
            Ok((config, root))
        }
        None => {
            debug!("no config file, using defaults");
            Ok((HarnessConfig::default(), cwd.to_path_buf()))
        }
    }
}

/// Build variant selected by an interpreter suffix such as `d` or `d_nan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildVariant {
    pub suffix: String,
}

impl BuildVariant {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn is_debug(&self) -> bool {
        self.suffix.starts_with('d')
    }

    /// Build output directory name, e.g. `debug` for `d`, `release_nan` for `_nan`.
    pub fn config_dir(&self) -> String {
        let config = self.suffix.trim_start_matches('d');
        let mode = if self.is_debug() { "debug" } else { "release" };
        format!("{mode}{config}")
    }

    /// Expand `{suffix}` / `{config_dir}` placeholders, then `${VAR}` references.
    pub fn expand(&self, template: &str) -> Result<String, InterpolateError> {
        let config_dir = self.config_dir();
        let expanded = expand_placeholders(
            template,
            &[("suffix", self.suffix.as_str()), ("config_dir", config_dir.as_str())],
        )?;
        interpolate_env(&expanded, &Default::default())
    }
}

/// A suite with its root resolved.
#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    pub root: PathBuf,
    pub kind: SuiteKind,
    pub ignore: Vec<String>,
    pub exclude: Vec<String>,
}

impl Suite {
    fn resolve(def: &SuiteDef, root: &Path) -> Self {
        Self {
            name: def.name.clone(),
            root: root.join(&def.path),
            kind: def.kind,
            ignore: def.ignore.clone(),
            exclude: def.exclude.clone(),
        }
    }

    /// Whether the script is on the suite's exclusion list.
    pub fn excludes(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.exclude.iter().any(|needle| path.contains(needle.as_str()))
    }
}

/// Fully resolved harness settings for one invocation.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub extension: String,
    pub timeout: Duration,
    pub interpreter: PathBuf,
    pub api_interpreter: PathBuf,
    pub env: ProcessEnv,
    pub filter_base: PathBuf,
    pub patterns: Patterns,
    pub suites: Vec<Suite>,
}

impl Project {
    /// Resolve a config against the project root.
    ///
    /// `suffix` overrides the config's build variant. In self-check mode the
    /// fixture tree replaces every configured suite.
    pub fn resolve(
        config: &HarnessConfig,
        root: &Path,
        suffix: Option<&str>,
        self_check: bool,
    ) -> Result<Self, LoadError> {
        let variant = BuildVariant::new(suffix.unwrap_or(&config.suffix));
        let expand = |field: &str, template: &str| {
            variant
                .expand(template)
                .map(|path| root.join(path))
                .map_err(|source| LoadError::Interpolate {
                    field: field.to_string(),
                    source,
                })
        };
        let interpreter = expand("interpreter", &config.interpreter)?;
        let api_interpreter = expand("api_interpreter", &config.api_interpreter)?;

        let mut vars = std::collections::HashMap::new();
        for (key, value) in &config.env {
            let value =
                interpolate_env(value, &config.env).map_err(|source| LoadError::Interpolate {
                    field: format!("env.{key}"),
                    source,
                })?;
            vars.insert(key.clone(), value);
        }

        let patterns = Patterns::new(
            compile_pattern("error_pattern", &config.error_pattern)?,
            compile_pattern("stack_trace_pattern", &config.stack_trace_pattern)?,
        );

        let (suites, filter_base) = if self_check {
            let fixtures = SuiteDef {
                name: "fixtures".to_string(),
                path: config.fixtures.clone(),
                kind: SuiteKind::Test,
                ignore: vec![],
                exclude: vec![],
            };
            (vec![Suite::resolve(&fixtures, root)], root.join(&config.fixtures))
        } else {
            (
                config
                    .suites
                    .iter()
                    .map(|def| Suite::resolve(def, root))
                    .collect(),
                root.join(&config.filter_base),
            )
        };

        Ok(Self {
            root: root.to_path_buf(),
            extension: config.extension.clone(),
            timeout: Duration::from_secs(config.timeout),
            interpreter,
            api_interpreter,
            env: ProcessEnv {
                vars,
                inherit: config.inherit_env,
            },
            filter_base,
            patterns,
            suites,
        })
    }

    /// Interpreter binary for a suite kind.
    pub fn interpreter_for(&self, kind: SuiteKind) -> &Path {
        match kind {
            SuiteKind::Api => &self.api_interpreter,
            SuiteKind::Test | SuiteKind::Example => &self.interpreter,
        }
    }

    /// Scripts of a suite in run order, or `None` if its directory is missing.
    pub fn scripts(&self, suite: &Suite) -> Result<Option<Vec<PathBuf>>, std::io::Error> {
        if !suite.root.is_dir() {
            return Ok(None);
        }
        find_scripts(&suite.root, &self.extension, &suite.ignore).map(Some)
    }

    /// Path used for the operator's prefix filter, with `/` separators.
    pub fn filter_path(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.filter_base)
            .or_else(|_| path.strip_prefix(&self.root))
            .unwrap_or(path);
        slash_path(relative)
    }
}

fn compile_pattern(field: &'static str, pattern: &str) -> Result<Regex, LoadError> {
    let re = Regex::new(pattern).map_err(|source| LoadError::Pattern { field, source })?;
    if re.captures_len() < 2 {
        return Err(LoadError::MissingLineGroup(field));
    }
    Ok(re)
}

/// Render a path with `/` separators, which the interpreter expects.
pub fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Find all scripts with `extension` under `root`, sorted.
///
/// Directories named in `ignore` are skipped, but only directly under `root`.
pub fn find_scripts(
    root: &Path,
    extension: &str,
    ignore: &[String],
) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut scripts = Vec::new();
    collect_scripts_recursive(root, extension, ignore, &mut scripts)?;
    scripts.sort();
    Ok(scripts)
}

fn collect_scripts_recursive(
    dir: &Path,
    extension: &str,
    ignore: &[String],
    scripts: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            if path
                .file_name()
                .is_some_and(|name| ignore.iter().any(|ignored| name == ignored.as_str()))
            {
                continue;
            }
            collect_scripts_recursive(&path, extension, &[], scripts)?;
        } else if path.extension().is_some_and(|ext| ext == extension) {
            scripts.push(path);
        }
    }
    Ok(())
}
