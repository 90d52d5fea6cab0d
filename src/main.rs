mod case;
mod env;
mod executor;
mod loader;
mod logger;
mod parser;
mod report;
mod runner;
mod schema;
mod validator;

use clap::{Parser, Subcommand};
use report::{OutputFormat, Reporter};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "exptest")]
#[command(about = "An expectation-driven conformance test runner for script interpreters")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the test suites
    Run {
        /// Only run tests whose path starts with this prefix
        filter: Option<String>,
        /// Interpreter build variant suffix (e.g. "d" for debug, "" for release)
        #[arg(long)]
        suffix: Option<String>,
        /// Config file (defaults to exptest.yaml in the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print every considered script and what happened to it
        #[arg(short, long)]
        verbose: bool,
        /// Walk the harness's own fixture tree instead of the suites
        #[arg(long)]
        self_check: bool,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
    },
    /// Parse every test script without running it
    Validate {
        /// Config file (defaults to exptest.yaml in the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Walk the harness's own fixture tree instead of the suites
        #[arg(long)]
        self_check: bool,
    },
    /// Scaffold a config file
    Init {
        /// Output path for the new config file
        #[arg(default_value = "exptest.yaml")]
        path: PathBuf,
    },
    /// Output the config file schema
    Schema,
}

fn main() {
    logger::init_logger();
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let cli = Cli::parse();
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error reading working directory: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Run {
            filter,
            suffix,
            config,
            verbose,
            self_check,
            output,
        } => {
            let project = load_project(config.as_deref(), &cwd, suffix.as_deref(), self_check);

            let executor = match executor::Executor::new(project.timeout, project.env.clone()) {
                Ok(executor) => executor,
                Err(e) => {
                    eprintln!("Error starting executor: {e}");
                    std::process::exit(1);
                }
            };

            let live = std::io::stdout().is_terminal();
            let mut reporter = Reporter::new(output, verbose, live);
            let options = runner::RunOptions { filter, verbose };
            let report = runner::Runner::new(&project, executor, options, cwd).run(&mut reporter);
            reporter.finish(&report);

            if !report.tally.success() {
                std::process::exit(1);
            }
        }
        Command::Validate { config, self_check } => {
            let project = load_project(config.as_deref(), &cwd, None, self_check);

            let mut scripts = 0;
            let mut errors = 0;
            for suite in &project.suites {
                let paths = match project.scripts(suite) {
                    Ok(Some(paths)) => paths,
                    Ok(None) => continue,
                    Err(e) => {
                        eprintln!("✗ {}: {e}", suite.root.display());
                        errors += 1;
                        continue;
                    }
                };

                for path in paths {
                    scripts += 1;
                    let shown = path.strip_prefix(&cwd).unwrap_or(&path).display();
                    match parser::parse_file(&path) {
                        Ok(parser::ParseOutcome::Test(case)) if case.is_ambiguous() => {
                            eprintln!("✗ {shown}: cannot expect both compile and runtime errors");
                            errors += 1;
                        }
                        Ok(parser::ParseOutcome::Test(case)) => {
                            println!("✓ {shown} ({} expectations)", case.expectations);
                        }
                        Ok(parser::ParseOutcome::Skip(reason)) => {
                            println!("- {shown} (skipped: {reason})");
                        }
                        Ok(parser::ParseOutcome::NonTest) => {
                            println!("- {shown} (nontest)");
                        }
                        Err(e) => {
                            eprintln!("✗ {shown}: {e}");
                            errors += 1;
                        }
                    }
                }
            }

            if errors > 0 {
                eprintln!("\n{errors} script(s) failed validation");
                std::process::exit(1);
            }
            println!("\nAll {scripts} script(s) valid");
        }
        Command::Init { path } => {
            let template = r#"version: 1

# Script extension, without the dot.
extension: wren
# Seconds before a hanging interpreter is killed.
timeout: 5

# {suffix} and {config_dir} come from --suffix; ${VAR} from the environment.
interpreter: bin/wren{suffix}
api_interpreter: build/{config_dir}/test/api_wren{suffix}

# env:
#   WREN_GC_STRESS: "1"

# The run filter is relative to this directory.
filter_base: test

suites:
  - name: test
    path: test
    ignore: [api, benchmark]
  - name: api
    path: test/api
    kind: api
  - name: example
    path: example
    kind: example
    exclude: [animals, guess_number, skynet]
"#;
            if path.exists() {
                eprintln!("Error: file already exists: {}", path.display());
                std::process::exit(1);
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
                && let Err(e) = fs::create_dir_all(parent)
            {
                eprintln!("Error creating directory: {e}");
                std::process::exit(1);
            }
            if let Err(e) = fs::write(&path, template) {
                eprintln!("Error writing file: {e}");
                std::process::exit(1);
            }
            println!("Created: {}", path.display());
        }
        Command::Schema => {
            let schema = schema::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing schema: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Load and resolve the config, exiting on error.
fn load_project(
    config: Option<&Path>,
    cwd: &Path,
    suffix: Option<&str>,
    self_check: bool,
) -> loader::Project {
    let (config, root) = match loader::load_project_config(config, cwd) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            std::process::exit(1);
        }
    };

    match loader::Project::resolve(&config, &root, suffix, self_check) {
        Ok(project) => project,
        Err(e) => {
            eprintln!("Error in config: {e}");
            std::process::exit(1);
        }
    }
}
