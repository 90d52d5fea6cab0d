//! Run reporting: the live status line, failure dumps and final summaries in
//! human, JSON and JUnit form.

use crate::runner::{CaseResult, CaseStatus, Disposition, RunReport, RunTally};
use clap::ValueEnum;
use colored::Colorize;
use std::fmt::Write as _;
use std::io::Write as _;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Live status line and failure details
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

/// Erase the current terminal line and return the cursor to its start.
const ERASE_LINE: &str = "\x1b[2K\r";

pub struct Reporter {
    format: OutputFormat,
    verbose: bool,
    /// Redraw the status line in place. Only makes sense on a terminal.
    live: bool,
}

impl Reporter {
    pub fn new(format: OutputFormat, verbose: bool, live: bool) -> Self {
        Self {
            format,
            verbose,
            live: live && format == OutputFormat::Human,
        }
    }

    /// A reporter that prints nothing until [`Reporter::finish`].
    #[cfg(test)]
    pub fn quiet(format: OutputFormat) -> Self {
        Self {
            format,
            verbose: false,
            live: false,
        }
    }

    fn human(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Overwrite the status line, or just print `line` when not live.
    fn print_line(&self, line: Option<&str>) {
        let mut stdout = std::io::stdout().lock();
        if self.live {
            let _ = write!(stdout, "{ERASE_LINE}");
        }
        if let Some(line) = line {
            let _ = write!(stdout, "{line}");
        }
        let _ = stdout.flush();
    }

    /// Free-form diagnostic line, shown in verbose mode.
    pub fn note(&self, message: &str) {
        if self.human() {
            self.print_line(None);
            println!("{message}");
        } else {
            eprintln!("{message}");
        }
    }

    pub fn status(&self, tally: &RunTally, interpreter: &str) {
        if !self.live {
            return;
        }
        self.print_line(Some(&format!(
            "({interpreter}) Passed: {} Failed: {} Skipped: {} ",
            tally.passed.to_string().green(),
            tally.failed.to_string().red(),
            tally.skipped_total().to_string().yellow(),
        )));
    }

    pub fn considered(&self, path: &str, disposition: &Disposition) {
        if self.verbose {
            self.note(&format!("{path}: {disposition}"));
        }
    }

    pub fn case_finished(&self, result: &CaseResult) {
        if !self.human() || result.status != CaseStatus::Failed {
            return;
        }
        self.print_line(Some(&format!("{}: {}", "FAIL".red(), result.path)));
        println!();
        for failure in &result.failures {
            println!("      {}", failure.bright_red());
        }
        println!();
    }

    pub fn finish(&self, report: &RunReport) {
        match self.format {
            OutputFormat::Human => {
                self.print_line(None);
                print!("{}", format_summary(&report.tally));
            }
            OutputFormat::Json => println!("{}", format_json(report)),
            OutputFormat::Junit => print!("{}", format_junit_xml(report)),
        }
    }
}

/// Final human summary: counts, then one line per skip reason.
pub fn format_summary(tally: &RunTally) -> String {
    let mut out = String::new();
    if tally.failed == 0 {
        let _ = writeln!(
            out,
            "All {} tests passed ({} expectations).",
            tally.passed.to_string().green(),
            tally.expectations
        );
    } else {
        let _ = writeln!(
            out,
            "{} tests passed. {} tests failed.",
            tally.passed.to_string().green(),
            tally.failed.to_string().red()
        );
    }

    for (reason, count) in &tally.skipped {
        let _ = writeln!(out, "Skipped {} tests: {reason}", count.to_string().yellow());
    }
    out
}

pub fn format_json(report: &RunReport) -> String {
    let output = serde_json::json!({
        "passed": report.tally.passed,
        "failed": report.tally.failed,
        "skipped": report.tally.skipped,
        "expectations": report.tally.expectations,
        "started_at": report.started_at.to_rfc3339(),
        "duration": report.duration.as_secs_f64(),
        "results": report.results,
    });
    serde_json::to_string_pretty(&output).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Format results as JUnit XML, one `<testsuite>` per suite.
pub fn format_junit_xml(report: &RunReport) -> String {
    let mut suites: Vec<(&str, Vec<&CaseResult>)> = Vec::new();
    for result in &report.results {
        match suites.iter().position(|(name, _)| *name == result.suite) {
            Some(index) => suites[index].1.push(result),
            None => suites.push((result.suite.as_str(), vec![result])),
        }
    }

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let total_tests = report.results.len();
    let total_failures = report
        .results
        .iter()
        .filter(|r| r.status == CaseStatus::Failed)
        .count();

    let _ = writeln!(
        xml,
        "<testsuites tests=\"{total_tests}\" failures=\"{total_failures}\" time=\"{:.3}\">",
        report.duration.as_secs_f64()
    );

    for (name, cases) in suites {
        let failures = cases
            .iter()
            .filter(|c| c.status == CaseStatus::Failed)
            .count();
        let skipped = cases
            .iter()
            .filter(|c| matches!(c.status, CaseStatus::Skipped(_)))
            .count();
        let time: f64 = cases.iter().map(|c| c.duration.as_secs_f64()).sum();

        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{failures}\" skipped=\"{skipped}\" time=\"{time:.3}\" timestamp=\"{}\">",
            escape_xml(name),
            cases.len(),
            report.started_at.format("%Y-%m-%dT%H:%M:%S")
        );

        for case in cases {
            let _ = writeln!(
                xml,
                "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\">",
                escape_xml(&case.path),
                escape_xml(name),
                case.duration.as_secs_f64()
            );

            match &case.status {
                CaseStatus::Failed => {
                    let message = case
                        .failures
                        .first()
                        .map(|s| s.as_str())
                        .unwrap_or("Test failed");
                    let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(message));
                    for failure in &case.failures {
                        let _ = writeln!(xml, "{}", escape_xml(failure));
                    }
                    xml.push_str("      </failure>\n");
                }
                CaseStatus::Skipped(reason) => {
                    let _ = writeln!(xml, "      <skipped message=\"{}\"/>", escape_xml(reason));
                }
                CaseStatus::Passed => {}
            }

            xml.push_str("    </testcase>\n");
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(suite: &str, path: &str, status: CaseStatus, failures: Vec<&str>) -> CaseResult {
        CaseResult {
            suite: suite.to_string(),
            path: path.to_string(),
            status,
            duration: Duration::from_millis(5),
            failures: failures.into_iter().map(String::from).collect(),
        }
    }

    fn report(results: Vec<CaseResult>) -> RunReport {
        let mut tally = RunTally::default();
        for r in &results {
            match &r.status {
                CaseStatus::Passed => tally.passed += 1,
                CaseStatus::Failed => tally.failed += 1,
                CaseStatus::Skipped(reason) => {
                    *tally.skipped.entry(reason.clone()).or_default() += 1
                }
            }
        }
        RunReport {
            tally,
            results,
            started_at: chrono::Utc::now(),
            duration: Duration::from_millis(20),
        }
    }

    #[test]
    fn summary_all_passed() {
        colored::control::set_override(false);
        let mut tally = RunTally {
            passed: 3,
            expectations: 7,
            ..RunTally::default()
        };
        tally.skipped.insert("slow".to_string(), 2);
        tally.skipped.insert("flaky on CI".to_string(), 1);

        assert_eq!(
            format_summary(&tally),
            "All 3 tests passed (7 expectations).\nSkipped 1 tests: flaky on CI\nSkipped 2 tests: slow\n"
        );
    }

    #[test]
    fn summary_with_failures() {
        colored::control::set_override(false);
        let tally = RunTally {
            passed: 2,
            failed: 1,
            ..RunTally::default()
        };
        assert_eq!(format_summary(&tally), "2 tests passed. 1 tests failed.\n");
    }

    #[test]
    fn json_report_lists_results() {
        let report = report(vec![
            result("test", "test/a.wren", CaseStatus::Passed, vec![]),
            result("test", "test/b.wren", CaseStatus::Failed, vec!["Timed out."]),
            result("test", "test/c.wren", CaseStatus::Skipped("slow".into()), vec![]),
        ]);
        let json: serde_json::Value = serde_json::from_str(&format_json(&report)).unwrap();
        assert_eq!(json["passed"], 1);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["skipped"]["slow"], 1);
        assert_eq!(json["results"][0]["status"], "passed");
        assert_eq!(json["results"][1]["failures"][0], "Timed out.");
        assert_eq!(json["results"][2]["status"]["skipped"], "slow");
    }

    #[test]
    fn junit_groups_by_suite() {
        let report = report(vec![
            result("test", "test/a.wren", CaseStatus::Passed, vec![]),
            result(
                "test",
                "test/<b>.wren",
                CaseStatus::Failed,
                vec!["Expected output \"1\" on line 2 and got \"2\"."],
            ),
            result("example", "example/x.wren", CaseStatus::Skipped("slow".into()), vec![]),
        ]);
        let xml = format_junit_xml(&report);
        assert!(xml.contains("<testsuites tests=\"3\" failures=\"1\""));
        assert!(xml.contains("<testsuite name=\"test\" tests=\"2\" failures=\"1\" skipped=\"0\""));
        assert!(xml.contains("<testsuite name=\"example\" tests=\"1\" failures=\"0\" skipped=\"1\""));
        assert!(xml.contains("name=\"test/&lt;b&gt;.wren\""));
        assert!(xml.contains("&quot;1&quot; on line 2"));
        assert!(xml.contains("<skipped message=\"slow\"/>"));
    }

    #[test]
    fn escape_xml_special_characters() {
        assert_eq!(escape_xml("a<b>&'\""), "a&lt;b&gt;&amp;&apos;&quot;");
    }
}
