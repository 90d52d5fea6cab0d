//! Annotation parser.
//!
//! Scripts carry their expectations in `//` line comments. Each physical line
//! is tested against an ordered list of directive patterns; the first pattern
//! that matches decides what the line means and the rest of the line is
//! ignored.

use crate::case::{Expectation, RuntimeError, TestCase};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
}

/// What a script turned out to be after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A runnable test.
    Test(TestCase),
    /// Excluded from the run, bucketed under the reason.
    Skip(String),
    /// Not a test at all.
    NonTest,
}

#[derive(Debug, Clone, Copy)]
enum Directive {
    Skip,
    NonTest,
    RuntimeError,
    ErrorLine,
    Error,
    Expect,
    Stdin,
}

/// Checked in order. `ErrorLine` must come before `Error`.
const DIRECTIVES: &[(Directive, &str)] = &[
    (Directive::Skip, r"// skip: (.*)"),
    (Directive::NonTest, r"// nontest"),
    (
        Directive::RuntimeError,
        r"// expect (handled )?runtime error: (.+)",
    ),
    (Directive::ErrorLine, r"// expect error line ([0-9]+)"),
    (Directive::Error, r"// expect error"),
    (Directive::Expect, r"// expect: ?(.*)"),
    (Directive::Stdin, r"// stdin: (.*)"),
];

fn matchers() -> &'static [(Directive, Regex)] {
    static MATCHERS: OnceLock<Vec<(Directive, Regex)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        DIRECTIVES
            .iter()
            .map(|(directive, pattern)| {
                (
                    *directive,
                    Regex::new(pattern).expect("directive patterns are valid"),
                )
            })
            .collect()
    })
}

/// Recognize the directive on one line, if any.
pub fn parse_directive(line: &str, line_num: u32) -> Option<Expectation> {
    matchers()
        .iter()
        .find_map(|(directive, re)| re.captures(line).and_then(|caps| build(*directive, &caps, line, line_num)))
}

fn build(directive: Directive, caps: &Captures<'_>, line: &str, line_num: u32) -> Option<Expectation> {
    let group = |i: usize| caps.get(i).map_or("", |m| m.as_str()).to_string();

    match directive {
        Directive::Skip => Some(Expectation::Skip { reason: group(1) }),
        Directive::NonTest => Some(Expectation::NonTest),
        Directive::RuntimeError => Some(Expectation::RuntimeError(RuntimeError {
            source_line: line_num,
            message: group(2),
            handled: caps.get(1).is_some(),
        })),
        Directive::ErrorLine => {
            // The pattern only admits ASCII digits, so this fails only on overflow.
            let source_line = caps[1].parse().unwrap_or(u32::MAX);
            Some(Expectation::CompileError { source_line })
        }
        Directive::Error => {
            // `expect error line` without a number is not a directive.
            let end = caps.get(0)?.end();
            if line[end..].starts_with(" line") {
                None
            } else {
                Some(Expectation::CompileError {
                    source_line: line_num,
                })
            }
        }
        Directive::Expect => Some(Expectation::OutputLine {
            text: group(1),
            source_line: line_num,
        }),
        Directive::Stdin => Some(Expectation::StdinLine { text: group(1) }),
    }
}

/// Parse a script's text into a test case.
///
/// Stops at the first `skip:` or `nontest` directive.
pub fn parse_source(path: &Path, source: &str) -> ParseOutcome {
    let mut case = TestCase::new(path);

    for (line, line_num) in source.lines().zip(1u32..) {
        match parse_directive(line, line_num) {
            Some(Expectation::Skip { reason }) => return ParseOutcome::Skip(reason),
            Some(Expectation::NonTest) => return ParseOutcome::NonTest,
            Some(expectation) => case.add(expectation),
            None => {}
        }
    }

    ParseOutcome::Test(case)
}

/// Read and parse a script from disk.
pub fn parse_file(path: &Path) -> Result<ParseOutcome, ParseError> {
    let bytes = std::fs::read(path)?;
    let source = String::from_utf8(bytes)?;
    Ok(parse_source(path, &source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::OutputLine;
    use std::collections::BTreeSet;

    fn parse(source: &str) -> ParseOutcome {
        parse_source(Path::new("test/case.wren"), source)
    }

    fn parse_case(source: &str) -> TestCase {
        match parse(source) {
            ParseOutcome::Test(case) => case,
            other => panic!("expected a runnable test, got {other:?}"),
        }
    }

    #[test]
    fn expect_lines_keep_order_and_source_line() {
        let case = parse_case(
            "System.print(1) // expect: 1\n\nSystem.print(\"a b\") // expect: a b\n",
        );
        assert_eq!(
            case.output,
            vec![
                OutputLine {
                    text: "1".to_string(),
                    source_line: 1
                },
                OutputLine {
                    text: "a b".to_string(),
                    source_line: 3
                },
            ]
        );
        assert_eq!(case.expectations, 2);
    }

    #[test]
    fn expect_without_space_and_empty_value() {
        let case = parse_case("// expect:x\n// expect:\n");
        assert_eq!(case.output[0].text, "x");
        assert_eq!(case.output[1].text, "");
    }

    #[test]
    fn expect_error_uses_current_line() {
        let case = parse_case("var a = 1\nvar = 2 // expect error\n");
        assert_eq!(case.compile_errors, BTreeSet::from([2]));
        assert_eq!(case.expected_exit_code(), 65);
    }

    #[test]
    fn expect_error_line_uses_given_line() {
        let case = parse_case("// expect error line 5\n");
        assert_eq!(case.compile_errors, BTreeSet::from([5]));
        assert_eq!(case.expected_exit_code(), 65);
    }

    #[test]
    fn expect_error_line_saturates_huge_numbers() {
        let case = parse_case("// expect error line 99999999999\n");
        assert_eq!(case.compile_errors, BTreeSet::from([u32::MAX]));
        assert_eq!(case.expected_exit_code(), 65);
    }

    #[test]
    fn all_directive_patterns_compile() {
        assert_eq!(matchers().len(), DIRECTIVES.len());
    }

    #[test]
    fn expect_error_line_without_number_is_ignored() {
        let case = parse_case("// expect error line five\n");
        assert!(case.compile_errors.is_empty());
        assert_eq!(case.expectations, 0);
    }

    #[test]
    fn runtime_error_sets_exit_code() {
        let case = parse_case("\n\nlist[9] // expect runtime error: Index out of bounds.\n");
        let error = case.runtime_error.clone().unwrap();
        assert_eq!(error.source_line, 3);
        assert_eq!(error.message, "Index out of bounds.");
        assert!(!error.handled);
        assert_eq!(case.expected_exit_code(), 70);
    }

    #[test]
    fn handled_runtime_error_keeps_success_exit() {
        let case = parse_case("Fiber.abort(\"x\") // expect handled runtime error: x\n");
        assert!(case.runtime_error.as_ref().unwrap().handled);
        assert_eq!(case.expected_exit_code(), 0);
    }

    #[test]
    fn later_runtime_error_replaces_earlier() {
        let case = parse_case("// expect runtime error: first\n// expect runtime error: second\n");
        let error = case.runtime_error.unwrap();
        assert_eq!(error.message, "second");
        assert_eq!(error.source_line, 2);
    }

    #[test]
    fn stdin_lines_are_collected() {
        let case = parse_case("// stdin: one\n// stdin: two\n// expect: one\n");
        assert_eq!(case.stdin_bytes(), Some(b"one\ntwo".to_vec()));
        assert_eq!(case.expectations, 1);
    }

    #[test]
    fn skip_short_circuits() {
        let outcome = parse("// expect: 1\n// skip: flaky on CI\n// nontest\n");
        assert_eq!(outcome, ParseOutcome::Skip("flaky on CI".to_string()));
    }

    #[test]
    fn nontest_short_circuits() {
        let outcome = parse("// nontest\n// skip: never seen\n");
        assert_eq!(outcome, ParseOutcome::NonTest);
    }

    #[test]
    fn directives_need_comment_syntax() {
        let case = parse_case("expect: 1\nexpect error\n");
        assert_eq!(case.expectations, 0);
    }

    #[test]
    fn empty_file_is_a_valid_test() {
        let case = parse_case("");
        assert!(case.output.is_empty());
        assert_eq!(case.expected_exit_code(), 0);
    }

    #[test]
    fn crlf_line_endings_are_stripped() {
        let case = parse_case("// expect: a\r\n// expect: b\r\n");
        assert_eq!(case.output[0].text, "a");
        assert_eq!(case.output[1].source_line, 2);
    }

    #[test]
    fn parse_file_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.wren");
        std::fs::write(&path, [0x2f, 0x2f, 0xff, 0xfe]).unwrap();
        assert!(matches!(parse_file(&path), Err(ParseError::Decode(_))));
    }

    #[test]
    fn parse_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.wren");
        std::fs::write(&path, "System.print(3) // expect: 3\n").unwrap();
        match parse_file(&path).unwrap() {
            ParseOutcome::Test(case) => {
                assert_eq!(case.path, path);
                assert_eq!(case.output.len(), 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
