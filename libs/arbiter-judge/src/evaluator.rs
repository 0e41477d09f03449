/// Test Evaluator - Language-Agnostic Scoring Logic
///
/// **Core Responsibility:**
/// Turn one raw execution outcome into a test case result, and a list of
/// results into a submission verdict.
///
/// **Critical Properties:**
/// - Knows nothing about containers or language runtimes
/// - Judges against the test case's own limits, not the sandbox ceiling
/// - Pure functions: (outcome, test case) -> result, (results) -> verdict
///
/// **Classification order for one test:**
/// 1. Timed out, or runtime at/over the limit -> TIME_LIMIT_EXCEEDED
/// 2. OOM-killed, or peak memory over the limit -> MEMORY_LIMIT_EXCEEDED
/// 3. Non-zero exit -> RUNTIME_ERROR (COMPILE_ERROR if compile-shaped)
/// 4. Output comparison -> PASSED / FAILED
use arbiter_common::types::{
    SubmissionId, SubmissionStatus, TestCase, TestCaseResult, TestCaseStatus,
};

use crate::comparator::{compare_optional, present};
use crate::engine::{ExecutionOutcome, FailureKind};

/// Cap on stored user output and error text per test case
const MAX_STORED_TEXT_BYTES: usize = 64 * 1024;

/// Outcome of a judging pass
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: SubmissionStatus,
    pub results: Vec<TestCaseResult>,
    pub passed_test_cases: u32,
    pub total_test_cases: u32,
    pub score: f64,
    pub runtime_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub compile_error: Option<String>,
}

impl Verdict {
    /// First test failed to compile: no test case results are kept
    pub fn compile_error(total_test_cases: u32, stderr: &str) -> Self {
        Self {
            status: SubmissionStatus::CompileError,
            results: Vec::new(),
            passed_test_cases: 0,
            total_test_cases,
            score: 0.0,
            runtime_ms: None,
            memory_kb: None,
            compile_error: Some(truncate(stderr.trim_end())),
        }
    }
}

pub(crate) fn truncate(text: &str) -> String {
    if text.len() <= MAX_STORED_TEXT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_STORED_TEXT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated]", &text[..end])
}

/// Judged time limit: the test's limit scaled by the language multiplier
pub fn effective_time_limit_ms(test_case: &TestCase, time_multiplier: f64) -> u64 {
    (test_case.time_limit_ms as f64 * time_multiplier.max(1.0)).round() as u64
}

/// Failure status of an execution judged against explicit limits, with its
/// user-facing message. `None` means the program ran cleanly and its output
/// still needs comparing.
pub fn classify_outcome(
    outcome: &ExecutionOutcome,
    time_limit_ms: u64,
    memory_limit_kb: u64,
) -> Option<(TestCaseStatus, String)> {
    if outcome.timed_out || outcome.runtime_ms >= time_limit_ms {
        return Some((
            TestCaseStatus::TimeLimitExceeded,
            format!("Time limit of {}ms exceeded", time_limit_ms),
        ));
    }
    if outcome.oom_killed || outcome.memory_kb > memory_limit_kb {
        return Some((
            TestCaseStatus::MemoryLimitExceeded,
            format!(
                "Memory limit of {}KB exceeded ({}KB used)",
                memory_limit_kb, outcome.memory_kb
            ),
        ));
    }
    let status = match outcome.failure? {
        FailureKind::Compile => TestCaseStatus::CompileError,
        FailureKind::Runtime => TestCaseStatus::RuntimeError,
    };
    Some((status, truncate(&outcome.error_text())))
}

/// Evaluate a single test case execution outcome
pub fn evaluate_test(
    outcome: &ExecutionOutcome,
    test_case: &TestCase,
    time_limit_ms: u64,
    submission_id: Option<SubmissionId>,
) -> TestCaseResult {
    let (status, error_message) = if let Some((status, message)) =
        classify_outcome(outcome, time_limit_ms, test_case.memory_limit_kb)
    {
        (status, Some(message))
    } else if compare_optional(
        present(&outcome.stdout),
        present(&test_case.expected_output),
        test_case.comparison_mode,
        test_case.epsilon,
    ) {
        (TestCaseStatus::Passed, None)
    } else {
        (TestCaseStatus::Failed, None)
    };

    let score = if status == TestCaseStatus::Passed {
        test_case.weight()
    } else {
        0.0
    };

    TestCaseResult {
        submission_id,
        test_case_id: test_case.id,
        status,
        runtime_ms: outcome.runtime_ms,
        memory_kb: outcome.memory_kb,
        output: truncate(&outcome.stdout),
        error_message,
        score,
    }
}

/// Aggregate the results of one pass into a verdict.
///
/// `results` end at the first non-passing test (early stop), so the verdict
/// is that test's status, or ACCEPTED when every test ran and passed.
pub fn aggregate_results(results: Vec<TestCaseResult>, total_test_cases: u32) -> Verdict {
    let passed = results
        .iter()
        .filter(|r| r.status == TestCaseStatus::Passed)
        .count() as u32;
    let score: f64 = results.iter().map(|r| r.score).sum();
    let runtime_ms: u64 = results.iter().map(|r| r.runtime_ms).sum();
    let memory_kb = results.iter().map(|r| r.memory_kb).max().unwrap_or(0);

    let status = match results.iter().find(|r| r.status != TestCaseStatus::Passed) {
        Some(failed) => failed.status.verdict(),
        None if passed == total_test_cases => SubmissionStatus::Accepted,
        None => SubmissionStatus::SystemError,
    };

    Verdict {
        status,
        passed_test_cases: passed,
        total_test_cases,
        score,
        runtime_ms: Some(runtime_ms),
        memory_kb: Some(memory_kb),
        compile_error: None,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_common::types::ComparisonMode;

    fn make_test_case(id: i64, expected_output: &str, weight: Option<f64>) -> TestCase {
        TestCase {
            id,
            problem_id: 1,
            input: vec![],
            expected_output: expected_output.to_string(),
            comparison_mode: ComparisonMode::Exact,
            epsilon: None,
            time_limit_ms: 1000,
            memory_limit_kb: 65536,
            weight,
            order: id as i32,
            is_example: false,
            is_hidden: false,
            depends_on: None,
        }
    }

    fn make_output(stdout: &str, runtime_ms: u64, memory_kb: u64) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: stdout.to_string(),
            exit_code: Some(0),
            runtime_ms,
            memory_kb,
            ..Default::default()
        }
    }

    #[test]
    fn test_evaluate_test_exact_match() {
        let tc = make_test_case(1, "120", Some(10.0));
        let result = evaluate_test(&make_output("120\n", 42, 1000), &tc, 1000, Some(7));

        assert_eq!(result.status, TestCaseStatus::Passed);
        assert_eq!(result.score, 10.0);
        assert_eq!(result.runtime_ms, 42);
        assert_eq!(result.submission_id, Some(7));
        assert!(result.error_message.is_none());
    }

    #[test]
    fn test_evaluate_test_mismatch_scores_zero() {
        let tc = make_test_case(1, "expected", None);
        let result = evaluate_test(&make_output("actual", 5, 100), &tc, 1000, None);

        assert_eq!(result.status, TestCaseStatus::Failed);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.output, "actual");
    }

    #[test]
    fn test_timeout_takes_priority() {
        let tc = make_test_case(1, "output", None);
        let outcome = ExecutionOutcome {
            timed_out: true,
            runtime_ms: 2500,
            memory_kb: 1_000_000,
            ..Default::default()
        };
        let result = evaluate_test(&outcome, &tc, 1000, None);
        assert_eq!(result.status, TestCaseStatus::TimeLimitExceeded);
        assert!(result.runtime_ms >= tc.time_limit_ms);
    }

    #[test]
    fn test_runtime_at_limit_is_tle() {
        let tc = make_test_case(1, "3", None);
        let result = evaluate_test(&make_output("3", 1000, 10), &tc, 1000, None);
        assert_eq!(result.status, TestCaseStatus::TimeLimitExceeded);
    }

    #[test]
    fn test_memory_judged_against_test_limit() {
        let tc = make_test_case(1, "3", None);
        let result = evaluate_test(&make_output("3", 10, 70_000), &tc, 1000, None);
        assert_eq!(result.status, TestCaseStatus::MemoryLimitExceeded);

        let oom = ExecutionOutcome {
            oom_killed: true,
            exit_code: Some(137),
            failure: Some(FailureKind::Runtime),
            ..Default::default()
        };
        let result = evaluate_test(&oom, &tc, 1000, None);
        assert_eq!(result.status, TestCaseStatus::MemoryLimitExceeded);
    }

    #[test]
    fn test_runtime_error_keeps_stderr() {
        let tc = make_test_case(1, "3", None);
        let outcome = ExecutionOutcome {
            stderr: "ZeroDivisionError: division by zero\n".to_string(),
            exit_code: Some(1),
            failure: Some(FailureKind::Runtime),
            memory_message: None,
            ..Default::default()
        };
        let result = evaluate_test(&outcome, &tc, 1000, None);
        assert_eq!(result.status, TestCaseStatus::RuntimeError);
        assert_eq!(
            result.error_message.as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
    }

    #[test]
    fn test_float_mode_uses_epsilon() {
        let mut tc = make_test_case(1, "0.3333333", None);
        tc.comparison_mode = ComparisonMode::Float;
        tc.epsilon = Some(1e-4);
        let result = evaluate_test(&make_output("0.33333333333", 5, 5), &tc, 1000, None);
        assert_eq!(result.status, TestCaseStatus::Passed);
    }

    #[test]
    fn test_blank_expected_output() {
        let mut tc = make_test_case(1, "", None);
        tc.comparison_mode = ComparisonMode::Float;

        let silent = evaluate_test(&make_output("\n", 5, 5), &tc, 1000, None);
        assert_eq!(silent.status, TestCaseStatus::Passed);

        let printed = evaluate_test(&make_output("0.0", 5, 5), &tc, 1000, None);
        assert_eq!(printed.status, TestCaseStatus::Failed);

        let tc = make_test_case(2, "42", None);
        let missing = evaluate_test(&make_output("", 5, 5), &tc, 1000, None);
        assert_eq!(missing.status, TestCaseStatus::Failed);
    }

    #[test]
    fn test_effective_time_limit() {
        let tc = make_test_case(1, "", None);
        assert_eq!(effective_time_limit_ms(&tc, 1.5), 1500);
        assert_eq!(effective_time_limit_ms(&tc, 0.5), 1000);
    }

    #[test]
    fn test_aggregate_all_pass() {
        let tc1 = make_test_case(1, "a", Some(10.0));
        let tc2 = make_test_case(2, "b", Some(15.0));
        let results = vec![
            evaluate_test(&make_output("a", 40, 900), &tc1, 1000, None),
            evaluate_test(&make_output("b", 35, 1200), &tc2, 1000, None),
        ];

        let verdict = aggregate_results(results, 2);
        assert_eq!(verdict.status, SubmissionStatus::Accepted);
        assert_eq!(verdict.passed_test_cases, 2);
        assert_eq!(verdict.score, 25.0);
        assert_eq!(verdict.runtime_ms, Some(75));
        assert_eq!(verdict.memory_kb, Some(1200));
    }

    #[test]
    fn test_aggregate_stops_at_first_failure() {
        let tc1 = make_test_case(1, "a", None);
        let tc2 = make_test_case(2, "b", None);
        let tc3 = make_test_case(3, "c", None);
        let results = vec![
            evaluate_test(&make_output("a", 1, 1), &tc1, 1000, None),
            evaluate_test(&make_output("b", 1, 1), &tc2, 1000, None),
            evaluate_test(&make_output("x", 1, 1), &tc3, 1000, None),
        ];

        let verdict = aggregate_results(results, 4);
        assert_eq!(verdict.status, SubmissionStatus::WrongAnswer);
        assert_eq!(verdict.passed_test_cases, 2);
        assert_eq!(verdict.total_test_cases, 4);
        assert_eq!(verdict.score, 2.0);
        assert!(verdict.passed_test_cases <= verdict.total_test_cases);
    }

    #[test]
    fn test_compile_error_verdict_has_no_results() {
        let verdict = Verdict::compile_error(5, "Main.java:3: error: ';' expected\n");
        assert_eq!(verdict.status, SubmissionStatus::CompileError);
        assert!(verdict.results.is_empty());
        assert_eq!(verdict.total_test_cases, 5);
        assert_eq!(verdict.compile_error.as_deref(), Some("Main.java:3: error: ';' expected"));
    }

    #[test]
    fn test_truncate_long_output() {
        let text = "x".repeat(MAX_STORED_TEXT_BYTES + 10);
        let stored = truncate(&text);
        assert!(stored.ends_with("[truncated]"));
        assert!(stored.len() < text.len());
    }
}
