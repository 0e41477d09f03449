// Synchronous run paths: scratch code and run-against-examples.
// User code is the whole program here and nothing is persisted.

use std::sync::Arc;

use arbiter_common::accessor::TestCaseAccessor;
use arbiter_common::config::ScratchConfig;
use arbiter_common::types::{ProblemId, SubmissionStatus, TestCase, TestCaseId, TestCaseResult, TestCaseStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::JudgeError;
use crate::evaluator::{classify_outcome, truncate, Verdict};
use crate::executor::{Judge, JudgeRequest, ProgramMode};
use crate::harness::whole_program_files;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScratchStatus {
    Success,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
}

impl From<TestCaseStatus> for ScratchStatus {
    fn from(status: TestCaseStatus) -> Self {
        match status {
            TestCaseStatus::CompileError => Self::CompileError,
            TestCaseStatus::TimeLimitExceeded => Self::TimeLimitExceeded,
            TestCaseStatus::MemoryLimitExceeded => Self::MemoryLimitExceeded,
            TestCaseStatus::Passed | TestCaseStatus::Failed => Self::Success,
            TestCaseStatus::RuntimeError | TestCaseStatus::SystemError => Self::RuntimeError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchResult {
    pub status: ScratchStatus,
    pub output: String,
    pub error_message: Option<String>,
    pub runtime_ms: u64,
    pub memory_kb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCodeResult {
    pub status: SubmissionStatus,
    pub results: Vec<TestCaseResult>,
    pub passed_test_cases: u32,
    pub total_test_cases: u32,
    pub score: f64,
    pub compile_error: Option<String>,
    pub runtime_ms: Option<u64>,
    pub memory_kb: Option<u64>,
}

impl From<Verdict> for RunCodeResult {
    fn from(verdict: Verdict) -> Self {
        Self {
            status: verdict.status,
            results: verdict.results,
            passed_test_cases: verdict.passed_test_cases,
            total_test_cases: verdict.total_test_cases,
            score: verdict.score,
            compile_error: verdict.compile_error,
            runtime_ms: verdict.runtime_ms,
            memory_kb: verdict.memory_kb,
        }
    }
}

pub struct RunService {
    judge: Arc<Judge>,
    test_cases: Arc<dyn TestCaseAccessor>,
    scratch: ScratchConfig,
}

impl RunService {
    pub fn new(judge: Arc<Judge>, test_cases: Arc<dyn TestCaseAccessor>, scratch: ScratchConfig) -> Self {
        Self {
            judge,
            test_cases,
            scratch,
        }
    }

    pub fn judge(&self) -> &Judge {
        &self.judge
    }

    /// Run code once against raw stdin, judged against the scratch limits
    #[tracing::instrument(skip(self, code, input))]
    pub async fn run_scratch(&self, code: &str, language: &str, input: &str) -> Result<ScratchResult, JudgeError> {
        let language = self.judge.registry().get(language)?;
        let time_limit_ms =
            (self.scratch.time_limit_ms as f64 * language.time_multiplier.max(1.0)).round() as u64;

        let outcome = self
            .judge
            .sandbox()
            .run(
                language,
                &whole_program_files(language, code),
                input,
                &self.judge.limits_for(time_limit_ms),
            )
            .await?;

        let (status, error_message) =
            match classify_outcome(&outcome, time_limit_ms, self.scratch.memory_limit_kb) {
                Some((status, message)) => (ScratchStatus::from(status), Some(message)),
                None => (ScratchStatus::Success, None),
            };

        info!(
            status = ?status,
            runtime_ms = outcome.runtime_ms,
            memory_kb = outcome.memory_kb,
            "Scratch run finished"
        );

        Ok(ScratchResult {
            status,
            output: truncate(&outcome.stdout),
            error_message,
            runtime_ms: outcome.runtime_ms,
            memory_kb: outcome.memory_kb,
        })
    }

    /// Judge code against selected test cases of a problem without persisting.
    ///
    /// `test_case_ids` of `None` selects the problem's example test cases.
    /// Selected tests keep the problem's declared order.
    #[tracing::instrument(skip(self, source_code, test_case_ids))]
    pub async fn run_code(
        &self,
        problem_id: ProblemId,
        language: &str,
        source_code: &str,
        test_case_ids: Option<&[TestCaseId]>,
    ) -> Result<RunCodeResult, JudgeError> {
        let all = self.test_cases.list_by_problem_ordered(problem_id).await?;
        let selected = select_test_cases(problem_id, all, test_case_ids)?;

        let request = JudgeRequest {
            problem_id,
            submission_id: None,
            language,
            source_code,
            mode: ProgramMode::WholeProgram,
        };
        let verdict = self.judge.judge(request, &selected).await?;
        Ok(verdict.into())
    }
}

fn select_test_cases(
    problem_id: ProblemId,
    all: Vec<TestCase>,
    ids: Option<&[TestCaseId]>,
) -> Result<Vec<TestCase>, JudgeError> {
    let Some(ids) = ids else {
        return Ok(all.into_iter().filter(|tc| tc.is_example).collect());
    };

    if let Some(unknown) = ids.iter().find(|id| !all.iter().any(|tc| tc.id == **id)) {
        return Err(JudgeError::Validation(format!(
            "Test case {} does not belong to problem {}",
            unknown, problem_id
        )));
    }
    Ok(all.into_iter().filter(|tc| ids.contains(&tc.id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageRegistry;
    use crate::engine::SandboxExecutor;
    use crate::testing::{ScriptedRun, ScriptedRuntime};
    use arbiter_common::config::SandboxConfig;
    use arbiter_common::memory::MemoryStore;
    use arbiter_common::retry::RetryPolicy;
    use arbiter_common::types::ComparisonMode;
    use serde_json::json;

    fn case(id: i64, order: i32, is_example: bool, expected: &str) -> TestCase {
        TestCase {
            id,
            problem_id: 5,
            input: vec![json!(id)],
            expected_output: expected.to_string(),
            comparison_mode: ComparisonMode::Exact,
            epsilon: None,
            time_limit_ms: 1000,
            memory_limit_kb: 65536,
            weight: None,
            order,
            is_example,
            is_hidden: !is_example,
            depends_on: None,
        }
    }

    async fn service(runtime: Arc<ScriptedRuntime>, work_root: &std::path::Path) -> (RunService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_test_cases(
                5,
                vec![
                    case(11, 2, true, "11"),
                    case(10, 1, true, "10"),
                    case(12, 3, false, "12"),
                ],
            )
            .await;

        let config = SandboxConfig {
            work_root: work_root.to_path_buf(),
            memory_ceiling_mb: 512,
            cpus: 1.0,
            pids_limit: 64,
            timeout_grace_ms: 500,
            compile_timeout_ms: 10_000,
        };
        let sandbox = SandboxExecutor::new(runtime, work_root).with_create_retry(RetryPolicy::none());
        let judge = Judge::new(sandbox, Arc::new(LanguageRegistry::builtin().unwrap()), config);
        let scratch = ScratchConfig {
            time_limit_ms: 2000,
            memory_limit_kb: 131072,
        };
        let test_cases: Arc<dyn TestCaseAccessor> = store.clone();
        (RunService::new(Arc::new(judge), test_cases, scratch), store)
    }

    /// Echoes the first input line, like `print(input())`
    fn echo() -> ScriptedRuntime {
        ScriptedRuntime::new(|inv| ScriptedRun::ok(inv.input.lines().next().unwrap_or("")))
    }

    #[tokio::test]
    async fn test_scratch_success_passes_raw_input() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(echo());
        let (service, _) = service(Arc::clone(&runtime), dir.path()).await;

        let result = service
            .run_scratch("print(input())", "python", "hello world\n")
            .await
            .unwrap();

        assert_eq!(result.status, ScratchStatus::Success);
        assert_eq!(result.output, "hello world");
        assert!(result.error_message.is_none());
        assert_eq!(runtime.invocations()[0].input, "hello world\n");
        assert_eq!(runtime.invocations()[0].files.len(), 1);
    }

    #[tokio::test]
    async fn test_scratch_classifies_failures() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::sequence(vec![
            ScriptedRun::exit(1, "Exception in thread \"main\" java.lang.ArithmeticException"),
            ScriptedRun::timeout(7000),
            ScriptedRun::oom(),
        ]));
        let (service, _) = service(Arc::clone(&runtime), dir.path()).await;

        let mut statuses = Vec::new();
        for _ in 0..3 {
            statuses.push(service.run_scratch("x", "java", "").await.unwrap().status);
        }
        assert_eq!(
            statuses,
            vec![
                ScratchStatus::RuntimeError,
                ScratchStatus::TimeLimitExceeded,
                ScratchStatus::MemoryLimitExceeded,
            ]
        );
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_scratch_build_failure_is_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(|_| ScriptedRun::ok("")).with_build(|_| {
            ScriptedRun::timeout(30_000)
        }));
        let (service, _) = service(Arc::clone(&runtime), dir.path()).await;

        let result = service.run_scratch("class Main {", "java", "").await.unwrap();
        assert_eq!(result.status, ScratchStatus::CompileError);
        assert_eq!(result.runtime_ms, 0);
        assert!(result.error_message.unwrap().contains("[Compilation timed out]"));
        assert_eq!(runtime.builds(), 1);
        assert_eq!(runtime.runs(), 0);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_scratch_unknown_language() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(Arc::new(echo()), dir.path()).await;
        let err = service.run_scratch("x", "brainfuck", "").await.unwrap_err();
        assert!(matches!(err, JudgeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_run_code_defaults_to_examples_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(echo());
        let (service, _) = service(Arc::clone(&runtime), dir.path()).await;

        let result = service
            .run_code(5, "python", "print(input())", None)
            .await
            .unwrap();

        assert_eq!(result.status, SubmissionStatus::Accepted);
        assert_eq!(result.total_test_cases, 2);
        let ids: Vec<_> = result.results.iter().map(|r| r.test_case_id).collect();
        assert_eq!(ids, vec![10, 11]);
        assert!(result.results.iter().all(|r| r.submission_id.is_none()));
    }

    #[tokio::test]
    async fn test_run_code_selected_ids() {
        let dir = tempfile::tempdir().unwrap();
        let (service, store) = service(Arc::new(echo()), dir.path()).await;

        let result = service
            .run_code(5, "python", "print(input())", Some(&[12]))
            .await
            .unwrap();
        assert_eq!(result.total_test_cases, 1);
        assert_eq!(result.results[0].test_case_id, 12);
        assert_eq!(store.save_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_code_rejects_foreign_ids() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(echo());
        let (service, _) = service(Arc::clone(&runtime), dir.path()).await;

        let err = service
            .run_code(5, "python", "print(input())", Some(&[10, 99]))
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeError::Validation(msg) if msg.contains("99")));
        assert_eq!(runtime.creates(), 0);
    }

    #[tokio::test]
    async fn test_run_code_wrong_answer_reports_results() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::sequence(vec![ScriptedRun::ok("nope")]));
        let (service, _) = service(Arc::clone(&runtime), dir.path()).await;

        let result = service.run_code(5, "cpp", "int main(){}", None).await.unwrap();
        assert_eq!(result.status, SubmissionStatus::WrongAnswer);
        assert_eq!(result.passed_test_cases, 0);
        assert_eq!(result.results.len(), 1);
        assert_eq!(runtime.runs(), 1);
    }
}
