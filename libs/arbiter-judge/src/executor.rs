/// Judge - High-Level Orchestration
///
/// **Responsibility:**
/// Drive a submission's test cases through the sandbox and the evaluator,
/// in declared order, and produce one verdict.
///
/// **Architecture:**
/// 1. Resolve the language through the registry (config.rs)
/// 2. Build program files once: a generated harness, or the user's whole program
/// 3. Compile once when the language has a build step (engine.rs)
/// 4. Run each test against the built program in the sandbox executor
/// 5. Score each outcome and aggregate (evaluator.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How scoring works (evaluator's job)
/// - Where submissions and test cases are stored (caller's job)
use std::sync::Arc;

use arbiter_common::config::SandboxConfig;
use arbiter_common::encoding::{encode_input, encode_value};
use arbiter_common::types::{FunctionSignature, ProblemId, SubmissionId, TestCase, TestCaseStatus};
use tracing::{info, warn};

use crate::config::{LanguageConfig, LanguageRegistry};
use crate::engine::{Build, ExecutionLimits, ProgramFile, SandboxExecutor};
use crate::error::JudgeError;
use crate::evaluator::{aggregate_results, effective_time_limit_ms, evaluate_test, Verdict};
use crate::harness::{self, HarnessPlan};

/// How the user's code becomes a runnable program
#[derive(Debug, Clone, Copy)]
pub enum ProgramMode<'a> {
    /// Generated driver calls the user's function
    Harness(&'a FunctionSignature),
    /// User code is the entire program
    WholeProgram,
}

/// One judging pass
#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    pub problem_id: ProblemId,
    /// Stamped on results; `None` for unpersisted runs
    pub submission_id: Option<SubmissionId>,
    pub language: &'a str,
    pub source_code: &'a str,
    pub mode: ProgramMode<'a>,
}

pub struct Judge {
    sandbox: SandboxExecutor,
    registry: Arc<LanguageRegistry>,
    config: SandboxConfig,
}

impl Judge {
    pub fn new(sandbox: SandboxExecutor, registry: Arc<LanguageRegistry>, config: SandboxConfig) -> Self {
        Self {
            sandbox,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn sandbox(&self) -> &SandboxExecutor {
        &self.sandbox
    }

    /// Limits for one run: the judged limit plus the grace period as the hard deadline
    pub fn limits_for(&self, judged_time_limit_ms: u64) -> ExecutionLimits {
        ExecutionLimits::from_config(
            &self.config,
            judged_time_limit_ms.saturating_add(self.config.timeout_grace_ms),
        )
    }

    /// Judge `test_cases` strictly in the given order.
    ///
    /// **Policy:**
    /// - Compiled languages build once before any test runs; a failed build
    ///   ends the pass with `COMPILE_ERROR` and no test case results
    /// - A compile-classified failure on the first test (interpreted
    ///   languages) ends the pass the same way
    /// - The first non-passing test ends the pass (early stop)
    /// - Infrastructure failures are returned as errors, never as verdicts
    #[tracing::instrument(
        skip_all,
        fields(
            problem_id = request.problem_id,
            submission_id = ?request.submission_id,
            language = %request.language,
            test_count = test_cases.len()
        )
    )]
    pub async fn judge(&self, request: JudgeRequest<'_>, test_cases: &[TestCase]) -> Result<Verdict, JudgeError> {
        let language = self.registry.get(request.language)?;
        let Some(first) = test_cases.first() else {
            return Err(JudgeError::NoTestCases(request.problem_id));
        };

        let (files, plan) = self.program_files(language, &request, first)?;
        let total = test_cases.len() as u32;

        let build_limits = self.limits_for(effective_time_limit_ms(first, language.time_multiplier));
        let program = match self.sandbox.prepare(language, &files, &build_limits).await? {
            Build::Ready(program) => program,
            Build::Failed(outcome) => {
                warn!("Compilation failed");
                return Ok(Verdict::compile_error(total, &outcome.stderr));
            }
        };

        let mut results = Vec::with_capacity(test_cases.len());

        for (index, test_case) in test_cases.iter().enumerate() {
            if let Some(plan) = &plan {
                plan.check_arity(test_case.input.len())?;
            }
            let input = encode_input(&test_case.input)?;
            let time_limit_ms = effective_time_limit_ms(test_case, language.time_multiplier);

            let outcome = self
                .sandbox
                .run_prepared(language, &program, &input, &self.limits_for(time_limit_ms))
                .await?;

            if index == 0 && outcome.is_compile_failure() {
                warn!(test_case_id = test_case.id, "Compilation failed on first test case");
                return Ok(Verdict::compile_error(total, &outcome.stderr));
            }

            let result = evaluate_test(&outcome, test_case, time_limit_ms, request.submission_id);
            info!(
                test_case_id = test_case.id,
                status = ?result.status,
                runtime_ms = result.runtime_ms,
                memory_kb = result.memory_kb,
                "Test case judged"
            );

            let passed = result.status == TestCaseStatus::Passed;
            results.push(result);
            if !passed {
                break;
            }
        }

        let verdict = aggregate_results(results, total);
        info!(
            status = %verdict.status,
            passed = verdict.passed_test_cases,
            total = verdict.total_test_cases,
            score = verdict.score,
            "Judging complete"
        );
        Ok(verdict)
    }

    fn program_files(
        &self,
        language: &LanguageConfig,
        request: &JudgeRequest<'_>,
        first: &TestCase,
    ) -> Result<(Vec<ProgramFile>, Option<HarnessPlan>), JudgeError> {
        match request.mode {
            ProgramMode::Harness(signature) => {
                let encodings = first
                    .input
                    .iter()
                    .map(encode_value)
                    .collect::<Result<Vec<_>, _>>()?;
                let driver = harness::generate(language, signature, &encodings)?;
                let plan = HarnessPlan::from_signature(signature)?;
                Ok((
                    harness::harness_files(language, driver, request.source_code),
                    Some(plan),
                ))
            }
            ProgramMode::WholeProgram => Ok((
                harness::whole_program_files(language, request.source_code),
                None,
            )),
        }
    }
}
