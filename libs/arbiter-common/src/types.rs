use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type SubmissionId = i64;
pub type ProblemId = i64;
pub type UserId = i64;
pub type TestCaseId = i64;

/// Default per-test time limit when a test case does not declare one
pub const DEFAULT_TIME_LIMIT_MS: u64 = 2000;
/// Default per-test memory limit (256 MiB) when a test case does not declare one
pub const DEFAULT_MEMORY_LIMIT_KB: u64 = 256 * 1024;
/// Tolerance used by FLOAT comparison when the test case leaves epsilon unset
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Lifecycle of a submission.
///
/// `Pending -> Processing -> <terminal>`. Every terminal state is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Processing,
    Accepted,
    WrongAnswer,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    SystemError,
}

impl SubmissionStatus {
    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Pending,
        Self::Processing,
        Self::Accepted,
        Self::WrongAnswer,
        Self::CompileError,
        Self::RuntimeError,
        Self::TimeLimitExceeded,
        Self::MemoryLimitExceeded,
        Self::SystemError,
    ];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// `Processing -> Processing` is allowed so that a redelivered job whose
    /// previous attempt died mid-pass can be judged again.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Processing => next != Self::Pending,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Accepted => "ACCEPTED",
            Self::WrongAnswer => "WRONG_ANSWER",
            Self::CompileError => "COMPILE_ERROR",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            Self::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            Self::SystemError => "SYSTEM_ERROR",
        }
    }
}

impl Default for SubmissionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid submission status '{}'", s))
    }
}

/// Outcome of a single test case within one judging pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestCaseStatus {
    Passed,
    Failed,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    CompileError,
    SystemError,
}

impl TestCaseStatus {
    /// Submission verdict implied by a test case that ended the pass.
    ///
    /// A plain output mismatch maps to `WrongAnswer`.
    pub fn verdict(&self) -> SubmissionStatus {
        match self {
            Self::Passed => SubmissionStatus::Accepted,
            Self::Failed => SubmissionStatus::WrongAnswer,
            Self::RuntimeError => SubmissionStatus::RuntimeError,
            Self::TimeLimitExceeded => SubmissionStatus::TimeLimitExceeded,
            Self::MemoryLimitExceeded => SubmissionStatus::MemoryLimitExceeded,
            Self::CompileError => SubmissionStatus::CompileError,
            Self::SystemError => SubmissionStatus::SystemError,
        }
    }
}

/// How a test case's actual output is checked against the expected output
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonMode {
    #[default]
    Exact,
    Float,
    IgnoreWhitespace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: SubmissionId,
    pub problem_id: ProblemId,
    pub user_id: UserId,
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub status: SubmissionStatus,
    #[serde(default)]
    pub runtime_ms: Option<u64>,
    #[serde(default)]
    pub memory_kb: Option<u64>,
    #[serde(default)]
    pub passed_test_cases: u32,
    #[serde(default)]
    pub total_test_cases: u32,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub compile_error: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub queue_message_id: Option<String>,
}

impl Submission {
    /// A freshly admitted submission in `Pending`
    pub fn new(
        id: SubmissionId,
        problem_id: ProblemId,
        user_id: UserId,
        language: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            problem_id,
            user_id,
            language: language.into(),
            source_code: source_code.into(),
            status: SubmissionStatus::Pending,
            runtime_ms: None,
            memory_kb: None,
            passed_test_cases: 0,
            total_test_cases: 0,
            score: 0.0,
            compile_error: None,
            error_message: None,
            submitted_at: Utc::now(),
            completed_at: None,
            queue_message_id: None,
        }
    }
}

fn default_time_limit_ms() -> u64 {
    DEFAULT_TIME_LIMIT_MS
}

fn default_memory_limit_kb() -> u64 {
    DEFAULT_MEMORY_LIMIT_KB
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: TestCaseId,
    pub problem_id: ProblemId,
    /// Ordered, language-agnostic parameter values (one per function parameter)
    pub input: Vec<serde_json::Value>,
    pub expected_output: String,
    #[serde(default)]
    pub comparison_mode: ComparisonMode,
    #[serde(default)]
    pub epsilon: Option<f64>,
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: u64,
    #[serde(default = "default_memory_limit_kb")]
    pub memory_limit_kb: u64,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub is_example: bool,
    #[serde(default)]
    pub is_hidden: bool,
    /// Declared but not consulted when judging
    #[serde(default)]
    pub depends_on: Option<TestCaseId>,
}

impl TestCase {
    pub fn weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon.unwrap_or(DEFAULT_EPSILON)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub submission_id: Option<SubmissionId>,
    pub test_case_id: TestCaseId,
    pub status: TestCaseStatus,
    pub runtime_ms: u64,
    pub memory_kb: u64,
    pub output: String,
    pub error_message: Option<String>,
    pub score: f64,
}

/// Callable entry point of a problem for one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSignature {
    pub function_name: String,
    pub parameter_types: Vec<String>,
    pub return_type: String,
}

/// Queue job message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeJob {
    pub submission_id: SubmissionId,
    pub problem_id: ProblemId,
    pub user_id: UserId,
    pub language: String,
    pub source_code: String,
}

impl From<&Submission> for JudgeJob {
    fn from(submission: &Submission) -> Self {
        Self {
            submission_id: submission.id,
            problem_id: submission.problem_id,
            user_id: submission.user_id,
            language: submission.language.clone(),
            source_code: submission.source_code.clone(),
        }
    }
}
