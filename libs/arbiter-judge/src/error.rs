use arbiter_common::encoding::EncodingError;
use arbiter_common::types::ProblemId;
use arbiter_common::StoreError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HarnessError {
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Invalid function name '{0}'")]
    InvalidFunctionName(String),

    #[error("Signature declares {expected} parameters but the test case provides {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Template error: {0}")]
    Template(String),
}

impl From<EncodingError> for HarnessError {
    fn from(err: EncodingError) -> Self {
        match err {
            EncodingError::UnsupportedType(name) => HarnessError::UnsupportedType(name),
            other => HarnessError::UnsupportedType(other.to_string()),
        }
    }
}

/// Failures of the sandbox itself, never of the program inside it
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("{what} exceeds maximum size of {limit} bytes")]
    InputTooLarge { what: &'static str, limit: usize },

    #[error("Sandbox filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Unreadable memory report '{0}'")]
    MemoryReport(String),
}

#[derive(Debug, Error)]
pub enum JudgeError {
    /// Unknown or unsupported language
    #[error("{0}")]
    Validation(String),

    #[error("Harness generation failed: {0}")]
    Harness(#[from] HarnessError),

    #[error("Invalid test case input: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Problem {0} has no test cases to run")]
    NoTestCases(ProblemId),
}

impl JudgeError {
    /// Infrastructure failures that may succeed on a later delivery
    pub fn is_transient(&self) -> bool {
        match self {
            JudgeError::Sandbox(SandboxError::Io(_)) | JudgeError::Sandbox(SandboxError::Runtime(_)) => {
                true
            }
            JudgeError::Store(StoreError::Redis(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_common::types::SubmissionStatus;

    #[test]
    fn test_transient_classification() {
        assert!(JudgeError::Sandbox(SandboxError::Runtime("daemon gone".into())).is_transient());
        assert!(!JudgeError::Validation("Unsupported language: cobol".into()).is_transient());
        assert!(!JudgeError::Harness(HarnessError::UnsupportedType("map".into())).is_transient());
        assert!(!JudgeError::Sandbox(SandboxError::InputTooLarge {
            what: "Source code",
            limit: 1
        })
        .is_transient());
        assert!(!JudgeError::Store(StoreError::NotFound("submission 1".into())).is_transient());
        assert!(!JudgeError::Store(StoreError::InvalidTransition {
            id: 1,
            from: SubmissionStatus::Accepted,
            to: SubmissionStatus::Processing,
        })
        .is_transient());
    }

    #[test]
    fn test_encoding_error_maps_to_unsupported_type() {
        let err: HarnessError = EncodingError::UnsupportedType("map<int,int>".into()).into();
        assert_eq!(err, HarnessError::UnsupportedType("map<int,int>".into()));
    }
}
