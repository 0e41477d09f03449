//! Narrow collaborator interfaces owned by the CRUD layers outside the judge.

use crate::error::StoreResult;
use crate::types::{
    FunctionSignature, ProblemId, Submission, SubmissionId, TestCase, TestCaseResult,
};
use async_trait::async_trait;

#[async_trait]
pub trait SubmissionAccessor: Send + Sync {
    async fn get_by_id(&self, id: SubmissionId) -> StoreResult<Option<Submission>>;

    /// Allocate a fresh submission id for intake
    async fn next_id(&self) -> StoreResult<SubmissionId>;

    async fn save(&self, submission: &Submission) -> StoreResult<()>;

    /// Replace the stored test case results of a judging pass
    async fn save_test_results(
        &self,
        submission_id: SubmissionId,
        results: &[TestCaseResult],
    ) -> StoreResult<()>;

    async fn get_test_results(&self, submission_id: SubmissionId) -> StoreResult<Vec<TestCaseResult>>;
}

#[async_trait]
pub trait TestCaseAccessor: Send + Sync {
    /// Test cases of a problem in declared order
    async fn list_by_problem_ordered(&self, problem_id: ProblemId) -> StoreResult<Vec<TestCase>>;

    async fn count_by_problem(&self, problem_id: ProblemId) -> StoreResult<u32>;
}

#[async_trait]
pub trait ProblemSignatureAccessor: Send + Sync {
    async fn get_function_signature(
        &self,
        problem_id: ProblemId,
        language: &str,
    ) -> StoreResult<Option<FunctionSignature>>;
}

/// Sort test cases by declared order, breaking ties by id
pub fn sort_declared(test_cases: &mut [TestCase]) {
    test_cases.sort_by_key(|tc| (tc.order, tc.id));
}
