//! In-process accessor and queue implementations.
//!
//! Used by tests across the workspace and for running the judge without Redis.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::accessor::{sort_declared, ProblemSignatureAccessor, SubmissionAccessor, TestCaseAccessor};
use crate::error::StoreResult;
use crate::queue::{JobQueue, QueueMessage};
use crate::types::{
    FunctionSignature, ProblemId, Submission, SubmissionId, TestCase, TestCaseResult,
};

#[derive(Default)]
struct StoreState {
    submissions: HashMap<SubmissionId, Submission>,
    results: HashMap<SubmissionId, Vec<TestCaseResult>>,
    test_cases: HashMap<ProblemId, Vec<TestCase>>,
    signatures: HashMap<(ProblemId, String), FunctionSignature>,
    last_id: SubmissionId,
    saves: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_submission(&self, submission: Submission) {
        self.state
            .lock()
            .await
            .submissions
            .insert(submission.id, submission);
    }

    pub async fn insert_test_cases(&self, problem_id: ProblemId, test_cases: Vec<TestCase>) {
        self.state.lock().await.test_cases.insert(problem_id, test_cases);
    }

    pub async fn insert_signature(&self, problem_id: ProblemId, language: &str, signature: FunctionSignature) {
        self.state
            .lock()
            .await
            .signatures
            .insert((problem_id, language.to_lowercase()), signature);
    }

    /// Number of `save` calls observed, for asserting no-op paths
    pub async fn save_count(&self) -> usize {
        self.state.lock().await.saves
    }
}

#[async_trait]
impl SubmissionAccessor for MemoryStore {
    async fn get_by_id(&self, id: SubmissionId) -> StoreResult<Option<Submission>> {
        Ok(self.state.lock().await.submissions.get(&id).cloned())
    }

    async fn next_id(&self) -> StoreResult<SubmissionId> {
        let mut state = self.state.lock().await;
        let highest = state.submissions.keys().copied().max().unwrap_or(0);
        state.last_id = state.last_id.max(highest) + 1;
        Ok(state.last_id)
    }

    async fn save(&self, submission: &Submission) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.saves += 1;
        state.submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn save_test_results(
        &self,
        submission_id: SubmissionId,
        results: &[TestCaseResult],
    ) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .results
            .insert(submission_id, results.to_vec());
        Ok(())
    }

    async fn get_test_results(&self, submission_id: SubmissionId) -> StoreResult<Vec<TestCaseResult>> {
        Ok(self
            .state
            .lock()
            .await
            .results
            .get(&submission_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TestCaseAccessor for MemoryStore {
    async fn list_by_problem_ordered(&self, problem_id: ProblemId) -> StoreResult<Vec<TestCase>> {
        let mut test_cases = self
            .state
            .lock()
            .await
            .test_cases
            .get(&problem_id)
            .cloned()
            .unwrap_or_default();
        sort_declared(&mut test_cases);
        Ok(test_cases)
    }

    async fn count_by_problem(&self, problem_id: ProblemId) -> StoreResult<u32> {
        Ok(self
            .state
            .lock()
            .await
            .test_cases
            .get(&problem_id)
            .map(|tcs| tcs.len() as u32)
            .unwrap_or(0))
    }
}

#[async_trait]
impl ProblemSignatureAccessor for MemoryStore {
    async fn get_function_signature(
        &self,
        problem_id: ProblemId,
        language: &str,
    ) -> StoreResult<Option<FunctionSignature>> {
        Ok(self
            .state
            .lock()
            .await
            .signatures
            .get(&(problem_id, language.to_lowercase()))
            .cloned())
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(String, String)>,
    in_flight: HashMap<String, QueueMessage>,
    receives: HashMap<String, u32>,
    acked: Vec<String>,
    dead: Vec<(QueueMessage, String)>,
}

/// FIFO queue without visibility timeouts; `redeliver_unacked` stands in for expiry
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every in-flight message visible again
    pub async fn redeliver_unacked(&self) -> usize {
        let mut state = self.state.lock().await;
        let in_flight: Vec<QueueMessage> = state.in_flight.drain().map(|(_, m)| m).collect();
        let moved = in_flight.len();
        for message in in_flight {
            state.ready.push_back((message.message_id, message.body));
        }
        drop(state);
        self.notify.notify_waiters();
        moved
    }

    pub async fn acked(&self) -> Vec<String> {
        self.state.lock().await.acked.clone()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn dead_letters(&self) -> Vec<(QueueMessage, String)> {
        self.state.lock().await.dead.clone()
    }

    pub async fn ready(&self) -> usize {
        self.state.lock().await.ready.len()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, message_id: &str, body: &str) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .ready
            .push_back((message_id.to_string(), body.to_string()));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> StoreResult<Option<QueueMessage>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some((message_id, body)) = state.ready.pop_front() {
                    let count = state.receives.entry(message_id.clone()).or_insert(0);
                    *count += 1;
                    let message = QueueMessage {
                        receipt: format!("{}#{}", message_id, count),
                        message_id: message_id.clone(),
                        body,
                        receive_count: *count,
                    };
                    state.in_flight.insert(message.receipt.clone(), message.clone());
                    return Ok(Some(message));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, message: &QueueMessage) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(&message.receipt).is_some() {
            state.acked.push(message.message_id.clone());
        }
        Ok(())
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(&message.receipt).is_some() {
            state.dead.push((message.clone(), reason.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::enqueue_submission;

    #[tokio::test]
    async fn test_memory_queue_redelivers_unacked() {
        let queue = MemoryQueue::new();
        queue.enqueue("m1", "body").await.unwrap();

        let first = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.receive_count, 1);
        assert!(queue.receive(Duration::from_millis(10)).await.unwrap().is_none());

        assert_eq!(queue.redeliver_unacked().await, 1);
        let second = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.message_id, "m1");
        assert_eq!(second.receive_count, 2);

        queue.ack(&second).await.unwrap();
        assert_eq!(queue.in_flight().await, 0);
        assert_eq!(queue.acked().await, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_ack_leaves_redelivery_in_flight() {
        let queue = MemoryQueue::new();
        queue.enqueue("m1", "body").await.unwrap();

        let first = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        queue.redeliver_unacked().await;
        let second = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();

        queue.ack(&first).await.unwrap();
        assert_eq!(queue.in_flight().await, 1);
        assert!(queue.acked().await.is_empty());

        queue.dead_letter(&first, "late").await.unwrap();
        assert!(queue.dead_letters().await.is_empty());

        queue.ack(&second).await.unwrap();
        assert_eq!(queue.in_flight().await, 0);
        assert_eq!(queue.acked().await, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_enqueue_submission_stamps_message_id() {
        let queue = MemoryQueue::new();
        let store = MemoryStore::new();
        let mut submission = Submission::new(1, 10, 100, "python", "print(1)");

        let message_id = enqueue_submission(&queue, &store, &mut submission).await.unwrap();

        let stored = store.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(stored.queue_message_id.as_deref(), Some(message_id.as_str()));

        let message = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        let job: crate::types::JudgeJob = serde_json::from_str(&message.body).unwrap();
        assert_eq!(job.submission_id, 1);
        assert_eq!(job.problem_id, 10);
        assert_eq!(job.source_code, "print(1)");
    }

    #[tokio::test]
    async fn test_next_id_skips_inserted_submissions() {
        let store = MemoryStore::new();
        assert_eq!(store.next_id().await.unwrap(), 1);

        store.insert_submission(Submission::new(10, 1, 1, "python", "")).await;
        assert_eq!(store.next_id().await.unwrap(), 11);
        assert_eq!(store.next_id().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_test_cases_listed_in_declared_order() {
        let store = MemoryStore::new();
        let make = |id, order| TestCase {
            id,
            problem_id: 1,
            input: vec![],
            expected_output: String::new(),
            comparison_mode: Default::default(),
            epsilon: None,
            time_limit_ms: 1000,
            memory_limit_kb: 1024,
            weight: None,
            order,
            is_example: false,
            is_hidden: false,
            depends_on: None,
        };
        store
            .insert_test_cases(1, vec![make(3, 2), make(1, 1), make(2, 1)])
            .await;

        let ids: Vec<_> = store
            .list_by_problem_ordered(1)
            .await
            .unwrap()
            .iter()
            .map(|tc| tc.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.count_by_problem(1).await.unwrap(), 3);
        assert_eq!(store.count_by_problem(2).await.unwrap(), 0);
    }
}
