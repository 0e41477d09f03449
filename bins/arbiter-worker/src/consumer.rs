/// Queue Consumer - one judging job per message
///
/// **Delivery contract:**
/// - At-least-once: a message is acknowledged only after its verdict is stored
/// - Redelivery of an already-judged submission is acknowledged untouched
/// - Transient failures leave the message unacknowledged so the queue
///   redelivers it; on the last allowed delivery the submission is marked
///   SYSTEM_ERROR and the message dead-lettered
/// - Deterministic failures (unknown language, bad signature, no tests)
///   mark SYSTEM_ERROR immediately and acknowledge
use std::sync::Arc;
use std::time::{Duration, Instant};

use arbiter_common::accessor::{ProblemSignatureAccessor, SubmissionAccessor, TestCaseAccessor};
use arbiter_common::queue::{JobQueue, QueueMessage};
use arbiter_common::retry::RetryPolicy;
use arbiter_common::types::{JudgeJob, Submission, SubmissionId, SubmissionStatus};
use arbiter_common::{StoreError, StoreResult};
use arbiter_judge::evaluator::Verdict;
use arbiter_judge::{Judge, JudgeError, JudgeRequest, ProgramMode};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Judged and stored; message acknowledged
    Judged(SubmissionStatus),
    /// Submission was already terminal; message acknowledged
    AlreadyJudged,
    /// Marked SYSTEM_ERROR; message acknowledged
    Failed,
    /// Moved to the dead-letter list
    DeadLettered,
    /// Left unacknowledged for redelivery
    Retry,
}

pub struct Consumer {
    queue: Arc<dyn JobQueue>,
    submissions: Arc<dyn SubmissionAccessor>,
    test_cases: Arc<dyn TestCaseAccessor>,
    signatures: Arc<dyn ProblemSignatureAccessor>,
    judge: Arc<Judge>,
    lookup_retry: RetryPolicy,
    poll_timeout: Duration,
    max_receives: u32,
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        submissions: Arc<dyn SubmissionAccessor>,
        test_cases: Arc<dyn TestCaseAccessor>,
        signatures: Arc<dyn ProblemSignatureAccessor>,
        judge: Arc<Judge>,
        lookup_retry: RetryPolicy,
        poll_timeout: Duration,
        max_receives: u32,
    ) -> Self {
        Self {
            queue,
            submissions,
            test_cases,
            signatures,
            judge,
            lookup_retry,
            poll_timeout,
            max_receives,
        }
    }

    /// Poll and process messages until `shutdown` is cancelled.
    ///
    /// A job already being judged when shutdown arrives runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(poll_timeout_secs = self.poll_timeout.as_secs(), "Consumer loop started");
        let mut last_recovery: Option<Instant> = None;

        loop {
            if last_recovery.map_or(true, |at| at.elapsed() >= self.poll_timeout) {
                match self.queue.recover_expired().await {
                    Ok(0) => {}
                    Ok(moved) => warn!(moved, "Recovered expired in-flight messages"),
                    Err(e) => warn!(error = %e, "Failed to recover expired messages"),
                }
                last_recovery = Some(Instant::now());
            }

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(self.poll_timeout) => received,
            };

            match received {
                Ok(Some(message)) => {
                    let outcome = self.handle_message(&message).await;
                    debug!(message_id = %message.message_id, outcome = ?outcome, "Message handled");
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "Queue receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!("Consumer loop stopped");
    }

    /// Process one delivered message and settle it with the queue
    #[instrument(
        skip(self, message),
        fields(message_id = %message.message_id, receive_count = message.receive_count)
    )]
    pub async fn handle_message(&self, message: &QueueMessage) -> MessageOutcome {
        let job: JudgeJob = match serde_json::from_str(&message.body) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Malformed job body");
                return self
                    .dead_letter(message, &format!("Malformed job body: {}", e))
                    .await;
            }
        };

        info!(
            submission_id = job.submission_id,
            problem_id = job.problem_id,
            language = %job.language,
            source_size = job.source_code.len(),
            "Received job"
        );

        let start = Instant::now();
        match self.process(&job).await {
            Ok(outcome) => {
                info!(
                    submission_id = job.submission_id,
                    outcome = ?outcome,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Job finished"
                );
                self.ack(message, outcome).await
            }
            Err(JudgeError::Store(e)) if e.is_not_found() => {
                error!(submission_id = job.submission_id, "Submission never became visible");
                self.dead_letter(message, &e.to_string()).await
            }
            Err(e) if e.is_transient() && message.receive_count < self.max_receives => {
                warn!(
                    submission_id = job.submission_id,
                    error = %e,
                    max_receives = self.max_receives,
                    "Transient failure, leaving message for redelivery"
                );
                MessageOutcome::Retry
            }
            Err(e) => {
                error!(submission_id = job.submission_id, error = %e, "Judging failed");
                if let Err(store_err) = self.mark_system_error(job.submission_id, &e.to_string()).await {
                    error!(
                        submission_id = job.submission_id,
                        error = %store_err,
                        "Failed to record system error"
                    );
                    return MessageOutcome::Retry;
                }
                if e.is_transient() {
                    self.dead_letter(message, &e.to_string()).await
                } else {
                    self.ack(message, MessageOutcome::Failed).await
                }
            }
        }
    }

    async fn process(&self, job: &JudgeJob) -> Result<MessageOutcome, JudgeError> {
        let mut submission = self.load_submission(job.submission_id).await?;
        if submission.status.is_terminal() {
            info!(
                submission_id = submission.id,
                status = %submission.status,
                "Submission already judged, skipping"
            );
            return Ok(MessageOutcome::AlreadyJudged);
        }

        transition(&mut submission, SubmissionStatus::Processing)?;
        self.submissions.save(&submission).await?;

        let test_cases = self
            .test_cases
            .list_by_problem_ordered(submission.problem_id)
            .await?;
        let signature = self
            .signatures
            .get_function_signature(submission.problem_id, &submission.language)
            .await?;
        let mode = match &signature {
            Some(signature) => ProgramMode::Harness(signature),
            None => {
                warn!(
                    problem_id = submission.problem_id,
                    language = %submission.language,
                    "No function signature, judging as a whole program"
                );
                ProgramMode::WholeProgram
            }
        };

        let request = JudgeRequest {
            problem_id: submission.problem_id,
            submission_id: Some(submission.id),
            language: &submission.language,
            source_code: &submission.source_code,
            mode,
        };
        let verdict = self.judge.judge(request, &test_cases).await?;
        let status = verdict.status;

        if self.store_verdict(submission.id, verdict).await? {
            Ok(MessageOutcome::Judged(status))
        } else {
            Ok(MessageOutcome::AlreadyJudged)
        }
    }

    /// Submission lookup tolerating read-after-write lag at intake
    async fn load_submission(&self, id: SubmissionId) -> StoreResult<Submission> {
        self.lookup_retry
            .run(
                "submission_lookup",
                || async move {
                    self.submissions
                        .get_by_id(id)
                        .await?
                        .ok_or_else(|| StoreError::NotFound(format!("Submission {}", id)))
                },
                |_| true,
            )
            .await
    }

    /// Reload and apply a verdict; `false` when another writer already finished the row
    async fn store_verdict(&self, id: SubmissionId, verdict: Verdict) -> StoreResult<bool> {
        let mut latest = self.load_submission(id).await?;
        if latest.status.is_terminal() {
            warn!(submission_id = id, status = %latest.status, "Submission finished elsewhere, dropping verdict");
            return Ok(false);
        }

        self.submissions.save_test_results(id, &verdict.results).await?;

        transition(&mut latest, verdict.status)?;
        latest.runtime_ms = verdict.runtime_ms;
        latest.memory_kb = verdict.memory_kb;
        latest.passed_test_cases = verdict.passed_test_cases;
        latest.total_test_cases = verdict.total_test_cases;
        latest.score = verdict.score;
        latest.compile_error = verdict.compile_error;
        latest.error_message = None;
        latest.completed_at = Some(Utc::now());
        self.submissions.save(&latest).await?;

        info!(
            submission_id = id,
            status = %latest.status,
            passed = latest.passed_test_cases,
            total = latest.total_test_cases,
            score = latest.score,
            "Verdict stored"
        );
        Ok(true)
    }

    async fn mark_system_error(&self, id: SubmissionId, message: &str) -> StoreResult<()> {
        let Some(mut latest) = self.submissions.get_by_id(id).await? else {
            return Ok(());
        };
        if latest.status.is_terminal() {
            return Ok(());
        }
        transition(&mut latest, SubmissionStatus::SystemError)?;
        latest.error_message = Some(message.to_string());
        latest.completed_at = Some(Utc::now());
        self.submissions.save(&latest).await
    }

    async fn ack(&self, message: &QueueMessage, outcome: MessageOutcome) -> MessageOutcome {
        match self.queue.ack(message).await {
            Ok(()) => outcome,
            Err(e) => {
                error!(error = %e, "Failed to acknowledge message");
                MessageOutcome::Retry
            }
        }
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> MessageOutcome {
        match self.queue.dead_letter(message, reason).await {
            Ok(()) => MessageOutcome::DeadLettered,
            Err(e) => {
                error!(error = %e, "Failed to dead-letter message");
                MessageOutcome::Retry
            }
        }
    }
}

fn transition(submission: &mut Submission, next: SubmissionStatus) -> StoreResult<()> {
    if !submission.status.can_transition_to(next) {
        return Err(StoreError::InvalidTransition {
            id: submission.id,
            from: submission.status,
            to: next,
        });
    }
    submission.status = next;
    Ok(())
}
