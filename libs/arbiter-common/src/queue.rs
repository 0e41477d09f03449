//! Job queue seam with at-least-once delivery.
//!
//! A received message stays invisible to other consumers until it is
//! acknowledged. Unacknowledged messages come back after the visibility
//! timeout and are dead-lettered once their receive budget is spent.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::accessor::SubmissionAccessor;
use crate::error::StoreResult;
use crate::types::{JudgeJob, Submission};

/// Wire envelope around a job body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_id: String,
    pub body: String,
}

/// A delivered message, valid until acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    /// How many times this message has been handed out, this delivery included
    pub receive_count: u32,
    /// Opaque token the queue uses to find the in-flight entry again
    pub receipt: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Push a job body under a caller-chosen message id
    async fn enqueue(&self, message_id: &str, body: &str) -> StoreResult<()>;

    /// Wait up to `wait` for one message
    async fn receive(&self, wait: Duration) -> StoreResult<Option<QueueMessage>>;

    /// Remove a processed message for good
    async fn ack(&self, message: &QueueMessage) -> StoreResult<()>;

    /// Move a message that can never be processed to the dead-letter list
    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> StoreResult<()>;

    /// Return expired in-flight messages to the queue; returns how many moved
    async fn recover_expired(&self) -> StoreResult<usize> {
        Ok(0)
    }
}

/// Admit a submission to the judging queue.
///
/// The correlation id is saved on the submission before the push, so a
/// worker never races the intake write for the same row.
pub async fn enqueue_submission(
    queue: &dyn JobQueue,
    submissions: &dyn SubmissionAccessor,
    submission: &mut Submission,
) -> StoreResult<String> {
    let message_id = Uuid::new_v4().to_string();
    let body = serde_json::to_string(&JudgeJob::from(&*submission))?;

    submission.queue_message_id = Some(message_id.clone());
    submissions.save(submission).await?;
    queue.enqueue(&message_id, &body).await?;

    info!(
        submission_id = submission.id,
        message_id = %message_id,
        language = %submission.language,
        "Submission enqueued"
    );
    Ok(message_id)
}
