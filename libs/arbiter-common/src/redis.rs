use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::accessor::{sort_declared, ProblemSignatureAccessor, SubmissionAccessor, TestCaseAccessor};
use crate::error::StoreResult;
use crate::queue::{Envelope, JobQueue, QueueMessage};
use serde::{Deserialize, Serialize};
use crate::types::{
    FunctionSignature, ProblemId, Submission, SubmissionId, TestCase, TestCaseResult,
};

// Redis key layout

pub const SUBMISSION_PREFIX: &str = "arbiter:submission";
pub const PROBLEM_PREFIX: &str = "arbiter:problem";

pub fn submission_id_counter_key() -> String {
    format!("{}:next_id", SUBMISSION_PREFIX)
}

pub fn submission_key(id: SubmissionId) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, id)
}

pub fn results_key(id: SubmissionId) -> String {
    format!("{}:{}:results", SUBMISSION_PREFIX, id)
}

pub fn test_cases_key(problem_id: ProblemId) -> String {
    format!("{}:{}:testcases", PROBLEM_PREFIX, problem_id)
}

pub fn signature_key(problem_id: ProblemId, language: &str) -> String {
    format!("{}:{}:signature:{}", PROBLEM_PREFIX, problem_id, language.to_lowercase())
}

pub fn processing_key(queue: &str) -> String {
    format!("{}:processing", queue)
}

pub fn dead_letter_key(queue: &str) -> String {
    format!("{}:dead", queue)
}

pub fn receives_key(queue: &str) -> String {
    format!("{}:receives", queue)
}

pub fn deadlines_key(queue: &str) -> String {
    format!("{}:deadlines", queue)
}

pub fn deliveries_key(queue: &str) -> String {
    format!("{}:deliveries", queue)
}

/// Removes an in-flight entry only while `token` is still the message's current delivery.
///
/// KEYS: processing list, deliveries hash. ARGV: entry, message id, token.
const CLAIM_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[2], ARGV[2]) ~= ARGV[3] then
  return 0
end
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 then
  redis.call('HDEL', KEYS[2], ARGV[2])
end
return removed
"#;

/// What a consumer holds for one delivery
#[derive(Debug, Serialize, Deserialize)]
struct Receipt {
    token: String,
    entry: String,
}

/// Reliable list queue.
///
/// `BLMOVE` hands a message from the ready list to the processing list
/// atomically; receive counts, visibility deadlines and the current
/// delivery token live in hashes keyed by message id. Acks and
/// dead-letters carry the token, so a consumer whose delivery expired
/// cannot remove the entry of a later delivery.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    name: String,
    visibility_timeout: Duration,
    max_receives: u32,
}

impl RedisQueue {
    pub fn new(
        conn: ConnectionManager,
        name: impl Into<String>,
        visibility_timeout: Duration,
        max_receives: u32,
    ) -> Self {
        Self {
            conn,
            name: name.into(),
            visibility_timeout,
            max_receives,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn deadline_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.visibility_timeout.as_millis() as i64
    }

    async fn bury(
        &self,
        conn: &mut ConnectionManager,
        envelope: &Envelope,
        receive_count: u32,
        reason: &str,
    ) -> StoreResult<()> {
        let record = serde_json::json!({
            "messageId": envelope.message_id,
            "body": envelope.body,
            "receiveCount": receive_count,
            "reason": reason,
            "deadLetteredAt": Utc::now(),
        });
        let _: () = conn.rpush(dead_letter_key(&self.name), record.to_string()).await?;
        self.forget(conn, &envelope.message_id).await
    }

    async fn forget(&self, conn: &mut ConnectionManager, message_id: &str) -> StoreResult<()> {
        let _: () = conn.hdel(receives_key(&self.name), message_id).await?;
        let _: () = conn.hdel(deadlines_key(&self.name), message_id).await?;
        let _: () = conn.hdel(deliveries_key(&self.name), message_id).await?;
        Ok(())
    }

    /// Remove this delivery's in-flight entry; false when the delivery is stale
    async fn claim(&self, conn: &mut ConnectionManager, message: &QueueMessage) -> StoreResult<bool> {
        let receipt: Receipt = match serde_json::from_str(&message.receipt) {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(queue = %self.name, message_id = %message.message_id, error = %e, "Unreadable receipt");
                return Ok(false);
            }
        };
        let removed: i64 = redis::Script::new(CLAIM_SCRIPT)
            .key(processing_key(&self.name))
            .key(deliveries_key(&self.name))
            .arg(&receipt.entry)
            .arg(&message.message_id)
            .arg(&receipt.token)
            .invoke_async(conn)
            .await?;
        if removed == 0 {
            debug!(queue = %self.name, message_id = %message.message_id, "Delivery no longer current");
        }
        Ok(removed > 0)
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, message_id: &str, body: &str) -> StoreResult<()> {
        let envelope = Envelope {
            message_id: message_id.to_string(),
            body: body.to_string(),
        };
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(&self.name, payload).await?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> StoreResult<Option<QueueMessage>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.name)
            .arg(processing_key(&self.name))
            .arg("LEFT")
            .arg("RIGHT")
            .arg(wait.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let envelope: Envelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(queue = %self.name, error = %e, "Dropping unreadable queue entry to dead-letter list");
                let _: () = conn.lrem(processing_key(&self.name), 1, &raw).await?;
                let _: () = conn.rpush(dead_letter_key(&self.name), &raw).await?;
                return Ok(None);
            }
        };

        let receive_count: u32 = conn
            .hincr(receives_key(&self.name), &envelope.message_id, 1)
            .await?;
        let _: () = conn
            .hset(deadlines_key(&self.name), &envelope.message_id, self.deadline_ms())
            .await?;
        let token = uuid::Uuid::new_v4().to_string();
        let _: () = conn
            .hset(deliveries_key(&self.name), &envelope.message_id, &token)
            .await?;

        debug!(queue = %self.name, message_id = %envelope.message_id, receive_count, "Message received");

        let receipt = serde_json::to_string(&Receipt { token, entry: raw })?;
        Ok(Some(QueueMessage {
            message_id: envelope.message_id,
            body: envelope.body,
            receive_count,
            receipt,
        }))
    }

    async fn ack(&self, message: &QueueMessage) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        if self.claim(&mut conn, message).await? {
            self.forget(&mut conn, &message.message_id).await?;
        } else {
            warn!(queue = %self.name, message_id = %message.message_id, "Ignoring ack for a stale delivery");
        }
        Ok(())
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        if !self.claim(&mut conn, message).await? {
            return Ok(());
        }
        let envelope = Envelope {
            message_id: message.message_id.clone(),
            body: message.body.clone(),
        };
        self.bury(&mut conn, &envelope, message.receive_count, reason).await
    }

    async fn recover_expired(&self) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let processing = processing_key(&self.name);
        let entries: Vec<String> = conn.lrange(&processing, 0, -1).await?;
        let now = Utc::now().timestamp_millis();
        let mut moved = 0;

        for raw in entries {
            let Ok(envelope) = serde_json::from_str::<Envelope>(&raw) else {
                continue;
            };

            let deadline: Option<i64> = conn.hget(deadlines_key(&self.name), &envelope.message_id).await?;
            match deadline {
                // Moved by BLMOVE but the receiver died before stamping a deadline
                None => {
                    let _: () = conn
                        .hset(deadlines_key(&self.name), &envelope.message_id, self.deadline_ms())
                        .await?;
                    continue;
                }
                Some(deadline) if deadline > now => continue,
                Some(_) => {}
            }

            // Only the consumer whose LREM wins may move the entry
            let removed: i64 = conn.lrem(&processing, 1, &raw).await?;
            if removed == 0 {
                continue;
            }

            let receive_count: Option<u32> = conn.hget(receives_key(&self.name), &envelope.message_id).await?;
            let receive_count = receive_count.unwrap_or(0);
            if receive_count >= self.max_receives {
                warn!(
                    queue = %self.name,
                    message_id = %envelope.message_id,
                    receive_count,
                    "Receive budget exhausted, dead-lettering message"
                );
                self.bury(&mut conn, &envelope, receive_count, "max receives exceeded").await?;
            } else {
                let _: () = conn.hdel(deadlines_key(&self.name), &envelope.message_id).await?;
                let _: () = conn.hdel(deliveries_key(&self.name), &envelope.message_id).await?;
                let _: () = conn.rpush(&self.name, &raw).await?;
                debug!(queue = %self.name, message_id = %envelope.message_id, receive_count, "Message made visible again");
            }
            moved += 1;
        }

        Ok(moved)
    }
}

/// Accessor implementations over plain JSON documents
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, payload).await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionAccessor for RedisStore {
    async fn get_by_id(&self, id: SubmissionId) -> StoreResult<Option<Submission>> {
        self.get_json(&submission_key(id)).await
    }

    async fn next_id(&self) -> StoreResult<SubmissionId> {
        let mut conn = self.conn.clone();
        let id: SubmissionId = conn.incr(submission_id_counter_key(), 1).await?;
        Ok(id)
    }

    async fn save(&self, submission: &Submission) -> StoreResult<()> {
        self.set_json(&submission_key(submission.id), submission).await
    }

    async fn save_test_results(
        &self,
        submission_id: SubmissionId,
        results: &[TestCaseResult],
    ) -> StoreResult<()> {
        self.set_json(&results_key(submission_id), results).await
    }

    async fn get_test_results(&self, submission_id: SubmissionId) -> StoreResult<Vec<TestCaseResult>> {
        Ok(self
            .get_json(&results_key(submission_id))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl TestCaseAccessor for RedisStore {
    async fn list_by_problem_ordered(&self, problem_id: ProblemId) -> StoreResult<Vec<TestCase>> {
        let mut test_cases: Vec<TestCase> = self
            .get_json(&test_cases_key(problem_id))
            .await?
            .unwrap_or_default();
        sort_declared(&mut test_cases);
        Ok(test_cases)
    }

    async fn count_by_problem(&self, problem_id: ProblemId) -> StoreResult<u32> {
        Ok(self.list_by_problem_ordered(problem_id).await?.len() as u32)
    }
}

#[async_trait]
impl ProblemSignatureAccessor for RedisStore {
    async fn get_function_signature(
        &self,
        problem_id: ProblemId,
        language: &str,
    ) -> StoreResult<Option<FunctionSignature>> {
        self.get_json(&signature_key(problem_id, language)).await
    }
}
