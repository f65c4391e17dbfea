use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::quiz::Quiz;
use crate::models::quiz_attempt::{AttemptState, QuizAttempt};
use crate::models::webhook_log::WebhookLog;

/// Tells the owner of an attempt that its state changed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttemptNotifier: Send + Sync {
    async fn attempt_state_changed(
        &self,
        quiz: &Quiz,
        attempt: &QuizAttempt,
        from: AttemptState,
    ) -> Result<()>;
}

/// Webhook outbox: notifications are queued in `webhook_logs` and delivered
/// by a background worker.
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    client: Client,
    target_url: String,
    secret: String,
}

impl NotificationService {
    pub fn new(pool: PgPool, target_url: String, secret: String) -> Self {
        Self {
            pool,
            client: Client::new(),
            target_url,
            secret,
        }
    }

    pub async fn enqueue_webhook(
        &self,
        event_type: &str,
        payload: &JsonValue,
    ) -> Result<WebhookLog> {
        let row = sqlx::query_as::<_, WebhookLog>(
            r#"
            INSERT INTO webhook_logs (event_type, payload, target_url, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING
                id, event_type, payload, target_url,
                http_status, response_body, attempts, max_attempts, next_retry_at, status,
                created_at, updated_at
            "#,
        )
        .bind(event_type)
        .bind(payload)
        .bind(&self.target_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn deliver_once(&self, log_id: Uuid) -> Result<()> {
        let log = sqlx::query_as::<_, WebhookLog>(
            r#"SELECT id, event_type, payload, target_url, http_status, response_body, attempts, max_attempts, next_retry_at, status, created_at, updated_at FROM webhook_logs WHERE id = $1"#,
        )
        .bind(log_id)
        .fetch_one(&self.pool)
        .await?;

        let res = self
            .client
            .post(&log.target_url)
            .header("X-Webhook-Secret", &self.secret)
            .json(&log.payload)
            .send()
            .await;
        match res {
            Ok(resp) => {
                let status = resp.status().as_u16() as i32;
                let body = resp.text().await.unwrap_or_default();
                sqlx::query(
                    r#"UPDATE webhook_logs SET http_status = $1, response_body = $2, status = CASE WHEN $1 BETWEEN 200 AND 299 THEN 'success' ELSE 'failed' END, attempts = COALESCE(attempts,0) + 1, updated_at = NOW() WHERE id = $3"#,
                )
                .bind(status)
                .bind(body)
                .bind(log.id)
                .execute(&self.pool)
                .await?;
            }
            Err(err) => {
                sqlx::query(
                    r#"UPDATE webhook_logs SET response_body = $1, status = 'failed', attempts = COALESCE(attempts,0) + 1, updated_at = NOW() WHERE id = $2"#,
                )
                .bind(format!("{}", err))
                .bind(log.id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Deliver one due webhook. Returns false when nothing was waiting.
    pub async fn run_once(&self) -> Result<bool> {
        let row_opt = sqlx::query(
            r#"SELECT id FROM webhook_logs
               WHERE status IN ('pending', 'failed')
                 AND COALESCE(attempts, 0) < COALESCE(max_attempts, 3)
                 AND (next_retry_at IS NULL OR next_retry_at <= NOW())
               ORDER BY created_at ASC
               FOR UPDATE SKIP LOCKED
               LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row_opt else { return Ok(false) };
        let id: Uuid = row.try_get("id")?;

        if let Err(e) = self.deliver_once(id).await {
            tracing::warn!(webhook_id = %id, "webhook delivery failed: {:?}", e);
        }

        let row2 =
            sqlx::query(r#"SELECT attempts, max_attempts, status FROM webhook_logs WHERE id = $1"#)
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        let attempts: i32 = row2.try_get::<Option<i32>, _>("attempts")?.unwrap_or(0);
        let max_attempts: i32 = row2.try_get::<Option<i32>, _>("max_attempts")?.unwrap_or(3);
        let status: Option<String> = row2.try_get("status")?;

        if status.as_deref() == Some("failed") && attempts < max_attempts {
            sqlx::query(
                r#"UPDATE webhook_logs
                   SET next_retry_at = NOW() + make_interval(secs => LEAST(3600, 30 * power(2::float, GREATEST(0, attempts-1))::int))
                   WHERE id = $1"#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }

        Ok(true)
    }
}

pub fn state_change_payload(quiz: &Quiz, attempt: &QuizAttempt, from: AttemptState) -> JsonValue {
    json!({
        "event": "attempt_state_changed",
        "quiz_id": quiz.id,
        "quiz_name": quiz.name,
        "course_id": quiz.course_id,
        "attempt_id": attempt.id,
        "attempt_number": attempt.attempt_number,
        "user_id": attempt.user_id,
        "from": from.as_str(),
        "to": attempt.state.as_str(),
        "deadline": attempt.deadline,
        "time_finish": attempt.time_finish,
    })
}

#[async_trait]
impl AttemptNotifier for NotificationService {
    async fn attempt_state_changed(
        &self,
        quiz: &Quiz,
        attempt: &QuizAttempt,
        from: AttemptState,
    ) -> Result<()> {
        let payload = state_change_payload(quiz, attempt, from);
        let log = self.enqueue_webhook("attempt_state_changed", &payload).await?;
        tracing::info!(
            webhook_id = %log.id,
            attempt_id = %attempt.id,
            "queued attempt state notification"
        );
        Ok(())
    }
}
