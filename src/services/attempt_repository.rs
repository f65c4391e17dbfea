use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::quiz_attempt::{AttemptState, NewAttempt, QuizAttempt};

/// Storage of quiz attempts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Finished and abandoned attempts of one user, oldest first.
    async fn list_finished(&self, quiz_id: Uuid, user_id: Uuid) -> Result<Vec<QuizAttempt>>;

    /// The user's in-progress or overdue attempt, if any.
    async fn find_active(&self, quiz_id: Uuid, user_id: Uuid) -> Result<Option<QuizAttempt>>;

    async fn get(&self, attempt_id: Uuid) -> Result<QuizAttempt>;

    /// Insert a new in-progress attempt. Fails with `Conflict` when the user
    /// already has an active attempt at this quiz.
    async fn create(&self, attempt: NewAttempt) -> Result<QuizAttempt>;

    /// Move an attempt from `expected` to `next` only if it is still in `expected`.
    /// Returns false when another writer got there first.
    async fn compare_and_set_state(
        &self,
        attempt_id: Uuid,
        expected: AttemptState,
        next: AttemptState,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Attempts whose deadline is before `now` and that can still expire.
    /// Overdue attempts under `graceperiod` handling are left out.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<QuizAttempt>>;
}

#[derive(Clone)]
pub struct PgAttemptRepository {
    pool: PgPool,
}

const ATTEMPT_COLUMNS: &str = "id, quiz_id, user_id, attempt_number, preview, state, \
    time_start, time_finish, deadline, sum_grades, updated_at";

impl PgAttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptRepository for PgAttemptRepository {
    async fn list_finished(&self, quiz_id: Uuid, user_id: Uuid) -> Result<Vec<QuizAttempt>> {
        let rows = sqlx::query_as::<_, QuizAttempt>(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts
            WHERE quiz_id = $1 AND user_id = $2 AND state IN ('finished', 'abandoned')
            ORDER BY time_start ASC, attempt_number ASC
            "#
        ))
        .bind(quiz_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_active(&self, quiz_id: Uuid, user_id: Uuid) -> Result<Option<QuizAttempt>> {
        let row = sqlx::query_as::<_, QuizAttempt>(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts
            WHERE quiz_id = $1 AND user_id = $2 AND state IN ('in_progress', 'overdue')
            "#
        ))
        .bind(quiz_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get(&self, attempt_id: Uuid) -> Result<QuizAttempt> {
        let row = sqlx::query_as::<_, QuizAttempt>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts WHERE id = $1"
        ))
        .bind(attempt_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create(&self, attempt: NewAttempt) -> Result<QuizAttempt> {
        let inserted = sqlx::query_as::<_, QuizAttempt>(&format!(
            r#"
            INSERT INTO quiz_attempts (quiz_id, user_id, attempt_number, preview, state, time_start, deadline)
            VALUES ($1, $2, $3, $4, 'in_progress', $5, $6)
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(attempt.quiz_id)
        .bind(attempt.user_id)
        .bind(attempt.attempt_number)
        .bind(attempt.preview)
        .bind(attempt.time_start)
        .bind(attempt.deadline)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::Conflict(
                "An attempt at this quiz is already in progress".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn compare_and_set_state(
        &self,
        attempt_id: Uuid,
        expected: AttemptState,
        next: AttemptState,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET state = $3, time_finish = COALESCE($4, time_finish), updated_at = NOW()
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(attempt_id)
        .bind(expected)
        .bind(next)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<QuizAttempt>> {
        let rows = sqlx::query_as::<_, QuizAttempt>(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts
            WHERE (state = 'in_progress'
                   OR (state = 'overdue'
                       AND quiz_id IN (SELECT id FROM quizzes WHERE overdue_handling <> 'graceperiod')))
              AND deadline IS NOT NULL
              AND deadline < $1
            ORDER BY deadline ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
