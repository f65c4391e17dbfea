use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::quiz::Quiz;

#[async_trait]
pub trait QuizRepository: Send + Sync {
    async fn get(&self, quiz_id: Uuid) -> Result<Option<Quiz>>;
}

#[derive(Clone)]
pub struct PgQuizRepository {
    pool: PgPool,
}

impl PgQuizRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuizRepository for PgQuizRepository {
    async fn get(&self, quiz_id: Uuid) -> Result<Option<Quiz>> {
        let quiz = sqlx::query_as::<_, Quiz>(
            r#"
            SELECT
                id, course_id, name, intro, max_attempts, grade_method,
                time_open, time_close, time_limit_secs, grace_period_secs, overdue_handling,
                delay1_secs, delay2_secs, password_hash, subnet, require_popup,
                grade, sum_grades, decimal_points, has_feedback,
                review_options, questions,
                created_at, updated_at
            FROM quizzes WHERE id = $1
            "#,
        )
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(quiz)
    }
}
