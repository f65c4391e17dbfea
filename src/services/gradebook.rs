use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::StaleOverridePolicy;
use crate::error::Result;
use crate::models::grade::{GradeItem, GradeSummary, GradebookGrade};

/// Read-only view of the course gradebook.
#[async_trait]
pub trait GradebookRepository: Send + Sync {
    async fn grade_item(&self, quiz_id: Uuid) -> Result<Option<GradeItem>>;
    async fn user_grade(&self, item_id: Uuid, user_id: Uuid) -> Result<Option<GradebookGrade>>;
}

#[derive(Clone)]
pub struct PgGradebookRepository {
    pool: PgPool,
}

impl PgGradebookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradebookRepository for PgGradebookRepository {
    async fn grade_item(&self, quiz_id: Uuid) -> Result<Option<GradeItem>> {
        let item = sqlx::query_as::<_, GradeItem>(
            r#"SELECT id, course_id, quiz_id, grade_pass, needs_update FROM grade_items WHERE quiz_id = $1"#,
        )
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    async fn user_grade(&self, item_id: Uuid, user_id: Uuid) -> Result<Option<GradebookGrade>> {
        let grade = sqlx::query_as::<_, GradebookGrade>(
            r#"
            SELECT item_id, user_id, final_grade, overridden, feedback, updated_at
            FROM grade_grades
            WHERE item_id = $1 AND user_id = $2
            "#,
        )
        .bind(item_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(grade)
    }
}

/// Combine the computed grade with what the gradebook says.
///
/// Users who can preview have no real gradebook grade, so the gradebook is
/// ignored for them.
pub fn summarize(
    computed: Option<Decimal>,
    can_preview: bool,
    item: Option<&GradeItem>,
    grade: Option<&GradebookGrade>,
    stale_override: StaleOverridePolicy,
) -> GradeSummary {
    let mut summary = GradeSummary {
        best_grade: computed,
        overridden: false,
        feedback: None,
    };
    if can_preview {
        return summary;
    }
    let Some(item) = item else {
        return summary;
    };

    let grade = grade.cloned().unwrap_or(GradebookGrade {
        item_id: item.id,
        user_id: Uuid::nil(),
        final_grade: None,
        overridden: false,
        feedback: None,
        updated_at: None,
    });
    summary.best_grade = grade.final_grade;

    if grade.overridden {
        if item.needs_update && stale_override == StaleOverridePolicy::Zero {
            tracing::warn!(
                item_id = %item.id,
                "overridden grade on an item awaiting regrade is reported as zero"
            );
            summary.best_grade = Some(Decimal::ZERO);
        }
        summary.overridden = true;
    }

    if let Some(feedback) = grade.feedback.filter(|f| !f.trim().is_empty()) {
        summary.feedback = Some(feedback);
    }
    summary
}
