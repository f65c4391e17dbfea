use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GradeItem {
    pub id: Uuid,
    pub course_id: Uuid,
    pub quiz_id: Uuid,
    pub grade_pass: Decimal,
    pub needs_update: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GradebookGrade {
    pub item_id: Uuid,
    pub user_id: Uuid,
    pub final_grade: Option<Decimal>,
    pub overridden: bool,
    pub feedback: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Grade shown on the quiz page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradeSummary {
    pub best_grade: Option<Decimal>,
    pub overridden: bool,
    pub feedback: Option<String>,
}
