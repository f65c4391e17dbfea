use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Question type recorded for slots whose question plugin is no longer installed.
pub const MISSING_QUESTION_TYPE: &str = "missingtype";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "grade_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GradeMethod {
    Highest,
    Average,
    First,
    Last,
}

impl GradeMethod {
    pub fn label(self) -> &'static str {
        match self {
            GradeMethod::Highest => "Highest grade",
            GradeMethod::Average => "Average grade",
            GradeMethod::First => "First attempt",
            GradeMethod::Last => "Last attempt",
        }
    }
}

/// What happens to an open attempt once its deadline plus grace period passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "overdue_handling", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OverdueHandling {
    Autosubmit,
    Graceperiod,
    Autoabandon,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSlot {
    pub slot: i32,
    pub question_type: String,
    pub max_mark: Decimal,
}

/// What a student may see of an attempt at one point in its life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFlags {
    #[serde(default)]
    pub marks: bool,
    #[serde(default)]
    pub overall_feedback: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOptions {
    #[serde(default)]
    pub during: ReviewFlags,
    #[serde(default)]
    pub immediately: ReviewFlags,
    #[serde(default)]
    pub open: ReviewFlags,
    #[serde(default)]
    pub closed: ReviewFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quiz {
    pub id: Uuid,
    pub course_id: Uuid,
    pub name: String,
    pub intro: Option<String>,
    pub max_attempts: i32,
    pub grade_method: GradeMethod,
    pub time_open: Option<DateTime<Utc>>,
    pub time_close: Option<DateTime<Utc>>,
    pub time_limit_secs: Option<i32>,
    pub grace_period_secs: i32,
    pub overdue_handling: OverdueHandling,
    pub delay1_secs: i32,
    pub delay2_secs: i32,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub subnet: Option<String>,
    pub require_popup: bool,
    pub grade: Decimal,
    pub sum_grades: Decimal,
    pub decimal_points: i32,
    pub has_feedback: bool,
    pub review_options: Json<ReviewOptions>,
    pub questions: Json<Vec<QuizSlot>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Quiz {
    pub fn has_questions(&self) -> bool {
        !self.questions.is_empty()
    }

    pub fn has_invalid_questions(&self) -> bool {
        self.questions
            .iter()
            .any(|q| q.question_type == MISSING_QUESTION_TYPE)
    }

    /// A quiz with no maximum grade or no marks does not produce grades.
    pub fn has_grades(&self) -> bool {
        self.grade > Decimal::ZERO && self.sum_grades > Decimal::ZERO
    }

    pub fn has_password(&self) -> bool {
        self.password_hash
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }

    pub fn has_subnet(&self) -> bool {
        self.subnet.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}
