use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    InProgress,
    Overdue,
    Finished,
    Abandoned,
}

impl AttemptState {
    /// In progress or overdue: the attempt can still be continued or submitted.
    pub fn is_active(self) -> bool {
        matches!(self, AttemptState::InProgress | AttemptState::Overdue)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Finished, overdue and abandoned attempts all use up one of the allowed attempts.
    pub fn counts_toward_limit(self) -> bool {
        !matches!(self, AttemptState::InProgress)
    }

    pub fn can_transition_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (InProgress, Finished)
                | (InProgress, Overdue)
                | (InProgress, Abandoned)
                | (Overdue, Finished)
                | (Overdue, Abandoned)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptState::InProgress => "in_progress",
            AttemptState::Overdue => "overdue",
            AttemptState::Finished => "finished",
            AttemptState::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub user_id: Uuid,
    pub attempt_number: i32,
    pub preview: bool,
    pub state: AttemptState,
    pub time_start: DateTime<Utc>,
    pub time_finish: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub sum_grades: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub quiz_id: Uuid,
    pub user_id: Uuid,
    pub attempt_number: i32,
    pub preview: bool,
    pub time_start: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
}
