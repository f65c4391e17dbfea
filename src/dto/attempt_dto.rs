use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::quiz_attempt::{AttemptState, QuizAttempt};

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct StartAttemptRequest {
    #[serde(default)]
    #[validate(length(max = 255))]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptResponse {
    pub attempt_id: Uuid,
    pub attempt_number: i32,
    pub state: AttemptState,
    pub deadline: Option<DateTime<Utc>>,
    pub resumed: bool,
}

impl StartAttemptResponse {
    pub fn new(attempt: &QuizAttempt, resumed: bool) -> Self {
        Self {
            attempt_id: attempt.id,
            attempt_number: attempt.attempt_number,
            state: attempt.state,
            deadline: attempt.deadline,
            resumed,
        }
    }
}
