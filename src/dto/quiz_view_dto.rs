use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::grade::GradeSummary;
use crate::models::quiz_attempt::AttemptState;
use crate::services::access_rules::DenialReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Guest,
    NotEnrolled,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartButton {
    ContinuePreview,
    ContinueAttempt,
    Preview,
    AttemptQuiz,
    ReattemptQuiz,
}

impl StartButton {
    pub fn label(self) -> &'static str {
        match self {
            StartButton::ContinuePreview => "Continue the last preview",
            StartButton::ContinueAttempt => "Continue the last attempt",
            StartButton::Preview => "Preview quiz now",
            StartButton::AttemptQuiz => "Attempt quiz now",
            StartButton::ReattemptQuiz => "Re-attempt quiz",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreventMessage {
    pub code: String,
    pub message: String,
}

impl From<&DenialReason> for PreventMessage {
    fn from(reason: &DenialReason) -> Self {
        Self {
            code: reason.code().to_string(),
            message: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewColumns {
    pub attempt: bool,
    pub grade: bool,
    pub mark: bool,
    pub feedback: bool,
    pub overall_stats: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSummary {
    pub id: Uuid,
    pub attempt_number: i32,
    pub state: AttemptState,
    pub preview: bool,
    pub time_start: DateTime<Utc>,
    pub time_finish: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    /// Present only when the review options allow marks for this attempt.
    pub marks: Option<Decimal>,
    pub grade: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartButtonView {
    pub kind: StartButton,
    pub label: String,
    /// Attempt the button resumes, if any.
    pub attempt_id: Option<Uuid>,
}

/// Everything the quiz entry page needs, computed once per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizView {
    pub quiz_id: Uuid,
    pub course_id: Uuid,
    pub name: String,
    pub intro: Option<String>,
    pub page_kind: PageKind,
    pub attempts: Vec<AttemptSummary>,
    pub attempts_used: u32,
    pub grade: GradeSummary,
    pub max_grade: Decimal,
    pub columns: ViewColumns,
    pub more_attempts: bool,
    pub info_messages: Vec<String>,
    pub prevent_messages: Vec<PreventMessage>,
    pub button: Option<StartButtonView>,
    pub preflight_required: bool,
    pub popup_required: bool,
    pub show_back_to_course: bool,
}
