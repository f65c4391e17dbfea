use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::config::StaleOverridePolicy;
use crate::dto::quiz_view_dto::{
    AttemptSummary, PageKind, PreventMessage, QuizView, StartButton, StartButtonView, ViewColumns,
};
use crate::error::{Error, Result};
use crate::models::grade::{GradeItem, GradeSummary};
use crate::models::quiz::Quiz;
use crate::models::quiz_attempt::{AttemptState, QuizAttempt};
use crate::models::viewer::Viewer;
use crate::services::access_policy::{chronological, last_finished, AccessPolicyEngine};
use crate::services::access_rules::DenialReason;
use crate::services::attempt_lifecycle::{AttemptLifecycle, ExpiryContext};
use crate::services::attempt_repository::AttemptRepository;
use crate::services::grade_calculator::{
    combined_review_flags, review_flags, GradeCalculator, GradeRepository,
};
use crate::services::gradebook::{summarize, GradebookRepository};
use crate::services::quiz_repository::QuizRepository;

/// Builds the quiz entry page for one user.
#[derive(Clone)]
pub struct QuizViewService {
    quizzes: Arc<dyn QuizRepository>,
    attempts: Arc<dyn AttemptRepository>,
    grades: Arc<dyn GradeRepository>,
    gradebook: Arc<dyn GradebookRepository>,
    lifecycle: AttemptLifecycle,
    stale_override: StaleOverridePolicy,
}

impl QuizViewService {
    pub fn new(
        quizzes: Arc<dyn QuizRepository>,
        attempts: Arc<dyn AttemptRepository>,
        grades: Arc<dyn GradeRepository>,
        gradebook: Arc<dyn GradebookRepository>,
        lifecycle: AttemptLifecycle,
        stale_override: StaleOverridePolicy,
    ) -> Self {
        Self {
            quizzes,
            attempts,
            grades,
            gradebook,
            lifecycle,
            stale_override,
        }
    }

    pub async fn load_quiz(&self, quiz_id: Uuid) -> Result<Quiz> {
        self.quizzes
            .get(quiz_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Quiz {} not found", quiz_id)))
    }

    pub async fn build(&self, viewer: &Viewer, quiz_id: Uuid, now: DateTime<Utc>) -> Result<QuizView> {
        let quiz = self.load_quiz(quiz_id).await?;
        let caps = viewer.caps;
        if !caps.view {
            return Err(Error::Forbidden("You may not view this quiz".to_string()));
        }

        let mut attempts = self.attempts.list_finished(quiz.id, viewer.user_id).await?;
        if let Some(active) = self.attempts.find_active(quiz.id, viewer.user_id).await? {
            let (active, _) = self
                .lifecycle
                .handle_if_time_expired(&quiz, active, now, ExpiryContext::UserView)
                .await?;
            attempts.push(active);
        }
        self.fill_mark_totals(&mut attempts).await?;

        let engine = AccessPolicyEngine::new(&quiz, now, caps.ignore_time_limits);
        let decision = engine.evaluate(&attempts)?;

        let ordered = chronological(&attempts);
        let last = last_finished(&ordered);
        let unfinished = ordered.iter().find(|a| a.state.is_active()).copied();

        let item = self.gradebook.grade_item(quiz.id).await?;
        let grade = self.grade_summary(&quiz, viewer, &attempts, last, item.as_ref()).await?;

        let columns = if attempts.is_empty() {
            ViewColumns::default()
        } else {
            view_columns(&quiz, &attempts, last.is_some(), now)
        };

        let more_attempts =
            unfinished.is_some() || !engine.is_finished(decision.attempts_used, last);

        let mut info_messages = engine.describe_rules();
        if quiz.max_attempts != 1 {
            info_messages.push(format!("Grading method: {}", quiz.grade_method.label()));
        }
        if let Some(item) = item.as_ref().filter(|i| !i.grade_pass.is_zero()) {
            info_messages.push(format!(
                "Grade to pass: {} out of {}",
                format_grade(item.grade_pass, quiz.decimal_points),
                format_grade(quiz.grade, quiz.decimal_points)
            ));
        }

        let (button, prevent) = choose_button(
            &engine,
            viewer,
            &quiz,
            unfinished,
            decision.attempts_used,
            last,
            more_attempts,
        );

        let page_kind = if viewer.is_guest() {
            PageKind::Guest
        } else if !caps.attempt && !caps.preview && !caps.review_mine {
            PageKind::NotEnrolled
        } else {
            PageKind::Normal
        };

        let summaries = ordered
            .iter()
            .map(|a| attempt_summary(&quiz, a, now))
            .collect();

        tracing::debug!(
            quiz_id = %quiz.id,
            user_id = %viewer.user_id,
            attempts = attempts.len(),
            may_attempt = decision.may_attempt,
            "built quiz view"
        );

        Ok(QuizView {
            quiz_id: quiz.id,
            course_id: quiz.course_id,
            name: quiz.name.clone(),
            intro: quiz.intro.clone(),
            page_kind,
            attempts: summaries,
            attempts_used: decision.attempts_used,
            grade,
            max_grade: quiz.grade,
            columns,
            more_attempts,
            info_messages,
            prevent_messages: prevent.iter().map(PreventMessage::from).collect(),
            show_back_to_course: button.is_none(),
            button,
            preflight_required: decision.preflight_required,
            popup_required: engine.popup_required(),
        })
    }

    async fn fill_mark_totals(&self, attempts: &mut [QuizAttempt]) -> Result<()> {
        let missing: Vec<Uuid> = attempts
            .iter()
            .filter(|a| a.state == AttemptState::Finished && a.sum_grades.is_none())
            .map(|a| a.id)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let totals = self.grades.totals_for(&missing).await?;
        for attempt in attempts.iter_mut() {
            if attempt.sum_grades.is_none() {
                if let Some(total) = totals.get(&attempt.id) {
                    attempt.sum_grades = Some(*total);
                }
            }
        }
        Ok(())
    }

    async fn grade_summary(
        &self,
        quiz: &Quiz,
        viewer: &Viewer,
        attempts: &[QuizAttempt],
        last: Option<&QuizAttempt>,
        item: Option<&GradeItem>,
    ) -> Result<GradeSummary> {
        // Without grades there is nothing to compute, but the gradebook may
        // still carry an override and feedback.
        let graded = quiz.has_grades();
        if viewer.caps.preview {
            let computed = last
                .and_then(|a| a.sum_grades)
                .filter(|_| graded)
                .map(|marks| GradeCalculator::rescale(quiz, marks));
            return Ok(summarize(computed, true, None, None, self.stale_override));
        }

        let computed = if graded {
            GradeCalculator::quiz_best_grade(quiz, attempts)
        } else {
            None
        };
        let grade = match item {
            Some(item) => self.gradebook.user_grade(item.id, viewer.user_id).await?,
            None => None,
        };
        Ok(summarize(computed, false, item, grade.as_ref(), self.stale_override))
    }
}

fn view_columns(quiz: &Quiz, attempts: &[QuizAttempt], has_finished: bool, now: DateTime<Utc>) -> ViewColumns {
    let (some, all) = combined_review_flags(quiz, attempts, now);
    let grade = some.marks && quiz.has_grades();
    ViewColumns {
        attempt: quiz.max_attempts != 1,
        grade,
        mark: grade && quiz.grade != quiz.sum_grades,
        feedback: quiz.has_feedback && all.overall_feedback,
        overall_stats: has_finished && all.marks,
    }
}

/// Pick the start button and the messages that explain a missing one.
fn choose_button(
    engine: &AccessPolicyEngine<'_>,
    viewer: &Viewer,
    quiz: &Quiz,
    unfinished: Option<&QuizAttempt>,
    attempts_used: u32,
    last: Option<&QuizAttempt>,
    more_attempts: bool,
) -> (Option<StartButtonView>, Vec<DenialReason>) {
    let caps = viewer.caps;
    let mut prevent = Vec::new();
    if !quiz.has_questions() {
        return (None, prevent);
    }

    let mut kind = match unfinished {
        Some(_) if caps.preview => Some(StartButton::ContinuePreview),
        Some(_) if caps.attempt => Some(StartButton::ContinueAttempt),
        Some(_) => None,
        None if caps.preview => Some(StartButton::Preview),
        None if caps.attempt => {
            prevent = engine.prevent_new_attempt(attempts_used, last);
            if !prevent.is_empty() {
                None
            } else if attempts_used == 0 {
                Some(StartButton::AttemptQuiz)
            } else {
                Some(StartButton::ReattemptQuiz)
            }
        }
        None => None,
    };

    if caps.preview {
        prevent = engine.prevent_access();
    } else if kind.is_some() {
        if !more_attempts {
            kind = None;
        } else if caps.attempt {
            prevent = engine.prevent_access();
            if !prevent.is_empty() {
                kind = None;
            }
        }
    }

    if quiz.has_invalid_questions() {
        prevent.push(DenialReason::InvalidQuestions);
        kind = None;
    }

    let button = kind.map(|kind| StartButtonView {
        kind,
        label: kind.label().to_string(),
        attempt_id: unfinished.map(|a| a.id),
    });
    (button, prevent)
}

fn attempt_summary(quiz: &Quiz, attempt: &QuizAttempt, now: DateTime<Utc>) -> AttemptSummary {
    let show_marks = attempt.state == AttemptState::Finished && review_flags(quiz, attempt, now).marks;
    let marks = attempt.sum_grades.filter(|_| show_marks);
    AttemptSummary {
        id: attempt.id,
        attempt_number: attempt.attempt_number,
        state: attempt.state,
        preview: attempt.preview,
        time_start: attempt.time_start,
        time_finish: attempt.time_finish,
        deadline: attempt.deadline,
        marks,
        grade: marks
            .filter(|_| quiz.has_grades())
            .map(|m| GradeCalculator::rescale(quiz, m)),
    }
}

pub fn format_grade(value: Decimal, decimal_points: i32) -> String {
    let dp = decimal_points.clamp(0, 10) as usize;
    let rounded = value.round_dp_with_strategy(dp as u32, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.*}", dp, rounded)
}
