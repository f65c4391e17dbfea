use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::quiz::{GradeMethod, Quiz, ReviewFlags};
use crate::models::quiz_attempt::{AttemptState, QuizAttempt};
use crate::services::access_policy::chronological;

/// Per-attempt mark totals, keyed by attempt id.
#[async_trait]
pub trait GradeRepository: Send + Sync {
    async fn totals_for(&self, attempt_ids: &[Uuid]) -> Result<HashMap<Uuid, Decimal>>;
}

#[derive(Clone)]
pub struct PgGradeRepository {
    pool: PgPool,
}

impl PgGradeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradeRepository for PgGradeRepository {
    async fn totals_for(&self, attempt_ids: &[Uuid]) -> Result<HashMap<Uuid, Decimal>> {
        if attempt_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT attempt_id, COALESCE(SUM(mark), 0) AS total
            FROM question_attempt_marks
            WHERE attempt_id = ANY($1)
            GROUP BY attempt_id
            "#,
        )
        .bind(attempt_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut totals: HashMap<Uuid, Decimal> =
            attempt_ids.iter().map(|id| (*id, Decimal::ZERO)).collect();
        for row in rows {
            let id: Uuid = row.try_get("attempt_id")?;
            let total: Decimal = row.try_get("total")?;
            totals.insert(id, total);
        }
        Ok(totals)
    }
}

pub struct GradeCalculator;

impl GradeCalculator {
    /// Aggregate the marks of finished, non-preview attempts by `method`.
    ///
    /// Attempts are put in start-time order first, so storage order never
    /// changes which attempt counts as first or last.
    pub fn best_grade(attempts: &[QuizAttempt], method: GradeMethod) -> Option<Decimal> {
        let marks: Vec<Decimal> = chronological(attempts)
            .into_iter()
            .filter(|a| a.state == AttemptState::Finished && !a.preview)
            .filter_map(|a| a.sum_grades)
            .collect();
        Self::aggregate(&marks, method)
    }

    pub fn aggregate(marks: &[Decimal], method: GradeMethod) -> Option<Decimal> {
        match method {
            GradeMethod::Highest => marks.iter().copied().max(),
            GradeMethod::Average => {
                if marks.is_empty() {
                    None
                } else {
                    let total: Decimal = marks.iter().copied().sum();
                    Some(total / Decimal::from(marks.len() as u64))
                }
            }
            GradeMethod::First => marks.first().copied(),
            GradeMethod::Last => marks.last().copied(),
        }
    }

    /// Scale a sum of marks to the quiz's maximum grade.
    pub fn rescale(quiz: &Quiz, sum_marks: Decimal) -> Decimal {
        if quiz.sum_grades.is_zero() {
            return Decimal::ZERO;
        }
        let scaled = sum_marks * quiz.grade / quiz.sum_grades;
        scaled.round_dp_with_strategy(
            quiz.decimal_points.clamp(0, 10) as u32,
            RoundingStrategy::MidpointAwayFromZero,
        )
    }

    /// Best grade for the quiz, on the quiz's grade scale.
    pub fn quiz_best_grade(quiz: &Quiz, attempts: &[QuizAttempt]) -> Option<Decimal> {
        Self::best_grade(attempts, quiz.grade_method).map(|marks| Self::rescale(quiz, marks))
    }
}

/// Review timing of one attempt, as seen at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewTiming {
    During,
    Immediately,
    LaterWhileOpen,
    AfterClose,
}

const IMMEDIATE_REVIEW_WINDOW_SECS: i64 = 120;

pub fn review_timing(quiz: &Quiz, attempt: &QuizAttempt, now: DateTime<Utc>) -> ReviewTiming {
    if attempt.state.is_active() {
        return ReviewTiming::During;
    }
    if let Some(finished) = attempt.time_finish {
        if now < finished + Duration::seconds(IMMEDIATE_REVIEW_WINDOW_SECS) {
            return ReviewTiming::Immediately;
        }
    }
    match quiz.time_close {
        Some(close) if now > close => ReviewTiming::AfterClose,
        _ => ReviewTiming::LaterWhileOpen,
    }
}

pub fn review_flags(quiz: &Quiz, attempt: &QuizAttempt, now: DateTime<Utc>) -> ReviewFlags {
    let options = &quiz.review_options;
    match review_timing(quiz, attempt, now) {
        ReviewTiming::During => options.during,
        ReviewTiming::Immediately => options.immediately,
        ReviewTiming::LaterWhileOpen => options.open,
        ReviewTiming::AfterClose => options.closed,
    }
}

/// Review flags combined over `attempts`: what some attempt shows, and what
/// every attempt shows.
pub fn combined_review_flags(
    quiz: &Quiz,
    attempts: &[QuizAttempt],
    now: DateTime<Utc>,
) -> (ReviewFlags, ReviewFlags) {
    let mut some = ReviewFlags::default();
    let mut all = ReviewFlags {
        marks: true,
        overall_feedback: true,
    };
    for attempt in attempts {
        let flags = review_flags(quiz, attempt, now);
        some.marks |= flags.marks;
        some.overall_feedback |= flags.overall_feedback;
        all.marks &= flags.marks;
        all.overall_feedback &= flags.overall_feedback;
    }
    if attempts.is_empty() {
        all = ReviewFlags::default();
    }
    (some, all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn finished(minute: u32, marks: i64) -> QuizAttempt {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 9, minute, 0).unwrap();
        QuizAttempt {
            id: Uuid::new_v4(),
            quiz_id: Uuid::nil(),
            user_id: Uuid::nil(),
            attempt_number: minute as i32 + 1,
            preview: false,
            state: AttemptState::Finished,
            time_start: start,
            time_finish: Some(start + Duration::minutes(1)),
            deadline: None,
            sum_grades: Some(Decimal::from(marks)),
            updated_at: None,
        }
    }

    #[test]
    fn highest_ignores_storage_order() {
        let attempts = vec![finished(0, 40), finished(1, 70), finished(2, 55)];
        let mut shuffled = vec![attempts[2].clone(), attempts[0].clone(), attempts[1].clone()];
        assert_eq!(
            GradeCalculator::best_grade(&attempts, GradeMethod::Highest),
            Some(Decimal::from(70))
        );
        assert_eq!(
            GradeCalculator::best_grade(&shuffled, GradeMethod::Highest),
            Some(Decimal::from(70))
        );
        shuffled.reverse();
        assert_eq!(
            GradeCalculator::best_grade(&shuffled, GradeMethod::First),
            Some(Decimal::from(40))
        );
        assert_eq!(
            GradeCalculator::best_grade(&shuffled, GradeMethod::Last),
            Some(Decimal::from(55))
        );
    }

    #[test]
    fn average_and_empty() {
        let attempts = vec![finished(0, 40), finished(1, 70), finished(2, 55)];
        assert_eq!(
            GradeCalculator::best_grade(&attempts, GradeMethod::Average),
            Some(Decimal::from(55))
        );
        assert_eq!(GradeCalculator::best_grade(&[], GradeMethod::Average), None);
    }

    #[test]
    fn unfinished_and_preview_attempts_do_not_count() {
        let mut open = finished(3, 99);
        open.state = AttemptState::InProgress;
        let mut preview = finished(4, 98);
        preview.preview = true;
        let attempts = vec![finished(0, 10), open, preview];
        assert_eq!(
            GradeCalculator::best_grade(&attempts, GradeMethod::Highest),
            Some(Decimal::from(10))
        );
    }

    #[test]
    fn aggregate_last_of_empty_is_none() {
        assert_eq!(GradeCalculator::aggregate(&[], GradeMethod::Last), None);
    }
}
