use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::quiz::{OverdueHandling, Quiz};
use crate::models::quiz_attempt::{AttemptState, NewAttempt, QuizAttempt};
use crate::services::access_policy::AccessPolicyEngine;
use crate::services::access_rules::DenialReason;
use crate::services::attempt_repository::AttemptRepository;
use crate::services::notification_service::AttemptNotifier;
use crate::services::preflight::{run_preflight, PreflightInput};
use crate::services::quiz_repository::QuizRepository;

/// Who is asking for the expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryContext {
    /// The attempt owner is looking at the quiz; a transition is reported to them.
    UserView,
    /// Scheduled or administrative evaluation; transitions are silent.
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    NotDue,
    Transitioned { from: AttemptState, to: AttemptState },
    /// Someone else already moved the attempt on.
    AlreadyHandled,
}

/// The moment an open attempt stops being open: its deadline plus the grace period.
pub fn due_at(quiz: &Quiz, attempt: &QuizAttempt) -> Option<DateTime<Utc>> {
    attempt
        .deadline
        .map(|d| d + Duration::seconds(quiz.grace_period_secs.max(0) as i64))
}

/// Whether an attempt in `state` can still be moved on by running out of time.
///
/// Under `graceperiod` an overdue attempt stays overdue until its owner
/// submits it, so only open attempts are left to expire.
pub fn awaits_expiry(handling: OverdueHandling, state: AttemptState) -> bool {
    match state {
        AttemptState::InProgress => true,
        AttemptState::Overdue => handling != OverdueHandling::Graceperiod,
        AttemptState::Finished | AttemptState::Abandoned => false,
    }
}

/// State an expired attempt must move to at `now`, or `None` when nothing is due.
pub fn expiry_transition(
    quiz: &Quiz,
    attempt: &QuizAttempt,
    now: DateTime<Utc>,
) -> Option<AttemptState> {
    if !awaits_expiry(quiz.overdue_handling, attempt.state) {
        return None;
    }
    let due = due_at(quiz, attempt)?;
    if now <= due {
        return None;
    }
    let next = match quiz.overdue_handling {
        OverdueHandling::Autosubmit => AttemptState::Finished,
        OverdueHandling::Graceperiod => AttemptState::Overdue,
        OverdueHandling::Autoabandon => AttemptState::Abandoned,
    };
    if next == attempt.state || !attempt.state.can_transition_to(next) {
        return None;
    }
    Some(next)
}

fn unusable_questions(quiz: &Quiz) -> Option<DenialReason> {
    if !quiz.has_questions() {
        Some(DenialReason::NoQuestions)
    } else if quiz.has_invalid_questions() {
        Some(DenialReason::InvalidQuestions)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub user_id: Uuid,
    pub now: DateTime<Utc>,
    pub bypass_time_limits: bool,
    pub preview: bool,
    pub preflight: PreflightInput,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(QuizAttempt),
    Resumed(QuizAttempt),
    Denied(Vec<DenialReason>),
}

#[derive(Clone)]
pub struct AttemptLifecycle {
    attempts: Arc<dyn AttemptRepository>,
    notifier: Arc<dyn AttemptNotifier>,
}

impl AttemptLifecycle {
    pub fn new(attempts: Arc<dyn AttemptRepository>, notifier: Arc<dyn AttemptNotifier>) -> Self {
        Self { attempts, notifier }
    }

    /// Move `attempt` on if its time has run out.
    ///
    /// The write is a compare-and-set on the attempt's state. A lost write is
    /// retried once against a fresh read, after which the transition is taken
    /// to be someone else's.
    pub async fn handle_if_time_expired(
        &self,
        quiz: &Quiz,
        attempt: QuizAttempt,
        now: DateTime<Utc>,
        ctx: ExpiryContext,
    ) -> Result<(QuizAttempt, ExpiryOutcome)> {
        let Some(mut next) = expiry_transition(quiz, &attempt, now) else {
            return Ok((attempt, ExpiryOutcome::NotDue));
        };

        let mut current = attempt;
        for retry in 0..2 {
            let from = current.state;
            let finished_at = next.is_terminal().then_some(now);
            if self
                .attempts
                .compare_and_set_state(current.id, from, next, finished_at)
                .await?
            {
                current.state = next;
                if finished_at.is_some() {
                    current.time_finish = finished_at;
                }
                tracing::info!(
                    attempt_id = %current.id,
                    user_id = %current.user_id,
                    from = from.as_str(),
                    to = next.as_str(),
                    "attempt time expired"
                );
                if ctx == ExpiryContext::UserView {
                    if let Err(e) = self.notifier.attempt_state_changed(quiz, &current, from).await {
                        tracing::error!(attempt_id = %current.id, "failed to notify attempt owner: {:?}", e);
                    }
                }
                return Ok((current, ExpiryOutcome::Transitioned { from, to: next }));
            }

            current = self.attempts.get(current.id).await?;
            match expiry_transition(quiz, &current, now) {
                Some(again) if retry == 0 => next = again,
                _ => break,
            }
        }

        tracing::debug!(attempt_id = %current.id, "attempt expiry already handled");
        Ok((current, ExpiryOutcome::AlreadyHandled))
    }

    /// Start a new attempt, or hand back the one already in progress.
    ///
    /// The access decision and the preflight checks are evaluated afresh on
    /// every call. Preview users skip the access rules but not preflight.
    /// Nobody may start or resume an attempt on a quiz without usable questions.
    pub async fn start_attempt(&self, quiz: &Quiz, req: StartRequest) -> Result<StartOutcome> {
        if let Some(reason) = unusable_questions(quiz) {
            tracing::warn!(
                quiz_id = %quiz.id,
                user_id = %req.user_id,
                reason = reason.code(),
                "attempt start denied"
            );
            return Ok(StartOutcome::Denied(vec![reason]));
        }
        let engine = AccessPolicyEngine::new(quiz, req.now, req.bypass_time_limits);

        let mut history = self.attempts.list_finished(quiz.id, req.user_id).await?;
        if let Some(active) = self.attempts.find_active(quiz.id, req.user_id).await? {
            let (active, _) = self
                .handle_if_time_expired(quiz, active, req.now, ExpiryContext::UserView)
                .await?;
            history.push(active);
        }

        let decision = engine.evaluate(&history)?;
        let mut reasons = if req.preview {
            Vec::new()
        } else {
            decision.reasons.clone()
        };
        if decision.preflight_required {
            reasons.extend(run_preflight(quiz, &req.preflight));
        }
        if !reasons.is_empty() {
            tracing::warn!(
                quiz_id = %quiz.id,
                user_id = %req.user_id,
                reasons = ?reasons.iter().map(DenialReason::code).collect::<Vec<_>>(),
                "attempt start denied"
            );
            return Ok(StartOutcome::Denied(reasons));
        }

        if let Some(active) = history.iter().find(|a| a.state.is_active()) {
            return Ok(StartOutcome::Resumed(active.clone()));
        }

        let attempt_number = history.iter().map(|a| a.attempt_number).max().unwrap_or(0) + 1;
        let created = self
            .attempts
            .create(NewAttempt {
                quiz_id: quiz.id,
                user_id: req.user_id,
                attempt_number,
                preview: req.preview,
                time_start: req.now,
                deadline: engine.attempt_deadline(req.now),
            })
            .await?;
        tracing::info!(
            attempt_id = %created.id,
            quiz_id = %quiz.id,
            user_id = %req.user_id,
            attempt_number,
            "attempt started"
        );
        Ok(StartOutcome::Started(created))
    }

    /// Expire every attempt whose deadline has passed, without notifying anyone.
    /// Returns how many attempts changed state.
    pub async fn sweep_expired(&self, quizzes: &dyn QuizRepository, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.attempts.list_expired(now).await?;
        let mut cache: HashMap<Uuid, Option<Quiz>> = HashMap::new();
        let mut changed = 0;

        for attempt in expired {
            if !cache.contains_key(&attempt.quiz_id) {
                let quiz = quizzes.get(attempt.quiz_id).await?;
                cache.insert(attempt.quiz_id, quiz);
            }
            let Some(Some(quiz)) = cache.get(&attempt.quiz_id) else {
                tracing::warn!(attempt_id = %attempt.id, "attempt references a missing quiz");
                continue;
            };
            let attempt_id = attempt.id;
            match self
                .handle_if_time_expired(quiz, attempt, now, ExpiryContext::Background)
                .await
            {
                Ok((_, ExpiryOutcome::Transitioned { .. })) => changed += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(attempt_id = %attempt_id, "expiry sweep failed: {:?}", e),
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quiz::{GradeMethod, QuizSlot, ReviewOptions};
    use crate::services::attempt_repository::MockAttemptRepository;
    use crate::services::notification_service::MockAttemptNotifier;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use sqlx::types::Json;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 10, minute, 0).unwrap()
    }

    fn quiz(handling: OverdueHandling) -> Quiz {
        Quiz {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            name: "Weekly check".to_string(),
            intro: None,
            max_attempts: 0,
            grade_method: GradeMethod::Highest,
            time_open: None,
            time_close: None,
            time_limit_secs: Some(600),
            grace_period_secs: 120,
            overdue_handling: handling,
            delay1_secs: 0,
            delay2_secs: 0,
            password_hash: None,
            subnet: None,
            require_popup: false,
            grade: Decimal::from(10),
            sum_grades: Decimal::from(10),
            decimal_points: 2,
            has_feedback: false,
            review_options: Json(ReviewOptions::default()),
            questions: Json(vec![QuizSlot {
                slot: 1,
                question_type: "multichoice".to_string(),
                max_mark: Decimal::from(10),
            }]),
            created_at: None,
            updated_at: None,
        }
    }

    fn open_attempt(quiz: &Quiz, state: AttemptState) -> QuizAttempt {
        QuizAttempt {
            id: Uuid::new_v4(),
            quiz_id: quiz.id,
            user_id: Uuid::new_v4(),
            attempt_number: 1,
            preview: false,
            state,
            time_start: t(0),
            time_finish: None,
            deadline: Some(t(10)),
            sum_grades: None,
            updated_at: None,
        }
    }

    fn lifecycle(repo: MockAttemptRepository, notifier: MockAttemptNotifier) -> AttemptLifecycle {
        AttemptLifecycle::new(Arc::new(repo), Arc::new(notifier))
    }

    #[test]
    fn transition_waits_for_grace_period() {
        let q = quiz(OverdueHandling::Graceperiod);
        let a = open_attempt(&q, AttemptState::InProgress);
        assert_eq!(expiry_transition(&q, &a, t(11)), None);
        assert_eq!(expiry_transition(&q, &a, t(12)), None);
        assert_eq!(expiry_transition(&q, &a, t(13)), Some(AttemptState::Overdue));
    }

    #[test]
    fn transition_target_follows_overdue_handling() {
        let submit = quiz(OverdueHandling::Autosubmit);
        let abandon = quiz(OverdueHandling::Autoabandon);
        let a = open_attempt(&submit, AttemptState::InProgress);
        assert_eq!(expiry_transition(&submit, &a, t(30)), Some(AttemptState::Finished));
        assert_eq!(expiry_transition(&abandon, &a, t(30)), Some(AttemptState::Abandoned));
        let overdue = open_attempt(&submit, AttemptState::Overdue);
        assert_eq!(expiry_transition(&submit, &overdue, t(30)), Some(AttemptState::Finished));
    }

    #[test]
    fn overdue_attempts_expire_only_outside_grace_handling() {
        use AttemptState::*;
        for handling in [
            OverdueHandling::Autosubmit,
            OverdueHandling::Graceperiod,
            OverdueHandling::Autoabandon,
        ] {
            assert!(awaits_expiry(handling, InProgress));
            assert!(!awaits_expiry(handling, Finished));
            assert!(!awaits_expiry(handling, Abandoned));
        }
        assert!(awaits_expiry(OverdueHandling::Autosubmit, Overdue));
        assert!(awaits_expiry(OverdueHandling::Autoabandon, Overdue));
        assert!(!awaits_expiry(OverdueHandling::Graceperiod, Overdue));
    }

    #[test]
    fn attempts_without_deadline_never_expire() {
        let q = quiz(OverdueHandling::Autosubmit);
        let mut a = open_attempt(&q, AttemptState::InProgress);
        a.deadline = None;
        assert_eq!(expiry_transition(&q, &a, t(59)), None);
    }

    #[tokio::test]
    async fn user_view_expiry_notifies_owner_once() {
        let q = quiz(OverdueHandling::Graceperiod);
        let a = open_attempt(&q, AttemptState::InProgress);

        let mut repo = MockAttemptRepository::new();
        repo.expect_compare_and_set_state()
            .withf(|_, expected, next, finished| {
                *expected == AttemptState::InProgress
                    && *next == AttemptState::Overdue
                    && finished.is_none()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        let mut notifier = MockAttemptNotifier::new();
        notifier
            .expect_attempt_state_changed()
            .withf(|_, attempt, from| {
                attempt.state == AttemptState::Overdue && *from == AttemptState::InProgress
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (updated, outcome) = lifecycle(repo, notifier)
            .handle_if_time_expired(&q, a, t(20), ExpiryContext::UserView)
            .await
            .unwrap();
        assert_eq!(updated.state, AttemptState::Overdue);
        assert_eq!(
            outcome,
            ExpiryOutcome::Transitioned {
                from: AttemptState::InProgress,
                to: AttemptState::Overdue
            }
        );
    }

    #[tokio::test]
    async fn background_expiry_is_silent() {
        let q = quiz(OverdueHandling::Autosubmit);
        let a = open_attempt(&q, AttemptState::InProgress);

        let mut repo = MockAttemptRepository::new();
        repo.expect_compare_and_set_state()
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        let mut notifier = MockAttemptNotifier::new();
        notifier.expect_attempt_state_changed().times(0);

        let (updated, _) = lifecycle(repo, notifier)
            .handle_if_time_expired(&q, a, t(20), ExpiryContext::Background)
            .await
            .unwrap();
        assert_eq!(updated.state, AttemptState::Finished);
        assert_eq!(updated.time_finish, Some(t(20)));
    }

    #[tokio::test]
    async fn lost_race_is_treated_as_handled() {
        let q = quiz(OverdueHandling::Graceperiod);
        let a = open_attempt(&q, AttemptState::InProgress);
        let mut already = a.clone();
        already.state = AttemptState::Overdue;

        let mut repo = MockAttemptRepository::new();
        repo.expect_compare_and_set_state()
            .times(1)
            .returning(|_, _, _, _| Ok(false));
        repo.expect_get()
            .times(1)
            .returning(move |_| Ok(already.clone()));
        let mut notifier = MockAttemptNotifier::new();
        notifier.expect_attempt_state_changed().times(0);

        let (current, outcome) = lifecycle(repo, notifier)
            .handle_if_time_expired(&q, a, t(20), ExpiryContext::UserView)
            .await
            .unwrap();
        assert_eq!(current.state, AttemptState::Overdue);
        assert_eq!(outcome, ExpiryOutcome::AlreadyHandled);
    }

    #[tokio::test]
    async fn lost_race_retries_once_when_transition_still_due() {
        let q = quiz(OverdueHandling::Autosubmit);
        let a = open_attempt(&q, AttemptState::InProgress);
        let mut moved = a.clone();
        moved.state = AttemptState::Overdue;

        let mut repo = MockAttemptRepository::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_compare_and_set_state()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(false));
        repo.expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(moved.clone()));
        repo.expect_compare_and_set_state()
            .withf(|_, expected, next, _| {
                *expected == AttemptState::Overdue && *next == AttemptState::Finished
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(true));
        let mut notifier = MockAttemptNotifier::new();
        notifier
            .expect_attempt_state_changed()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (current, outcome) = lifecycle(repo, notifier)
            .handle_if_time_expired(&q, a, t(20), ExpiryContext::UserView)
            .await
            .unwrap();
        assert_eq!(current.state, AttemptState::Finished);
        assert_eq!(
            outcome,
            ExpiryOutcome::Transitioned {
                from: AttemptState::Overdue,
                to: AttemptState::Finished
            }
        );
    }

    #[tokio::test]
    async fn overdue_attempt_under_grace_handling_is_left_alone() {
        let q = quiz(OverdueHandling::Graceperiod);
        let a = open_attempt(&q, AttemptState::Overdue);

        let repo = MockAttemptRepository::new();
        let notifier = MockAttemptNotifier::new();
        let (current, outcome) = lifecycle(repo, notifier)
            .handle_if_time_expired(&q, a.clone(), t(40), ExpiryContext::UserView)
            .await
            .unwrap();
        assert_eq!(current, a);
        assert_eq!(outcome, ExpiryOutcome::NotDue);
    }

    #[tokio::test]
    async fn start_creates_next_attempt_with_deadline() {
        let q = quiz(OverdueHandling::Autosubmit);
        let user_id = Uuid::new_v4();
        let mut first = open_attempt(&q, AttemptState::Finished);
        first.user_id = user_id;
        first.time_finish = Some(t(5));

        let mut repo = MockAttemptRepository::new();
        repo.expect_list_finished()
            .returning(move |_, _| Ok(vec![first.clone()]));
        repo.expect_find_active().returning(|_, _| Ok(None));
        repo.expect_create()
            .withf(move |new| {
                new.attempt_number == 2 && new.deadline == Some(t(30)) && !new.preview
            })
            .times(1)
            .returning(|new| {
                Ok(QuizAttempt {
                    id: Uuid::new_v4(),
                    quiz_id: new.quiz_id,
                    user_id: new.user_id,
                    attempt_number: new.attempt_number,
                    preview: new.preview,
                    state: AttemptState::InProgress,
                    time_start: new.time_start,
                    time_finish: None,
                    deadline: new.deadline,
                    sum_grades: None,
                    updated_at: None,
                })
            });

        let outcome = lifecycle(repo, MockAttemptNotifier::new())
            .start_attempt(
                &q,
                StartRequest {
                    user_id,
                    now: t(20),
                    bypass_time_limits: false,
                    preview: false,
                    preflight: PreflightInput::default(),
                },
            )
            .await
            .unwrap();
        match outcome {
            StartOutcome::Started(attempt) => assert_eq!(attempt.attempt_number, 2),
            other => panic!("expected a new attempt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn start_refuses_quiz_without_usable_questions() {
        let request = || StartRequest {
            user_id: Uuid::new_v4(),
            now: t(20),
            bypass_time_limits: false,
            preview: true,
            preflight: PreflightInput::default(),
        };

        let mut empty = quiz(OverdueHandling::Autosubmit);
        empty.questions = Json(Vec::new());
        let mut broken = quiz(OverdueHandling::Autosubmit);
        broken.questions.0[0].question_type = "missingtype".to_string();

        // The repository is never touched, so nothing can be resumed or created.
        let lc = lifecycle(MockAttemptRepository::new(), MockAttemptNotifier::new());
        assert_eq!(
            lc.start_attempt(&empty, request()).await.unwrap(),
            StartOutcome::Denied(vec![DenialReason::NoQuestions])
        );
        assert_eq!(
            lc.start_attempt(&broken, request()).await.unwrap(),
            StartOutcome::Denied(vec![DenialReason::InvalidQuestions])
        );
    }
}
