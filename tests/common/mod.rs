#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

use quiz_backend::config::StaleOverridePolicy;
use quiz_backend::error::{Error, Result};
use quiz_backend::models::grade::{GradeItem, GradebookGrade};
use quiz_backend::models::quiz::{
    GradeMethod, OverdueHandling, Quiz, QuizSlot, ReviewFlags, ReviewOptions,
};
use quiz_backend::models::quiz_attempt::{AttemptState, NewAttempt, QuizAttempt};
use quiz_backend::services::attempt_repository::AttemptRepository;
use quiz_backend::services::grade_calculator::GradeRepository;
use quiz_backend::services::gradebook::GradebookRepository;
use quiz_backend::services::notification_service::AttemptNotifier;
use quiz_backend::services::quiz_repository::QuizRepository;
use quiz_backend::AppState;

pub const JWT_SECRET: &str = "test_secret_key";

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, hour, minute, 0).unwrap()
}

pub fn quiz() -> Quiz {
    let shown = ReviewFlags {
        marks: true,
        overall_feedback: true,
    };
    Quiz {
        id: Uuid::new_v4(),
        course_id: Uuid::new_v4(),
        name: "Cell biology".to_string(),
        intro: Some("Chapter 3".to_string()),
        max_attempts: 0,
        grade_method: GradeMethod::Highest,
        time_open: None,
        time_close: None,
        time_limit_secs: None,
        grace_period_secs: 0,
        overdue_handling: OverdueHandling::Autosubmit,
        delay1_secs: 0,
        delay2_secs: 0,
        password_hash: None,
        subnet: None,
        require_popup: false,
        grade: Decimal::from(10),
        sum_grades: Decimal::from(100),
        decimal_points: 2,
        has_feedback: false,
        review_options: Json(ReviewOptions {
            during: ReviewFlags::default(),
            immediately: shown,
            open: shown,
            closed: shown,
        }),
        questions: Json(vec![
            QuizSlot {
                slot: 1,
                question_type: "multichoice".to_string(),
                max_mark: Decimal::from(50),
            },
            QuizSlot {
                slot: 2,
                question_type: "shortanswer".to_string(),
                max_mark: Decimal::from(50),
            },
        ]),
        created_at: None,
        updated_at: None,
    }
}

pub fn attempt(
    quiz: &Quiz,
    user_id: Uuid,
    number: i32,
    state: AttemptState,
    started: DateTime<Utc>,
) -> QuizAttempt {
    QuizAttempt {
        id: Uuid::new_v4(),
        quiz_id: quiz.id,
        user_id,
        attempt_number: number,
        preview: false,
        state,
        time_start: started,
        time_finish: state.is_terminal().then(|| started + Duration::minutes(20)),
        deadline: None,
        sum_grades: None,
        updated_at: None,
    }
}

pub fn finished_with_marks(
    quiz: &Quiz,
    user_id: Uuid,
    number: i32,
    started: DateTime<Utc>,
    marks: i64,
) -> QuizAttempt {
    let mut a = attempt(quiz, user_id, number, AttemptState::Finished, started);
    a.sum_grades = Some(Decimal::from(marks));
    a
}

#[derive(Default)]
pub struct InMemoryQuizzes {
    quizzes: Mutex<HashMap<Uuid, Quiz>>,
}

impl InMemoryQuizzes {
    pub fn insert(&self, quiz: Quiz) {
        self.quizzes.lock().unwrap().insert(quiz.id, quiz);
    }
}

#[async_trait]
impl QuizRepository for InMemoryQuizzes {
    async fn get(&self, quiz_id: Uuid) -> Result<Option<Quiz>> {
        Ok(self.quizzes.lock().unwrap().get(&quiz_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryAttempts {
    attempts: Mutex<HashMap<Uuid, QuizAttempt>>,
    pub cas_calls: AtomicUsize,
}

impl InMemoryAttempts {
    pub fn insert(&self, attempt: QuizAttempt) {
        self.attempts.lock().unwrap().insert(attempt.id, attempt);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<QuizAttempt> {
        self.attempts.lock().unwrap().get(&id).cloned()
    }

    pub fn all_for(&self, quiz_id: Uuid, user_id: Uuid) -> Vec<QuizAttempt> {
        let mut rows: Vec<QuizAttempt> = self
            .attempts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.quiz_id == quiz_id && a.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.attempt_number);
        rows
    }
}

#[async_trait]
impl AttemptRepository for InMemoryAttempts {
    async fn list_finished(&self, quiz_id: Uuid, user_id: Uuid) -> Result<Vec<QuizAttempt>> {
        Ok(self
            .all_for(quiz_id, user_id)
            .into_iter()
            .filter(|a| a.state.is_terminal())
            .collect())
    }

    async fn find_active(&self, quiz_id: Uuid, user_id: Uuid) -> Result<Option<QuizAttempt>> {
        Ok(self
            .all_for(quiz_id, user_id)
            .into_iter()
            .find(|a| a.state.is_active()))
    }

    async fn get(&self, attempt_id: Uuid) -> Result<QuizAttempt> {
        self.snapshot(attempt_id)
            .ok_or_else(|| Error::NotFound("Resource not found".to_string()))
    }

    async fn create(&self, new: NewAttempt) -> Result<QuizAttempt> {
        let mut attempts = self.attempts.lock().unwrap();
        if attempts
            .values()
            .any(|a| a.quiz_id == new.quiz_id && a.user_id == new.user_id && a.state.is_active())
        {
            return Err(Error::Conflict(
                "An attempt at this quiz is already in progress".to_string(),
            ));
        }
        let row = QuizAttempt {
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
        };
        attempts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn compare_and_set_state(
        &self,
        attempt_id: Uuid,
        expected: AttemptState,
        next: AttemptState,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        let mut attempts = self.attempts.lock().unwrap();
        match attempts.get_mut(&attempt_id) {
            Some(a) if a.state == expected => {
                a.state = next;
                if finished_at.is_some() {
                    a.time_finish = finished_at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<QuizAttempt>> {
        Ok(self
            .attempts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.state.is_active() && a.deadline.is_some_and(|d| d < now))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryGrades {
    totals: Mutex<HashMap<Uuid, Decimal>>,
}

impl InMemoryGrades {
    pub fn set(&self, attempt_id: Uuid, total: Decimal) {
        self.totals.lock().unwrap().insert(attempt_id, total);
    }
}

#[async_trait]
impl GradeRepository for InMemoryGrades {
    async fn totals_for(&self, attempt_ids: &[Uuid]) -> Result<HashMap<Uuid, Decimal>> {
        let totals = self.totals.lock().unwrap();
        Ok(attempt_ids
            .iter()
            .map(|id| (*id, totals.get(id).copied().unwrap_or(Decimal::ZERO)))
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryGradebook {
    items: Mutex<HashMap<Uuid, GradeItem>>,
    grades: Mutex<HashMap<(Uuid, Uuid), GradebookGrade>>,
}

impl InMemoryGradebook {
    pub fn add_item(&self, item: GradeItem) {
        self.items.lock().unwrap().insert(item.quiz_id, item);
    }

    pub fn add_grade(&self, grade: GradebookGrade) {
        self.grades
            .lock()
            .unwrap()
            .insert((grade.item_id, grade.user_id), grade);
    }
}

#[async_trait]
impl GradebookRepository for InMemoryGradebook {
    async fn grade_item(&self, quiz_id: Uuid) -> Result<Option<GradeItem>> {
        Ok(self.items.lock().unwrap().get(&quiz_id).cloned())
    }

    async fn user_grade(&self, item_id: Uuid, user_id: Uuid) -> Result<Option<GradebookGrade>> {
        Ok(self
            .grades
            .lock()
            .unwrap()
            .get(&(item_id, user_id))
            .cloned())
    }
}

/// Counts notifications instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, AttemptState, AttemptState)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(Uuid, AttemptState, AttemptState)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttemptNotifier for RecordingNotifier {
    async fn attempt_state_changed(
        &self,
        _quiz: &Quiz,
        attempt: &QuizAttempt,
        from: AttemptState,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((attempt.id, from, attempt.state));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct Harness {
    pub quizzes: Arc<InMemoryQuizzes>,
    pub attempts: Arc<InMemoryAttempts>,
    pub grades: Arc<InMemoryGrades>,
    pub gradebook: Arc<InMemoryGradebook>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, policy: StaleOverridePolicy) -> AppState {
        AppState::from_parts(
            self.quizzes.clone(),
            self.attempts.clone(),
            self.grades.clone(),
            self.gradebook.clone(),
            self.notifier.clone(),
            JWT_SECRET,
            policy,
        )
    }

    pub fn router(&self) -> Router {
        self.router_with(StaleOverridePolicy::default())
    }

    pub fn router_with(&self, policy: StaleOverridePolicy) -> Router {
        quiz_backend::routes::build_router(self.state(policy), 1000)
    }
}

pub fn token(user_id: Uuid, role: &str, caps: &[&str]) -> String {
    quiz_backend::utils::token::issue_token(JWT_SECRET, user_id, role, caps, Duration::hours(1))
        .expect("token")
}
