pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::config::{Config, StaleOverridePolicy};
use crate::services::{
    attempt_lifecycle::AttemptLifecycle,
    attempt_repository::{AttemptRepository, PgAttemptRepository},
    grade_calculator::{GradeRepository, PgGradeRepository},
    gradebook::{GradebookRepository, PgGradebookRepository},
    notification_service::{AttemptNotifier, NotificationService},
    quiz_repository::{PgQuizRepository, QuizRepository},
    view_service::QuizViewService,
};
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub quizzes: Arc<dyn QuizRepository>,
    pub lifecycle: AttemptLifecycle,
    pub views: QuizViewService,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        let notifier = NotificationService::new(
            pool.clone(),
            config.notification_webhook_url.clone(),
            config.webhook_secret.clone(),
        );
        Self::from_parts(
            Arc::new(PgQuizRepository::new(pool.clone())),
            Arc::new(PgAttemptRepository::new(pool.clone())),
            Arc::new(PgGradeRepository::new(pool.clone())),
            Arc::new(PgGradebookRepository::new(pool)),
            Arc::new(notifier),
            &config.jwt_secret,
            config.stale_override_policy,
        )
    }

    /// Assemble the state from arbitrary collaborators.
    pub fn from_parts(
        quizzes: Arc<dyn QuizRepository>,
        attempts: Arc<dyn AttemptRepository>,
        grades: Arc<dyn GradeRepository>,
        gradebook: Arc<dyn GradebookRepository>,
        notifier: Arc<dyn AttemptNotifier>,
        jwt_secret: &str,
        stale_override: StaleOverridePolicy,
    ) -> Self {
        let lifecycle = AttemptLifecycle::new(attempts.clone(), notifier);
        let views = QuizViewService::new(
            quizzes.clone(),
            attempts,
            grades,
            gradebook,
            lifecycle.clone(),
            stale_override,
        );
        Self {
            quizzes,
            lifecycle,
            views,
            jwt_secret: Arc::from(jwt_secret),
        }
    }
}
